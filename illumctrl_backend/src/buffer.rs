//! Coalescing request buffer.
//!
//! UI controls such as sliders fire requests much faster than a laser on a serial
//! link or an AOTF can accept them. Each hardware endpoint therefore owns a
//! [`CoalescingBuffer`]: producers append [`Request`]s without ever touching the
//! hardware, and the endpoint's drain loop takes only the newest request per
//! cycle, discarding the superseded ones.
//!
//! Two policies exist ([`Coalescing`]):
//! - `Latest` (single-channel endpoints, e.g. lasers): the whole backlog collapses
//!   into the newest request;
//! - `PerChannel` (multi-channel endpoints, e.g. AOTFs): only backlog entries for
//!   the channel of the newest request are dropped, other channels keep theirs
//!   for the following cycles.
//!
//! ```
//! use illumctrl_backend::buffer::{Coalescing, CoalescingBuffer, Request};
//!
//! let buffer = CoalescingBuffer::new(Coalescing::PerChannel);
//! buffer.push(Request::for_channel(true, 0, 3.0));
//! buffer.push(Request::for_channel(true, 1, 4.0));
//! buffer.push(Request::for_channel(true, 0, 6.0));
//!
//! assert_eq!(buffer.take_latest(), Some(Request::for_channel(true, 0, 6.0)));
//! assert_eq!(buffer.pending(), vec![Request::for_channel(true, 1, 4.0)]);
//! ```

use std::mem;

use parking_lot::Mutex;

/// One "set state" request for an illumination endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Request {
    pub on: bool,
    /// `None` for single-channel endpoints
    pub channel: Option<usize>,
    pub amplitude: f64,
}

impl Request {
    pub fn new(on: bool, amplitude: f64) -> Self {
        Self {
            on,
            channel: None,
            amplitude,
        }
    }

    pub fn for_channel(on: bool, channel: usize, amplitude: f64) -> Self {
        Self {
            on,
            channel: Some(channel),
            amplitude,
        }
    }

    /// Amplitude to put on the hardware: the requested one when on, zero when off
    pub fn effective_amplitude(&self) -> f64 {
        if self.on {
            self.amplitude
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalescing {
    /// Keep only the newest request
    Latest,
    /// Keep the newest request, drop older ones for the same channel
    PerChannel,
}

#[derive(Debug)]
pub struct CoalescingBuffer {
    policy: Coalescing,
    pending: Mutex<Vec<Request>>,
}

impl CoalescingBuffer {
    pub fn new(policy: Coalescing) -> Self {
        Self {
            policy,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> Coalescing {
        self.policy
    }

    /// Appends a request. Only contends with a drain for the duration of a swap.
    pub fn push(&self, request: Request) {
        self.pending.lock().push(request);
    }

    /// Removes and returns the newest request, coalescing the backlog according
    /// to the buffer policy. The lock is released before returning, so the
    /// caller applies the request to the hardware without holding it.
    pub fn take_latest(&self) -> Option<Request> {
        let mut pending = self.pending.lock();
        let mut backlog = mem::take(&mut *pending);
        let latest = backlog.pop()?;
        if self.policy == Coalescing::PerChannel {
            backlog.retain(|req| req.channel != latest.channel);
            *pending = backlog;
        }
        Some(latest)
    }

    /// Snapshot of the pending requests, oldest first
    pub fn pending(&self) -> Vec<Request> {
        self.pending.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }
}

#[cfg(test)]
mod test {
    use crate::buffer::*;

    #[test]
    fn effective_amplitude_is_zero_when_off() {
        assert_eq!(Request::new(true, 5.0).effective_amplitude(), 5.0);
        assert_eq!(Request::new(false, 5.0).effective_amplitude(), 0.0);
    }

    #[test]
    fn latest_collapses_backlog() {
        let buffer = CoalescingBuffer::new(Coalescing::Latest);
        buffer.push(Request::new(true, 5.0));
        buffer.push(Request::new(true, 8.0));
        buffer.push(Request::new(false, 0.0));
        assert_eq!(buffer.take_latest(), Some(Request::new(false, 0.0)));
        assert!(buffer.is_empty());
        assert_eq!(buffer.take_latest(), None);
    }

    #[test]
    fn per_channel_keeps_other_channels() {
        let buffer = CoalescingBuffer::new(Coalescing::PerChannel);
        for (ch, amp) in [(0, 1.0), (1, 2.0), (2, 3.0), (1, 4.0), (0, 5.0)] {
            buffer.push(Request::for_channel(true, ch, amp));
        }
        assert_eq!(buffer.take_latest(), Some(Request::for_channel(true, 0, 5.0)));
        assert_eq!(
            buffer.pending(),
            vec![
                Request::for_channel(true, 1, 2.0),
                Request::for_channel(true, 2, 3.0),
                Request::for_channel(true, 1, 4.0),
            ]
        );
        // Only the just-applied channel is de-duplicated: channel 1 still holds
        // two entries until its newest one is popped.
        assert_eq!(buffer.take_latest(), Some(Request::for_channel(true, 1, 4.0)));
        assert_eq!(buffer.pending(), vec![Request::for_channel(true, 2, 3.0)]);
        assert_eq!(buffer.take_latest(), Some(Request::for_channel(true, 2, 3.0)));
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn push_after_take_is_kept() {
        let buffer = CoalescingBuffer::new(Coalescing::Latest);
        buffer.push(Request::new(true, 1.0));
        buffer.take_latest();
        buffer.push(Request::new(true, 2.0));
        assert_eq!(buffer.pending(), vec![Request::new(true, 2.0)]);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
