use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot stop signal shared between an endpoint and its drain thread.
///
/// The drain thread sleeps between cycles with [`StopSignal::wait_timeout`], so a
/// stop request wakes it immediately instead of after the full poll period.
#[derive(Clone, Default)]
pub struct StopSignal {
    stop: Arc<Mutex<bool>>,
    condvar: Arc<Condvar>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        let mut stop = self.stop.lock();
        *stop = true;
        self.condvar.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *self.stop.lock()
    }

    /// Sleeps for at most `timeout`. Returns `true` once a stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stop = self.stop.lock();
        while !*stop {
            if self.condvar.wait_until(&mut stop, deadline).timed_out() {
                break;
            }
        }
        *stop
    }
}

#[cfg(test)]
mod test {
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::worker_signal::StopSignal;

    #[test]
    fn wait_times_out_without_request() {
        let signal = StopSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));
        assert!(!signal.is_requested());
    }

    #[test]
    fn request_wakes_waiter() {
        let signal = StopSignal::new();
        let waiter = signal.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        signal.request();
        assert!(handle.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(signal.wait_timeout(Duration::from_secs(10)));
    }
}
