//! Buffered command queues, one per illumination endpoint.
//!
//! ## Overview
//!
//! An [`Endpoint`] pairs a [`CoalescingBuffer`] with the device it feeds. The two
//! are guarded by independent mutexes: producers only ever take the buffer lock,
//! and the device lock is only taken to talk to the hardware, so a slow serial
//! write never blocks a UI thread that is adding requests.
//!
//! A [`CommandQueue`] runs the endpoint's drain loop on its own named thread. Every
//! poll period the loop takes the newest request (coalescing the backlog, see
//! [`crate::buffer`]) and applies it to the device outside the buffer lock.
//!
//! ## Simulation mode
//!
//! An endpoint whose device could not be constructed, or whose device reports a
//! bad status at start-up, holds no device. Requests are then logged instead of
//! written, so the rest of the acquisition software keeps working for dry runs.
//!
//! ## Failures
//!
//! A request that fails on the hardware terminates the drain loop. The error is
//! logged and handed back by [`CommandQueue::stop_thread`].

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::buffer::{CoalescingBuffer, Request};
use crate::config::EndpointConfig;
use crate::device::{AaAotf, AotfDriver, CtAotf, IlluminationDevice, Laser, LaserDriver};
use crate::error::{DeviceError, QueueError};
use crate::worker_signal::StopSignal;

pub struct Endpoint<D: IlluminationDevice> {
    name: String,
    buffer: CoalescingBuffer,
    device: Mutex<Option<D>>,
}

impl<D: IlluminationDevice> Endpoint<D> {
    /// Takes ownership of `device` if it is present and ready, otherwise the
    /// endpoint starts in simulation mode.
    pub fn new(name: &str, device: Option<D>) -> Self {
        let device = match device {
            Some(mut device) => {
                if device.is_ready() {
                    Some(device)
                } else {
                    warn!(endpoint = name, "device reports a bad status, running in simulation mode");
                    if let Err(err) = device.shut_down() {
                        warn!(endpoint = name, "shut down of faulty device failed: {}", err);
                    }
                    None
                }
            }
            None => {
                warn!(endpoint = name, "device not reachable, running in simulation mode");
                None
            }
        };
        Self {
            name: name.to_string(),
            buffer: CoalescingBuffer::new(D::COALESCING),
            device: Mutex::new(device),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_simulated(&self) -> bool {
        self.device.lock().is_none()
    }

    pub fn add_request(&self, request: Request) {
        self.buffer.push(request);
    }

    /// Pending requests, oldest first
    pub fn pending(&self) -> Vec<Request> {
        self.buffer.pending()
    }

    /// One drain cycle. Returns the applied request, if any.
    pub fn drain_cycle(&self) -> Result<Option<Request>, DeviceError> {
        match self.buffer.take_latest() {
            Some(request) => {
                self.set_amplitude(&request)?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    /// Writes a request to the device immediately, bypassing the buffer.
    pub fn set_amplitude(&self, request: &Request) -> Result<(), DeviceError> {
        let mut device = self.device.lock();
        match device.as_mut() {
            Some(device) => device.apply_state(request),
            None => {
                info!(
                    endpoint = %self.name,
                    channel = ?request.channel,
                    amplitude = request.effective_amplitude(),
                    "simulated write"
                );
                Ok(())
            }
        }
    }

    pub fn analog_modulation(&self, on: bool) -> Result<(), DeviceError> {
        match self.device.lock().as_mut() {
            Some(device) => device.analog_modulation(on),
            None => Ok(()),
        }
    }

    /// Runs `f` on the device under the device lock. Returns `None` in
    /// simulation mode.
    pub fn with_device<R>(
        &self,
        f: impl FnOnce(&mut D) -> Result<R, DeviceError>,
    ) -> Result<Option<R>, DeviceError> {
        self.device.lock().as_mut().map(f).transpose()
    }

    /// Shuts the device down and forgets it. Later calls are no-ops.
    pub fn release_device(&self) -> Result<(), DeviceError> {
        let device = self.device.lock().take();
        match device {
            Some(mut device) => {
                debug!(endpoint = %self.name, "shutting down device");
                device.shut_down()
            }
            None => Ok(()),
        }
    }
}

fn drain_loop<D: IlluminationDevice>(
    endpoint: &Endpoint<D>,
    stop: &StopSignal,
    poll_interval: Duration,
) -> Result<(), DeviceError> {
    while !stop.is_requested() {
        if let Err(err) = endpoint.drain_cycle() {
            error!(endpoint = %endpoint.name(), "drain loop terminated: {}", err);
            return Err(err);
        }
        if stop.wait_timeout(poll_interval) {
            break;
        }
    }
    debug!(endpoint = %endpoint.name(), "drain loop stopped");
    Ok(())
}

/// An [`Endpoint`] with its drain thread.
pub struct CommandQueue<D: IlluminationDevice> {
    endpoint: Arc<Endpoint<D>>,
    stop: StopSignal,
    worker: Option<JoinHandle<Result<(), DeviceError>>>,
    shutdown_poll: Duration,
}

impl<D: IlluminationDevice> CommandQueue<D> {
    /// Spawns the drain thread, named after the endpoint.
    ///
    /// `device` is `None` when the driver could not be constructed; the queue then
    /// runs in simulation mode.
    pub fn spawn(name: &str, device: Option<D>, cfg: &EndpointConfig) -> Result<Self, QueueError> {
        let endpoint = Arc::new(Endpoint::new(name, device));
        let stop = StopSignal::new();
        let poll_interval = cfg.poll_interval();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn({
                let endpoint = endpoint.clone();
                let stop = stop.clone();
                move || drain_loop(&endpoint, &stop, poll_interval)
            })
            .map_err(|source| QueueError::Spawn {
                name: name.to_string(),
                source,
            })?;
        Ok(Self {
            endpoint,
            stop,
            worker: Some(worker),
            shutdown_poll: cfg.shutdown_poll(),
        })
    }

    pub fn endpoint(&self) -> &Endpoint<D> {
        &self.endpoint
    }

    pub fn name(&self) -> &str {
        self.endpoint.name()
    }

    pub fn is_simulated(&self) -> bool {
        self.endpoint.is_simulated()
    }

    /// `false` once the drain loop has exited, either stopped or after a failure
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(false, |worker| !worker.is_finished())
    }

    pub fn enqueue(&self, request: Request) {
        self.endpoint.add_request(request);
    }

    pub fn add_request(&self, on: bool, amplitude: f64) {
        self.enqueue(Request::new(on, amplitude));
    }

    pub fn add_channel_request(&self, on: bool, channel: usize, amplitude: f64) {
        self.enqueue(Request::for_channel(on, channel, amplitude));
    }

    pub fn set_amplitude(&self, on: bool, amplitude: f64) -> Result<(), DeviceError> {
        self.endpoint.set_amplitude(&Request::new(on, amplitude))
    }

    pub fn set_channel_amplitude(
        &self,
        on: bool,
        channel: usize,
        amplitude: f64,
    ) -> Result<(), DeviceError> {
        self.endpoint
            .set_amplitude(&Request::for_channel(on, channel, amplitude))
    }

    pub fn analog_modulation_on(&self) -> Result<(), DeviceError> {
        self.endpoint.analog_modulation(true)
    }

    pub fn analog_modulation_off(&self) -> Result<(), DeviceError> {
        self.endpoint.analog_modulation(false)
    }

    /// Stops the drain loop, waits for it to exit and shuts the device down.
    ///
    /// Safe to call repeatedly; only the first call joins the thread and releases
    /// the device. Returns the error that terminated the loop, if any.
    pub fn stop_thread(&mut self) -> Result<(), QueueError> {
        self.stop.request();
        let mut result = Ok(());
        if let Some(worker) = self.worker.take() {
            while !worker.is_finished() {
                thread::sleep(self.shutdown_poll);
            }
            result = match worker.join() {
                Ok(loop_result) => loop_result.map_err(QueueError::from),
                Err(_) => Err(QueueError::WorkerPanicked(self.name().to_string())),
            };
        }
        if let Err(err) = self.endpoint.release_device() {
            if result.is_ok() {
                return Err(err.into());
            }
            warn!(endpoint = %self.name(), "device shut down failed: {}", err);
        }
        result
    }
}

impl<D: IlluminationDevice> Drop for CommandQueue<D> {
    fn drop(&mut self) {
        if self.worker.is_none() {
            return;
        }
        if let Err(err) = self.stop_thread() {
            error!(endpoint = %self.name(), "queue dropped with error: {}", err);
        }
    }
}

impl<L: LaserDriver> CommandQueue<Laser<L>> {
    pub fn pulse_mode_on(&self) -> Result<(), DeviceError> {
        self.endpoint.with_device(|laser| laser.set_pulse_mode(true))?;
        Ok(())
    }

    pub fn pulse_mode_off(&self) -> Result<(), DeviceError> {
        self.endpoint.with_device(|laser| laser.set_pulse_mode(false))?;
        Ok(())
    }
}

impl<A: AotfDriver> CommandQueue<CtAotf<A>> {
    pub fn fsk_on_off(&self, channel: usize, on: bool) -> Result<(), DeviceError> {
        self.endpoint.with_device(|aotf| aotf.fsk(channel, on))?;
        Ok(())
    }

    pub fn set_frequency(&self, channel: usize, frequency: f64) -> Result<(), DeviceError> {
        self.endpoint
            .with_device(|aotf| aotf.set_frequency(channel, frequency))?;
        Ok(())
    }

    pub fn set_frequencies(&self, channel: usize, frequencies: &[f64]) -> Result<(), DeviceError> {
        self.endpoint
            .with_device(|aotf| aotf.set_frequencies(channel, frequencies))?;
        Ok(())
    }
}

impl<A: AotfDriver> CommandQueue<AaAotf<A>> {
    pub fn set_frequency(&self, channel: usize, frequency: f64) -> Result<(), DeviceError> {
        self.endpoint
            .with_device(|aotf| aotf.set_frequency(channel, frequency))?;
        Ok(())
    }
}
