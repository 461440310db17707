//! Triggered waveform output ("shutter") controller.
//!
//! ## Overview
//!
//! During a film the illumination of every channel follows a per-cycle waveform
//! that must stay locked to the camera. Instead of a software loop, the board is
//! armed once:
//!
//! - a multi-channel analog waveform task on `ao0..ao{n-1}` holds one full cycle
//!   and takes its sample clock from a counter output terminal;
//! - a counter task emits exactly one cycle worth of clock pulses each time the
//!   camera fires its trigger line, and re-arms by itself for the next frame.
//!
//! The sample clock runs slightly faster than `oversampling / cycle_time`, so the
//! counter has finished its pulse train and is armed again before the next
//! camera trigger arrives.
//!
//! ## Lifecycle
//!
//! [`ShutterState::Idle`] → [`setup`](ShutterController::setup) →
//! [`ShutterState::Configured`] → [`start_film`](ShutterController::start_film) →
//! [`ShutterState::Filming`] → [`stop_film`](ShutterController::stop_film) →
//! [`ShutterState::Idle`].
//!
//! Tasks are never reused: `stop_film` and [`cleanup`](ShutterController::cleanup)
//! clear them, and the next session creates new ones. Calling `setup` while tasks
//! are still held is a caller bug and fails with [`ShutterError::AlreadyConfigured`].
//! Hardware errors are returned as they occur, without retries.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ShutterConfig;
use crate::error::ShutterError;
use crate::hardware::{DaqHardware, Edge, SampleMode};
use crate::tasks::{BaseTask, CounterOutput, VoltageOutput, WaveformOutput};
use crate::waveform::Waveform;

/// Maps `(channel, power)` to the analog voltage producing that power
pub type PowerToVoltage = Box<dyn Fn(usize, f64) -> f64 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterState {
    Idle,
    Configured,
    Filming,
}

/// Sample clock frequency (Hz) for a camera cycle of `cycle_time` seconds.
///
/// ```
/// use illumctrl_backend::shutter::sample_clock_frequency;
///
/// let freq = sample_clock_frequency(100, 0.001, 0.1);
/// assert!((freq - 1001.0).abs() < 1e-9);
/// ```
pub fn sample_clock_frequency(oversampling: usize, slack: f64, cycle_time: f64) -> f64 {
    (1.0 + slack) / cycle_time * oversampling as f64
}

pub struct ShutterController {
    hw: Arc<dyn DaqHardware>,
    cfg: ShutterConfig,
    power_to_voltage: PowerToVoltage,
    waveform: Option<Waveform>,
    wv_task: Option<WaveformOutput>,
    ct_task: Option<CounterOutput>,
    filming: bool,
}

impl ShutterController {
    pub fn new(hw: Arc<dyn DaqHardware>, cfg: ShutterConfig, power_to_voltage: PowerToVoltage) -> Self {
        Self {
            hw,
            cfg,
            power_to_voltage,
            waveform: None,
            wv_task: None,
            ct_task: None,
            filming: false,
        }
    }

    pub fn config(&self) -> &ShutterConfig {
        &self.cfg
    }

    pub fn state(&self) -> ShutterState {
        if self.ct_task.is_none() && self.wv_task.is_none() {
            ShutterState::Idle
        } else if self.filming {
            ShutterState::Filming
        } else {
            ShutterState::Configured
        }
    }

    pub fn waveform(&self) -> Option<&Waveform> {
        self.waveform.as_ref()
    }

    /// Installs the per-cycle waveform used by the next `setup`.
    pub fn set_waveform(&mut self, waveform: Waveform) -> Result<(), ShutterError> {
        if self.ct_task.is_some() || self.wv_task.is_some() {
            return Err(ShutterError::WaveformLocked);
        }
        if waveform.channel_count() != self.cfg.channels {
            return Err(ShutterError::ChannelMismatch {
                expected: self.cfg.channels,
                actual: waveform.channel_count(),
            });
        }
        self.waveform = Some(waveform);
        Ok(())
    }

    /// Installs a flat channel-major waveform spanning all channels.
    pub fn set_waveform_flat(&mut self, flat: Vec<f64>) -> Result<(), ShutterError> {
        let waveform = Waveform::from_flat(flat, self.cfg.channels)?;
        self.set_waveform(waveform)
    }

    /// Arms the board for a film with camera cycle `cycle_time` (s).
    pub fn setup(&mut self, cycle_time: f64) -> Result<(), ShutterError> {
        if self.ct_task.is_some() || self.wv_task.is_some() {
            return Err(ShutterError::AlreadyConfigured);
        }
        if !(cycle_time > 0.0 && cycle_time.is_finite()) {
            return Err(ShutterError::InvalidCycleTime(cycle_time));
        }
        let waveform = self.waveform.as_ref().ok_or(ShutterError::NoWaveform)?;
        let cfg = &self.cfg;
        let frequency = sample_clock_frequency(cfg.oversampling, cfg.slack, cycle_time);
        debug!(
            board = %cfg.board,
            cycle_time,
            frequency,
            samples = waveform.samples_per_channel(),
            "configuring shutter tasks"
        );

        let mut wv_task = WaveformOutput::with_range(
            self.hw.clone(),
            &cfg.board,
            0,
            cfg.min_voltage,
            cfg.max_voltage,
        )?;
        for channel in 1..cfg.channels {
            wv_task.add_channel(channel)?;
        }
        wv_task.set_waveform(
            waveform,
            frequency,
            SampleMode::Continuous,
            &cfg.clock,
            Edge::Rising,
        )?;

        let ct_task = CounterOutput::new(
            self.hw.clone(),
            &cfg.board,
            cfg.counter,
            frequency,
            cfg.duty_cycle,
            0.0,
        )?;
        ct_task.set_counter(waveform.samples_per_channel())?;
        ct_task.set_trigger(cfg.trigger, true)?;

        self.wv_task = Some(wv_task);
        self.ct_task = Some(ct_task);
        Ok(())
    }

    /// Starts the waveform task, then the counter clocking it.
    pub fn start_film(&mut self) -> Result<(), ShutterError> {
        let (Some(wv_task), Some(ct_task)) = (&self.wv_task, &self.ct_task) else {
            return Err(ShutterError::NotConfigured);
        };
        wv_task.start_task()?;
        ct_task.start_task()?;
        self.filming = true;
        info!(board = %self.cfg.board, "film started");
        Ok(())
    }

    /// Stops and clears the film tasks, then drives every channel to its
    /// zero-power voltage.
    pub fn stop_film(&mut self) -> Result<(), ShutterError> {
        let ct_task = self.ct_task.take();
        let wv_task = self.wv_task.take();
        if self.filming {
            info!(board = %self.cfg.board, "film stopped");
        }
        self.filming = false;
        if let Some(ct_task) = &ct_task {
            ct_task.stop_task()?;
        }
        if let Some(wv_task) = &wv_task {
            wv_task.stop_task()?;
        }
        if let Some(ct_task) = ct_task {
            ct_task.clear_task()?;
        }
        if let Some(wv_task) = wv_task {
            wv_task.clear_task()?;
        }

        for channel in 0..self.cfg.channels {
            let ao_task = VoltageOutput::with_range(
                self.hw.clone(),
                &self.cfg.board,
                channel,
                self.cfg.min_voltage,
                self.cfg.max_voltage,
            )?;
            ao_task.output_voltage((self.power_to_voltage)(channel, 0.0))?;
            ao_task.start_task()?;
            ao_task.stop_task()?;
            ao_task.clear_task()?;
        }
        Ok(())
    }

    /// Clears any task still held and returns to idle. Safe to call repeatedly.
    ///
    /// Both tasks are released even when clearing the first one fails; the
    /// first error is returned.
    pub fn cleanup(&mut self) -> Result<(), ShutterError> {
        self.filming = false;
        let ct_result = self.ct_task.take().map_or(Ok(()), |task| task.clear_task());
        let wv_result = self.wv_task.take().map_or(Ok(()), |task| task.clear_task());
        ct_result.and(wv_result)?;
        Ok(())
    }
}
