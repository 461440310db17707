//! Typed DAQ tasks built on the [`DaqHardware`] capability.
//!
//! ## Overview
//!
//! Each struct in this module owns exactly one hardware task and knows how to
//! configure it for one job: a single immediate voltage ([`VoltageOutput`]), a
//! clocked multi-channel analog waveform ([`WaveformOutput`]), a retriggerable
//! pulse train used as a sample clock ([`CounterOutput`]), port-wide digital
//! waveforms ([`DigitalWaveformOutput`]), single digital lines ([`DigitalOutput`],
//! [`DigitalInput`]) and finite analog acquisition ([`AnalogInput`]).
//!
//! Physical names follow the NI convention: `Dev1/ao0`, `Dev1/ctr0`,
//! `Dev1/port0/line3`; terminals are absolute (`/Dev1/PFI0`, `/Dev1/ctr0out`).
//!
//! ## Lifecycle
//!
//! A task is created with its channels, configured, started, stopped and finally
//! cleared. [`BaseTask::clear_task`] consumes the wrapper so a cleared task can
//! never be reused; a new task must be created for every session. A wrapper that
//! goes out of scope without being cleared clears its task on drop and logs a
//! warning, so failed setups do not leak hardware resources.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{DaqError, WaveformError};
use crate::hardware::{
    DaqHardware, Edge, IdleState, LineGrouping, SampleMode, TaskHandle, TerminalConfig,
};
use crate::waveform::Waveform;

pub const DEFAULT_MIN_VOLTAGE: f64 = -10.0;
pub const DEFAULT_MAX_VOLTAGE: f64 = 10.0;
/// Timeout (s) for immediate single-sample reads and writes
pub const IMMEDIATE_TIMEOUT: f64 = 10.0;
/// DAQmx convention for "block until done"
pub const WAIT_INFINITELY: f64 = -1.0;

/// Resolves a board to the name of an attached device.
///
/// `board` may be either a device name (`"Dev1"`) or a product type
/// (`"PCI-6722"`). With two boards of the same product type the first one listed
/// by the driver wins.
pub fn board_device(hw: &dyn DaqHardware, board: &str) -> Result<String, DaqError> {
    for device in hw.device_names()? {
        if device == board || hw.product_type(&device)? == board {
            return Ok(device);
        }
    }
    Err(DaqError::BoardNotFound(board.to_string()))
}

fn check_count(operation: &'static str, expected: usize, actual: usize) -> Result<(), DaqError> {
    if expected != actual {
        return Err(DaqError::SampleCountMismatch {
            operation,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Owner of one hardware task handle on one device.
pub struct DaqTask {
    hw: Arc<dyn DaqHardware>,
    handle: TaskHandle,
    device: String,
    cleared: bool,
}

impl DaqTask {
    pub fn new(hw: Arc<dyn DaqHardware>, board: &str) -> Result<Self, DaqError> {
        let device = board_device(hw.as_ref(), board)?;
        let handle = hw.create_task()?;
        debug!(%handle, device = %device, "created task");
        Ok(Self {
            hw,
            handle,
            device,
            cleared: false,
        })
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn hw(&self) -> &dyn DaqHardware {
        self.hw.as_ref()
    }

    /// Physical channel name on this task's device, e.g. `Dev1/ao3`
    pub fn physical_name(&self, channel: &str) -> String {
        format!("{}/{}", self.device, channel)
    }

    /// Absolute terminal name on this task's device, e.g. `/Dev1/PFI0`
    pub fn terminal(&self, terminal: &str) -> String {
        format!("/{}/{}", self.device, terminal)
    }

    pub fn start(&self) -> Result<(), DaqError> {
        self.hw.start_task(self.handle)
    }

    pub fn stop(&self) -> Result<(), DaqError> {
        self.hw.stop_task(self.handle)
    }

    pub fn is_done(&self) -> Result<bool, DaqError> {
        self.hw.is_task_done(self.handle)
    }

    pub fn clear(mut self) -> Result<(), DaqError> {
        self.cleared = true;
        debug!(handle = %self.handle, "clearing task");
        self.hw.clear_task(self.handle)
    }
}

impl Drop for DaqTask {
    fn drop(&mut self) {
        if self.cleared {
            return;
        }
        warn!(handle = %self.handle, device = %self.device, "task dropped without clear");
        if let Err(err) = self.hw.clear_task(self.handle) {
            warn!(handle = %self.handle, "implicit clear failed: {}", err);
        }
    }
}

/// Lifecycle operations shared by every typed task.
pub trait BaseTask: Sized {
    fn task(&self) -> &DaqTask;
    fn into_task(self) -> DaqTask;

    fn start_task(&self) -> Result<(), DaqError> {
        self.task().start()
    }
    fn stop_task(&self) -> Result<(), DaqError> {
        self.task().stop()
    }
    fn is_task_done(&self) -> Result<bool, DaqError> {
        self.task().is_done()
    }
    fn clear_task(self) -> Result<(), DaqError> {
        self.into_task().clear()
    }
}

macro_rules! impl_base_task {
    ($($t:ty),*) => {
        $(impl BaseTask for $t {
            fn task(&self) -> &DaqTask {
                &self.task
            }
            fn into_task(self) -> DaqTask {
                self.task
            }
        })*
    };
}

impl BaseTask for DaqTask {
    fn task(&self) -> &DaqTask {
        self
    }
    fn into_task(self) -> DaqTask {
        self
    }
}

impl_base_task!(
    VoltageOutput,
    WaveformOutput,
    CounterOutput,
    DigitalWaveformOutput,
    DigitalOutput,
    DigitalInput,
    AnalogInput
);

/// Single analog output channel written immediately, one sample at a time.
pub struct VoltageOutput {
    task: DaqTask,
    channel: usize,
}

impl VoltageOutput {
    pub fn new(hw: Arc<dyn DaqHardware>, board: &str, channel: usize) -> Result<Self, DaqError> {
        Self::with_range(hw, board, channel, DEFAULT_MIN_VOLTAGE, DEFAULT_MAX_VOLTAGE)
    }

    pub fn with_range(
        hw: Arc<dyn DaqHardware>,
        board: &str,
        channel: usize,
        min_val: f64,
        max_val: f64,
    ) -> Result<Self, DaqError> {
        let task = DaqTask::new(hw, board)?;
        let physical = task.physical_name(&format!("ao{}", channel));
        task.hw()
            .create_ao_voltage_chan(task.handle(), &physical, min_val, max_val)?;
        Ok(Self { task, channel })
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    /// Outputs a single voltage more or less as soon as it is called, assuming
    /// that no other task is driving the channel.
    pub fn output_voltage(&self, voltage: f64) -> Result<(), DaqError> {
        let written = self.task.hw().write_analog_f64(
            self.task.handle(),
            1,
            true,
            IMMEDIATE_TIMEOUT,
            &[voltage],
        )?;
        check_count("output_voltage", 1, written)
    }
}

/// Multi-channel analog waveform output, clocked by an external sample clock.
pub struct WaveformOutput {
    task: DaqTask,
    channels: usize,
    min_val: f64,
    max_val: f64,
}

impl WaveformOutput {
    pub fn new(hw: Arc<dyn DaqHardware>, board: &str, channel: usize) -> Result<Self, DaqError> {
        Self::with_range(hw, board, channel, DEFAULT_MIN_VOLTAGE, DEFAULT_MAX_VOLTAGE)
    }

    pub fn with_range(
        hw: Arc<dyn DaqHardware>,
        board: &str,
        channel: usize,
        min_val: f64,
        max_val: f64,
    ) -> Result<Self, DaqError> {
        let mut wv = Self {
            task: DaqTask::new(hw, board)?,
            channels: 0,
            min_val,
            max_val,
        };
        wv.add_channel(channel)?;
        Ok(wv)
    }

    /// Adds another analog output line. All channels must be added before
    /// [`WaveformOutput::set_waveform`] is called.
    pub fn add_channel(&mut self, channel: usize) -> Result<(), DaqError> {
        let physical = self.task.physical_name(&format!("ao{}", channel));
        self.task.hw().create_ao_voltage_chan(
            self.task.handle(),
            &physical,
            self.min_val,
            self.max_val,
        )?;
        self.channels += 1;
        Ok(())
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Configures the sample clock and transfers the waveform to the board buffer.
    ///
    /// The waveform of every channel is stored in one flat channel-major array, so
    /// the per-channel length is the total length divided by the task's channel
    /// count. `clock` names a terminal on the same device (`"ctr0out"`), an empty
    /// string selects the onboard clock.
    pub fn set_waveform(
        &self,
        waveform: &Waveform,
        sample_rate: f64,
        mode: SampleMode,
        clock: &str,
        edge: Edge,
    ) -> Result<(), DaqError> {
        let flat = waveform.as_flat();
        if flat.len() % self.channels != 0 {
            return Err(WaveformError::NotDivisible {
                len: flat.len(),
                channels: self.channels,
            }
            .into());
        }
        let samps_per_chan = flat.len() / self.channels;
        let clock_source = if clock.is_empty() {
            String::new()
        } else {
            self.task.terminal(clock)
        };
        debug!(
            handle = %self.task.handle(),
            sample_rate,
            samps_per_chan,
            clock = %clock_source,
            "configuring analog waveform"
        );
        self.task.hw().cfg_samp_clk_timing(
            self.task.handle(),
            &clock_source,
            sample_rate,
            edge,
            mode,
            samps_per_chan as u64,
        )?;
        let written = self.task.hw().write_analog_f64(
            self.task.handle(),
            samps_per_chan,
            false,
            WAIT_INFINITELY,
            &flat,
        )?;
        check_count("set_waveform", samps_per_chan, written)
    }
}

/// Counter generating a pulse train, used as a retriggerable sample clock.
pub struct CounterOutput {
    task: DaqTask,
}

impl CounterOutput {
    pub fn new(
        hw: Arc<dyn DaqHardware>,
        board: &str,
        counter: usize,
        frequency: f64,
        duty_cycle: f64,
        initial_delay: f64,
    ) -> Result<Self, DaqError> {
        let task = DaqTask::new(hw, board)?;
        let physical = task.physical_name(&format!("ctr{}", counter));
        task.hw().create_co_pulse_chan_freq(
            task.handle(),
            &physical,
            IdleState::Low,
            initial_delay,
            frequency,
            duty_cycle,
        )?;
        Ok(Self { task })
    }

    /// Emit exactly `number_samples` pulses per start trigger
    pub fn set_counter(&self, number_samples: usize) -> Result<(), DaqError> {
        self.task.hw().cfg_implicit_timing(
            self.task.handle(),
            SampleMode::Finite,
            number_samples as u64,
        )
    }

    /// Starts the pulse train on the rising edge of `PFI{trigger_source}`.
    pub fn set_trigger(&self, trigger_source: usize, retriggerable: bool) -> Result<(), DaqError> {
        self.task
            .hw()
            .set_start_trig_retriggerable(self.task.handle(), retriggerable)?;
        let trigger = self.task.terminal(&format!("PFI{}", trigger_source));
        self.task
            .hw()
            .cfg_dig_edge_start_trig(self.task.handle(), &trigger, Edge::Rising)
    }
}

/// Digital waveform output on a whole port. Every "channel" is one line of
/// `port0`; lines are packed into a 32-bit word per sample.
pub struct DigitalWaveformOutput {
    task: DaqTask,
    channels: usize,
}

impl DigitalWaveformOutput {
    pub fn new(hw: Arc<dyn DaqHardware>, board: &str) -> Result<Self, DaqError> {
        let task = DaqTask::new(hw, board)?;
        let lines = task.physical_name("port0");
        task.hw()
            .create_do_chan(task.handle(), &lines, LineGrouping::ChanForAllLines)?;
        Ok(Self { task, channels: 1 })
    }

    /// All lines already belong to the port channel, extra channels only tell how
    /// the waveform is divided.
    pub fn add_dig_channel(&mut self) {
        self.channels += 1;
    }

    pub fn channel_count(&self) -> usize {
        self.channels
    }

    pub fn set_dig_waveform(
        &self,
        waveform: &Waveform,
        sample_rate: f64,
        mode: SampleMode,
        clock: &str,
        edge: Edge,
    ) -> Result<(), DaqError> {
        let words = if waveform.channel_count() == self.channels {
            waveform.to_digital_port()?
        } else {
            Waveform::from_flat(waveform.as_flat().into_owned(), self.channels)?
                .to_digital_port()?
        };
        let clock_source = if clock.is_empty() {
            String::new()
        } else {
            self.task.terminal(clock)
        };
        self.task.hw().cfg_samp_clk_timing(
            self.task.handle(),
            &clock_source,
            sample_rate,
            edge,
            mode,
            words.len() as u64,
        )?;
        let written = self.task.hw().write_digital_u32(
            self.task.handle(),
            words.len(),
            false,
            IMMEDIATE_TIMEOUT,
            &words,
        )?;
        check_count("set_dig_waveform", words.len(), written)
    }
}

/// Single digital line, written immediately.
pub struct DigitalOutput {
    task: DaqTask,
}

impl DigitalOutput {
    pub fn new(hw: Arc<dyn DaqHardware>, board: &str, line: usize) -> Result<Self, DaqError> {
        let task = DaqTask::new(hw, board)?;
        let lines = task.physical_name(&format!("port0/line{}", line));
        task.hw()
            .create_do_chan(task.handle(), &lines, LineGrouping::ChanPerLine)?;
        Ok(Self { task })
    }

    pub fn output(&self, high: bool) -> Result<(), DaqError> {
        let written = self.task.hw().write_digital_lines(
            self.task.handle(),
            1,
            true,
            IMMEDIATE_TIMEOUT,
            &[high as u8],
        )?;
        check_count("digital output", 1, written)
    }
}

/// Single digital line, read immediately.
pub struct DigitalInput {
    task: DaqTask,
}

impl DigitalInput {
    pub fn new(hw: Arc<dyn DaqHardware>, board: &str, line: usize) -> Result<Self, DaqError> {
        let task = DaqTask::new(hw, board)?;
        let lines = task.physical_name(&format!("port0/line{}", line));
        task.hw()
            .create_di_chan(task.handle(), &lines, LineGrouping::ChanPerLine)?;
        Ok(Self { task })
    }

    pub fn input(&self) -> Result<bool, DaqError> {
        let mut state = [0u8; 1];
        let read = self
            .task
            .hw()
            .read_digital_lines(self.task.handle(), IMMEDIATE_TIMEOUT, &mut state)?;
        check_count("digital input", 1, read)?;
        Ok(state[0] == 1)
    }
}

/// Finite analog acquisition timed off the onboard clock.
pub struct AnalogInput {
    task: DaqTask,
    channels: usize,
    samples: usize,
    min_val: f64,
    max_val: f64,
}

impl AnalogInput {
    pub fn new(hw: Arc<dyn DaqHardware>, board: &str, channel: usize) -> Result<Self, DaqError> {
        let mut ai = Self {
            task: DaqTask::new(hw, board)?,
            channels: 0,
            samples: 0,
            min_val: DEFAULT_MIN_VOLTAGE,
            max_val: DEFAULT_MAX_VOLTAGE,
        };
        ai.add_channel(channel)?;
        Ok(ai)
    }

    pub fn add_channel(&mut self, channel: usize) -> Result<(), DaqError> {
        let physical = self.task.physical_name(&format!("ai{}", channel));
        self.task.hw().create_ai_voltage_chan(
            self.task.handle(),
            &physical,
            TerminalConfig::Rse,
            self.min_val,
            self.max_val,
        )?;
        self.channels += 1;
        Ok(())
    }

    pub fn configure_acquisition(&mut self, samples: usize, sample_rate: f64) -> Result<(), DaqError> {
        self.task.hw().cfg_samp_clk_timing(
            self.task.handle(),
            "",
            sample_rate,
            Edge::Rising,
            SampleMode::Finite,
            samples as u64,
        )?;
        self.samples = samples;
        Ok(())
    }

    /// Blocks until the configured number of samples per channel is acquired.
    /// Data is returned channel-major.
    pub fn get_data(&self) -> Result<Vec<f64>, DaqError> {
        let mut data = vec![0.0; self.samples * self.channels];
        let read = self.task.hw().read_analog_f64(
            self.task.handle(),
            self.samples,
            IMMEDIATE_TIMEOUT,
            &mut data,
        )?;
        check_count("get_data", self.samples, read)?;
        Ok(data)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::error::DaqError;
    use crate::hardware::{DaqHardware, Edge, SampleMode};
    use crate::sim::{DaqCall, SimulatedDaq};
    use crate::tasks::*;
    use crate::waveform::Waveform;

    fn sim() -> (Arc<SimulatedDaq>, Arc<dyn DaqHardware>) {
        let sim = Arc::new(SimulatedDaq::with_boards(&[("Dev1", "PCI-6722"), ("Dev2", "PCIe-6353")]));
        let hw: Arc<dyn DaqHardware> = sim.clone();
        (sim, hw)
    }

    #[test]
    fn board_lookup_by_product_or_name() {
        let (_sim, hw) = sim();
        assert_eq!(board_device(hw.as_ref(), "PCIe-6353").unwrap(), "Dev2");
        assert_eq!(board_device(hw.as_ref(), "Dev1").unwrap(), "Dev1");
        assert_eq!(
            board_device(hw.as_ref(), "PCI-MIO-16E-4").unwrap_err(),
            DaqError::BoardNotFound("PCI-MIO-16E-4".to_string())
        );
    }

    #[test]
    fn voltage_output_writes_one_sample() {
        let (sim, hw) = sim();
        let ao = VoltageOutput::new(hw, "PCI-6722", 3).unwrap();
        ao.output_voltage(1.5).unwrap();
        ao.clear_task().unwrap();

        let calls = sim.calls();
        assert!(calls.iter().any(|call| matches!(call,
            DaqCall::CreateAoVoltageChan { physical_channel, .. } if physical_channel == "Dev1/ao3")));
        assert!(calls.iter().any(|call| matches!(call,
            DaqCall::WriteAnalogF64 { samps_per_chan: 1, data, .. } if data == &vec![1.5])));
        assert_eq!(sim.live_tasks(), 0);
    }

    #[test]
    fn short_write_is_a_sample_count_mismatch() {
        let (sim, hw) = sim();
        sim.set_write_limit(Some(2));
        let mut wv = WaveformOutput::new(hw, "Dev1", 0).unwrap();
        wv.add_channel(1).unwrap();
        let waveform = Waveform::from_flat(vec![0.0; 8], 2).unwrap();
        let err = wv
            .set_waveform(&waveform, 100.0, SampleMode::Continuous, "ctr0out", Edge::Rising)
            .unwrap_err();
        assert_eq!(
            err,
            DaqError::SampleCountMismatch {
                operation: "set_waveform",
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn waveform_length_must_match_task_channels() {
        let (_sim, hw) = sim();
        let mut wv = WaveformOutput::new(hw, "Dev1", 0).unwrap();
        wv.add_channel(1).unwrap();
        wv.add_channel(2).unwrap();
        let waveform = Waveform::from_flat(vec![0.0; 8], 2).unwrap();
        let err = wv
            .set_waveform(&waveform, 100.0, SampleMode::Continuous, "", Edge::Rising)
            .unwrap_err();
        assert!(matches!(err, DaqError::Waveform(_)));
    }

    #[test]
    fn dropped_task_is_cleared() {
        let (sim, hw) = sim();
        {
            let _do = DigitalOutput::new(hw, "Dev1", 2).unwrap();
            assert_eq!(sim.live_tasks(), 1);
        }
        assert_eq!(sim.live_tasks(), 0);
    }

    #[test]
    fn digital_io_and_analog_input() {
        let (sim, hw) = sim();
        sim.set_digital_input(true);
        sim.set_analog_input(0.25);

        let di = DigitalInput::new(hw.clone(), "Dev1", 4).unwrap();
        assert!(di.input().unwrap());
        di.clear_task().unwrap();

        let mut ai = AnalogInput::new(hw.clone(), "PCIe-6353", 0).unwrap();
        ai.add_channel(1).unwrap();
        ai.configure_acquisition(10, 1000.0).unwrap();
        ai.start_task().unwrap();
        let data = ai.get_data().unwrap();
        assert_eq!(data.len(), 20);
        assert!(data.iter().all(|&v| v == 0.25));
        ai.stop_task().unwrap();
        ai.clear_task().unwrap();

        let mut dig = DigitalWaveformOutput::new(hw, "Dev1").unwrap();
        dig.add_dig_channel();
        let waveform = Waveform::from_flat(vec![1.0, 0.0, 0.0, 1.0], 2).unwrap();
        dig.set_dig_waveform(&waveform, 10.0, SampleMode::Finite, "ctr0InternalOutput", Edge::Rising)
            .unwrap();
        assert!(sim.calls().iter().any(|call| matches!(call,
            DaqCall::WriteDigitalU32 { data, .. } if data == &vec![0b01, 0b10])));
    }
}
