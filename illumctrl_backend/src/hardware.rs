//! The hardware I/O capability used by every controller in this crate.
//!
//! [`DaqHardware`] is a thin, handle-based mirror of the parts of the NI-DAQmx C API
//! that the illumination controllers need: task lifecycle, channel creation,
//! timing and triggering, and single-shot or waveform reads/writes. It is object
//! safe so that controllers receive an `Arc<dyn DaqHardware>` at construction
//! instead of looking the driver up globally.
//!
//! Two implementations exist:
//! - `NiDaq` in the `niillumctrl_backend` crate, backed by the vendor library;
//! - [`SimulatedDaq`](crate::sim::SimulatedDaq), which records and validates calls.
//!
//! All multi-channel data is laid out channel-major (all samples of channel 0,
//! then all samples of channel 1, ...), matching `DAQmx_Val_GroupByChannel`.

use std::fmt;

use crate::error::DaqError;

/// Opaque identifier for one configured task on a [`DaqHardware`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Active clock or trigger edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// Sample generation mode of a timed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    Finite,
    Continuous,
}

/// How digital lines are grouped into virtual channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineGrouping {
    ChanPerLine,
    ChanForAllLines,
}

/// Resting level of a counter output between pulses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleState {
    Low,
    High,
}

/// Analog input terminal configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalConfig {
    Rse,
    Nrse,
    Differential,
    PseudoDifferential,
}

/// Hardware I/O capability. Every call either succeeds or surfaces the vendor
/// status as a [`DaqError`]; implementations never retry.
pub trait DaqHardware: Send + Sync {
    /// Names of all devices attached to the system, e.g. `["Dev1", "Dev2"]`
    fn device_names(&self) -> Result<Vec<String>, DaqError>;
    /// Product type of a device, e.g. `"PCI-6722"`
    fn product_type(&self, device: &str) -> Result<String, DaqError>;

    // Task lifecycle
    fn create_task(&self) -> Result<TaskHandle, DaqError>;
    fn start_task(&self, task: TaskHandle) -> Result<(), DaqError>;
    fn stop_task(&self, task: TaskHandle) -> Result<(), DaqError>;
    fn clear_task(&self, task: TaskHandle) -> Result<(), DaqError>;
    fn is_task_done(&self, task: TaskHandle) -> Result<bool, DaqError>;

    // Channel creation
    fn create_ao_voltage_chan(
        &self,
        task: TaskHandle,
        physical_channel: &str,
        min_val: f64,
        max_val: f64,
    ) -> Result<(), DaqError>;
    fn create_ai_voltage_chan(
        &self,
        task: TaskHandle,
        physical_channel: &str,
        terminal: TerminalConfig,
        min_val: f64,
        max_val: f64,
    ) -> Result<(), DaqError>;
    fn create_do_chan(
        &self,
        task: TaskHandle,
        lines: &str,
        grouping: LineGrouping,
    ) -> Result<(), DaqError>;
    fn create_di_chan(
        &self,
        task: TaskHandle,
        lines: &str,
        grouping: LineGrouping,
    ) -> Result<(), DaqError>;
    /// Pulse train channel specified by frequency (Hz) and duty cycle
    fn create_co_pulse_chan_freq(
        &self,
        task: TaskHandle,
        counter: &str,
        idle_state: IdleState,
        initial_delay: f64,
        frequency: f64,
        duty_cycle: f64,
    ) -> Result<(), DaqError>;

    // Timing and triggering
    fn cfg_samp_clk_timing(
        &self,
        task: TaskHandle,
        source: &str,
        rate: f64,
        edge: Edge,
        mode: SampleMode,
        samps_per_chan: u64,
    ) -> Result<(), DaqError>;
    fn cfg_implicit_timing(
        &self,
        task: TaskHandle,
        mode: SampleMode,
        samps_per_chan: u64,
    ) -> Result<(), DaqError>;
    fn set_start_trig_retriggerable(
        &self,
        task: TaskHandle,
        retriggerable: bool,
    ) -> Result<(), DaqError>;
    fn cfg_dig_edge_start_trig(
        &self,
        task: TaskHandle,
        source: &str,
        edge: Edge,
    ) -> Result<(), DaqError>;

    // Data transfer. Writes and reads return the number of samples per channel
    // actually transferred.
    fn write_analog_f64(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        data: &[f64],
    ) -> Result<usize, DaqError>;
    fn write_digital_u32(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        data: &[u32],
    ) -> Result<usize, DaqError>;
    fn write_digital_lines(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        data: &[u8],
    ) -> Result<usize, DaqError>;
    fn read_analog_f64(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        timeout: f64,
        buffer: &mut [f64],
    ) -> Result<usize, DaqError>;
    /// Reads all available samples of every line in the task
    fn read_digital_lines(
        &self,
        task: TaskHandle,
        timeout: f64,
        buffer: &mut [u8],
    ) -> Result<usize, DaqError>;
}
