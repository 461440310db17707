//! [`DaqHardware`] implementation on top of NI-DAQmx.
//!
//! [`NiDaq`] keeps every live [`NiTask`] in a table keyed by [`TaskHandle`]. Each
//! task sits behind its own lock, so a long blocking write on one task (a
//! waveform upload) does not hold up single-sample writes on another.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use illumctrl_backend::error::DaqError;
use illumctrl_backend::hardware::{
    DaqHardware, Edge, IdleState, LineGrouping, SampleMode, TaskHandle, TerminalConfig,
};

use crate::nidaqmx::{self, NiTask};

#[derive(Default)]
pub struct NiDaq {
    tasks: Mutex<IndexMap<TaskHandle, Arc<Mutex<NiTask>>>>,
    next_handle: AtomicU64,
}

impl NiDaq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets a device, aborting every task running on it
    pub fn reset_device(&self, device: &str) -> Result<(), DaqError> {
        nidaqmx::reset_ni_device(device)
    }

    pub fn live_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    fn task(&self, handle: TaskHandle) -> Result<Arc<Mutex<NiTask>>, DaqError> {
        self.tasks
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(DaqError::UnknownTask(handle))
    }

    fn with_task<R>(
        &self,
        handle: TaskHandle,
        f: impl FnOnce(&NiTask) -> Result<R, DaqError>,
    ) -> Result<R, DaqError> {
        let task = self.task(handle)?;
        let task = task.lock();
        f(&task)
    }
}

impl DaqHardware for NiDaq {
    fn device_names(&self) -> Result<Vec<String>, DaqError> {
        nidaqmx::device_names()
    }

    fn product_type(&self, device: &str) -> Result<String, DaqError> {
        nidaqmx::product_type(device)
    }

    fn create_task(&self) -> Result<TaskHandle, DaqError> {
        let task = NiTask::new()?;
        let handle = TaskHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.tasks.lock().insert(handle, Arc::new(Mutex::new(task)));
        debug!(%handle, "created NI-DAQmx task");
        Ok(handle)
    }

    fn start_task(&self, task: TaskHandle) -> Result<(), DaqError> {
        self.with_task(task, |t| t.start())
    }

    fn stop_task(&self, task: TaskHandle) -> Result<(), DaqError> {
        self.with_task(task, |t| t.stop())
    }

    fn clear_task(&self, task: TaskHandle) -> Result<(), DaqError> {
        let removed = self
            .tasks
            .lock()
            .shift_remove(&task)
            .ok_or(DaqError::UnknownTask(task))?;
        let mut removed = removed.lock();
        removed.clear()
    }

    fn is_task_done(&self, task: TaskHandle) -> Result<bool, DaqError> {
        self.with_task(task, |t| t.is_done())
    }

    fn create_ao_voltage_chan(
        &self,
        task: TaskHandle,
        physical_channel: &str,
        min_val: f64,
        max_val: f64,
    ) -> Result<(), DaqError> {
        self.with_task(task, |t| {
            t.create_ao_voltage_chan(physical_channel, min_val, max_val)
        })
    }

    fn create_ai_voltage_chan(
        &self,
        task: TaskHandle,
        physical_channel: &str,
        terminal: TerminalConfig,
        min_val: f64,
        max_val: f64,
    ) -> Result<(), DaqError> {
        self.with_task(task, |t| {
            t.create_ai_voltage_chan(physical_channel, terminal, min_val, max_val)
        })
    }

    fn create_do_chan(
        &self,
        task: TaskHandle,
        lines: &str,
        grouping: LineGrouping,
    ) -> Result<(), DaqError> {
        self.with_task(task, |t| t.create_do_chan(lines, grouping))
    }

    fn create_di_chan(
        &self,
        task: TaskHandle,
        lines: &str,
        grouping: LineGrouping,
    ) -> Result<(), DaqError> {
        self.with_task(task, |t| t.create_di_chan(lines, grouping))
    }

    fn create_co_pulse_chan_freq(
        &self,
        task: TaskHandle,
        counter: &str,
        idle_state: IdleState,
        initial_delay: f64,
        frequency: f64,
        duty_cycle: f64,
    ) -> Result<(), DaqError> {
        self.with_task(task, |t| {
            t.create_co_pulse_chan_freq(counter, idle_state, initial_delay, frequency, duty_cycle)
        })
    }

    fn cfg_samp_clk_timing(
        &self,
        task: TaskHandle,
        source: &str,
        rate: f64,
        edge: Edge,
        mode: SampleMode,
        samps_per_chan: u64,
    ) -> Result<(), DaqError> {
        self.with_task(task, |t| {
            t.cfg_samp_clk_timing(source, rate, edge, mode, samps_per_chan)
        })
    }

    fn cfg_implicit_timing(
        &self,
        task: TaskHandle,
        mode: SampleMode,
        samps_per_chan: u64,
    ) -> Result<(), DaqError> {
        self.with_task(task, |t| t.cfg_implicit_timing(mode, samps_per_chan))
    }

    fn set_start_trig_retriggerable(
        &self,
        task: TaskHandle,
        retriggerable: bool,
    ) -> Result<(), DaqError> {
        self.with_task(task, |t| t.set_start_trig_retriggerable(retriggerable))
    }

    fn cfg_dig_edge_start_trig(
        &self,
        task: TaskHandle,
        source: &str,
        edge: Edge,
    ) -> Result<(), DaqError> {
        self.with_task(task, |t| t.cfg_dig_edge_start_trig(source, edge))
    }

    fn write_analog_f64(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        data: &[f64],
    ) -> Result<usize, DaqError> {
        self.with_task(task, |t| {
            t.write_analog_f64(samps_per_chan, auto_start, timeout, data)
        })
    }

    fn write_digital_u32(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        data: &[u32],
    ) -> Result<usize, DaqError> {
        self.with_task(task, |t| {
            t.write_digital_u32(samps_per_chan, auto_start, timeout, data)
        })
    }

    fn write_digital_lines(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        data: &[u8],
    ) -> Result<usize, DaqError> {
        self.with_task(task, |t| {
            t.write_digital_lines(samps_per_chan, auto_start, timeout, data)
        })
    }

    fn read_analog_f64(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        timeout: f64,
        buffer: &mut [f64],
    ) -> Result<usize, DaqError> {
        self.with_task(task, |t| t.read_analog_f64(samps_per_chan, timeout, buffer))
    }

    fn read_digital_lines(
        &self,
        task: TaskHandle,
        timeout: f64,
        buffer: &mut [u8],
    ) -> Result<usize, DaqError> {
        self.with_task(task, |t| t.read_digital_lines(timeout, buffer))
    }
}
