//! Simulated DAQ hardware.
//!
//! [`SimulatedDaq`] implements [`DaqHardware`] without any board attached. It keeps
//! track of live tasks and their channel counts, validates physical channel and
//! terminal names against the simulated boards, records every call in order, and
//! can be told to fail specific operations or to transfer fewer samples than
//! requested. It backs dry runs of the acquisition software and the test suite.

use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;
use regex::Regex;
use tracing::trace;

use crate::error::DaqError;
use crate::hardware::{
    DaqHardware, Edge, IdleState, LineGrouping, SampleMode, TaskHandle, TerminalConfig,
};

/// Status code reported for injected failures
pub const SIM_FAILURE_CODE: i32 = -200_999;
/// Same code NI-DAQmx returns for a non-existent physical channel
pub const INVALID_CHANNEL_CODE: i32 = -200_170;
/// Same code NI-DAQmx returns when the write buffer is smaller than announced
pub const BUFFER_TOO_SMALL_CODE: i32 = -200_524;

/// Operation kinds, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaqOp {
    CreateTask,
    StartTask,
    StopTask,
    ClearTask,
    CreateChannel,
    CfgTiming,
    CfgTrigger,
    Write,
    Read,
}

/// One recorded hardware call
#[derive(Debug, Clone, PartialEq)]
pub enum DaqCall {
    CreateTask(TaskHandle),
    StartTask(TaskHandle),
    StopTask(TaskHandle),
    ClearTask(TaskHandle),
    CreateAoVoltageChan {
        task: TaskHandle,
        physical_channel: String,
        min_val: f64,
        max_val: f64,
    },
    CreateAiVoltageChan {
        task: TaskHandle,
        physical_channel: String,
        terminal: TerminalConfig,
    },
    CreateDoChan {
        task: TaskHandle,
        lines: String,
        grouping: LineGrouping,
    },
    CreateDiChan {
        task: TaskHandle,
        lines: String,
        grouping: LineGrouping,
    },
    CreateCoPulseChanFreq {
        task: TaskHandle,
        counter: String,
        idle_state: IdleState,
        initial_delay: f64,
        frequency: f64,
        duty_cycle: f64,
    },
    CfgSampClkTiming {
        task: TaskHandle,
        source: String,
        rate: f64,
        edge: Edge,
        mode: SampleMode,
        samps_per_chan: u64,
    },
    CfgImplicitTiming {
        task: TaskHandle,
        mode: SampleMode,
        samps_per_chan: u64,
    },
    SetStartTrigRetriggerable {
        task: TaskHandle,
        retriggerable: bool,
    },
    CfgDigEdgeStartTrig {
        task: TaskHandle,
        source: String,
        edge: Edge,
    },
    WriteAnalogF64 {
        task: TaskHandle,
        samps_per_chan: usize,
        auto_start: bool,
        data: Vec<f64>,
    },
    WriteDigitalU32 {
        task: TaskHandle,
        samps_per_chan: usize,
        data: Vec<u32>,
    },
    WriteDigitalLines {
        task: TaskHandle,
        samps_per_chan: usize,
        data: Vec<u8>,
    },
    ReadAnalogF64 {
        task: TaskHandle,
        samps_per_chan: usize,
    },
    ReadDigitalLines {
        task: TaskHandle,
    },
}

#[derive(Debug, Default)]
struct SimTask {
    channels: usize,
    running: bool,
}

struct SimState {
    tasks: IndexMap<TaskHandle, SimTask>,
    calls: Vec<DaqCall>,
    failing: Vec<DaqOp>,
    write_limit: Option<usize>,
    analog_input: f64,
    digital_input: bool,
}

pub struct SimulatedDaq {
    boards: IndexMap<String, String>,
    name_re: Regex,
    next_handle: AtomicU64,
    state: Mutex<SimState>,
}

impl Default for SimulatedDaq {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDaq {
    /// A single `PCI-6722` board named `Dev1`
    pub fn new() -> Self {
        Self::with_boards(&[("Dev1", "PCI-6722")])
    }

    /// Simulates the given `(device name, product type)` pairs
    pub fn with_boards(boards: &[(&str, &str)]) -> Self {
        Self {
            boards: boards
                .iter()
                .map(|(name, product)| (name.to_string(), product.to_string()))
                .collect(),
            name_re: Regex::new(
                r"^/?(?P<device>[^/]+)/(?:(?:ao|ai|ctr|PFI)\d+(?:out|InternalOutput)?|port\d+(?:/line\d+)?)$",
            )
            .expect("channel name pattern is valid"),
            next_handle: AtomicU64::new(1),
            state: Mutex::new(SimState {
                tasks: IndexMap::new(),
                calls: Vec::new(),
                failing: Vec::new(),
                write_limit: None,
                analog_input: 0.0,
                digital_input: false,
            }),
        }
    }

    /// Every call recorded so far, in order
    pub fn calls(&self) -> Vec<DaqCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of created tasks that have not been cleared
    pub fn live_tasks(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_running(&self, task: TaskHandle) -> bool {
        self.state
            .lock()
            .tasks
            .get(&task)
            .map_or(false, |t| t.running)
    }

    /// Makes every subsequent call of kind `op` fail with [`SIM_FAILURE_CODE`]
    pub fn fail_on(&self, op: DaqOp) {
        self.state.lock().failing.push(op);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing.clear();
    }

    /// Caps the number of samples per channel any write reports as transferred
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.state.lock().write_limit = limit;
    }

    /// Value returned for every analog input sample
    pub fn set_analog_input(&self, value: f64) {
        self.state.lock().analog_input = value;
    }

    pub fn set_digital_input(&self, high: bool) {
        self.state.lock().digital_input = high;
    }

    fn check_name(&self, name: &str) -> Result<(), DaqError> {
        let known = self
            .name_re
            .captures(name)
            .and_then(|caps| caps.name("device"))
            .map_or(false, |dev| self.boards.contains_key(dev.as_str()));
        if known {
            Ok(())
        } else {
            Err(DaqError::Driver {
                code: INVALID_CHANNEL_CODE,
                message: format!("Physical channel or terminal {} does not exist", name),
            })
        }
    }

    /// Runs one simulated call: fails injected operations, rejects unknown
    /// handles, then records the call and applies `f` to the task state.
    fn task_call<R>(
        &self,
        op: DaqOp,
        task: TaskHandle,
        call: DaqCall,
        f: impl FnOnce(&mut SimTask, &SimState) -> Result<R, DaqError>,
    ) -> Result<R, DaqError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.failing.contains(&op) {
            return Err(DaqError::Driver {
                code: SIM_FAILURE_CODE,
                message: format!("Simulated failure of {:?}", op),
            });
        }
        trace!(?call, "simulated DAQ call");
        let mut sim_task = state
            .tasks
            .swap_remove(&task)
            .ok_or(DaqError::UnknownTask(task))?;
        let result = f(&mut sim_task, state);
        state.tasks.insert(task, sim_task);
        state.calls.push(call);
        result
    }

    fn transferred(state: &SimState, samps_per_chan: usize) -> usize {
        state
            .write_limit
            .map_or(samps_per_chan, |limit| samps_per_chan.min(limit))
    }

    fn check_buffer(len: usize, samps_per_chan: usize, channels: usize) -> Result<(), DaqError> {
        if len < samps_per_chan * channels {
            return Err(DaqError::Driver {
                code: BUFFER_TOO_SMALL_CODE,
                message: format!(
                    "Buffer holds {} samples, {} channels x {} samples requested",
                    len, channels, samps_per_chan
                ),
            });
        }
        Ok(())
    }
}

impl DaqHardware for SimulatedDaq {
    fn device_names(&self) -> Result<Vec<String>, DaqError> {
        Ok(self.boards.keys().cloned().collect())
    }

    fn product_type(&self, device: &str) -> Result<String, DaqError> {
        self.boards.get(device).cloned().ok_or(DaqError::Driver {
            code: INVALID_CHANNEL_CODE,
            message: format!("Device {} does not exist", device),
        })
    }

    fn create_task(&self) -> Result<TaskHandle, DaqError> {
        let mut state = self.state.lock();
        if state.failing.contains(&DaqOp::CreateTask) {
            return Err(DaqError::Driver {
                code: SIM_FAILURE_CODE,
                message: "Simulated failure of CreateTask".to_string(),
            });
        }
        let handle = TaskHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        state.tasks.insert(handle, SimTask::default());
        state.calls.push(DaqCall::CreateTask(handle));
        Ok(handle)
    }

    fn start_task(&self, task: TaskHandle) -> Result<(), DaqError> {
        self.task_call(DaqOp::StartTask, task, DaqCall::StartTask(task), |t, _| {
            t.running = true;
            Ok(())
        })
    }

    fn stop_task(&self, task: TaskHandle) -> Result<(), DaqError> {
        self.task_call(DaqOp::StopTask, task, DaqCall::StopTask(task), |t, _| {
            t.running = false;
            Ok(())
        })
    }

    fn clear_task(&self, task: TaskHandle) -> Result<(), DaqError> {
        self.task_call(DaqOp::ClearTask, task, DaqCall::ClearTask(task), |_, _| Ok(()))?;
        self.state.lock().tasks.shift_remove(&task);
        Ok(())
    }

    fn is_task_done(&self, task: TaskHandle) -> Result<bool, DaqError> {
        let state = self.state.lock();
        state
            .tasks
            .get(&task)
            .map(|t| !t.running)
            .ok_or(DaqError::UnknownTask(task))
    }

    fn create_ao_voltage_chan(
        &self,
        task: TaskHandle,
        physical_channel: &str,
        min_val: f64,
        max_val: f64,
    ) -> Result<(), DaqError> {
        self.check_name(physical_channel)?;
        let call = DaqCall::CreateAoVoltageChan {
            task,
            physical_channel: physical_channel.to_string(),
            min_val,
            max_val,
        };
        self.task_call(DaqOp::CreateChannel, task, call, |t, _| {
            t.channels += 1;
            Ok(())
        })
    }

    fn create_ai_voltage_chan(
        &self,
        task: TaskHandle,
        physical_channel: &str,
        terminal: TerminalConfig,
        _min_val: f64,
        _max_val: f64,
    ) -> Result<(), DaqError> {
        self.check_name(physical_channel)?;
        let call = DaqCall::CreateAiVoltageChan {
            task,
            physical_channel: physical_channel.to_string(),
            terminal,
        };
        self.task_call(DaqOp::CreateChannel, task, call, |t, _| {
            t.channels += 1;
            Ok(())
        })
    }

    fn create_do_chan(
        &self,
        task: TaskHandle,
        lines: &str,
        grouping: LineGrouping,
    ) -> Result<(), DaqError> {
        self.check_name(lines)?;
        let call = DaqCall::CreateDoChan {
            task,
            lines: lines.to_string(),
            grouping,
        };
        self.task_call(DaqOp::CreateChannel, task, call, |t, _| {
            t.channels += 1;
            Ok(())
        })
    }

    fn create_di_chan(
        &self,
        task: TaskHandle,
        lines: &str,
        grouping: LineGrouping,
    ) -> Result<(), DaqError> {
        self.check_name(lines)?;
        let call = DaqCall::CreateDiChan {
            task,
            lines: lines.to_string(),
            grouping,
        };
        self.task_call(DaqOp::CreateChannel, task, call, |t, _| {
            t.channels += 1;
            Ok(())
        })
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
        self.check_name(counter)?;
        let call = DaqCall::CreateCoPulseChanFreq {
            task,
            counter: counter.to_string(),
            idle_state,
            initial_delay,
            frequency,
            duty_cycle,
        };
        self.task_call(DaqOp::CreateChannel, task, call, |t, _| {
            t.channels += 1;
            Ok(())
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
        if !source.is_empty() {
            self.check_name(source)?;
        }
        let call = DaqCall::CfgSampClkTiming {
            task,
            source: source.to_string(),
            rate,
            edge,
            mode,
            samps_per_chan,
        };
        self.task_call(DaqOp::CfgTiming, task, call, |_, _| Ok(()))
    }

    fn cfg_implicit_timing(
        &self,
        task: TaskHandle,
        mode: SampleMode,
        samps_per_chan: u64,
    ) -> Result<(), DaqError> {
        let call = DaqCall::CfgImplicitTiming {
            task,
            mode,
            samps_per_chan,
        };
        self.task_call(DaqOp::CfgTiming, task, call, |_, _| Ok(()))
    }

    fn set_start_trig_retriggerable(
        &self,
        task: TaskHandle,
        retriggerable: bool,
    ) -> Result<(), DaqError> {
        let call = DaqCall::SetStartTrigRetriggerable {
            task,
            retriggerable,
        };
        self.task_call(DaqOp::CfgTrigger, task, call, |_, _| Ok(()))
    }

    fn cfg_dig_edge_start_trig(
        &self,
        task: TaskHandle,
        source: &str,
        edge: Edge,
    ) -> Result<(), DaqError> {
        self.check_name(source)?;
        let call = DaqCall::CfgDigEdgeStartTrig {
            task,
            source: source.to_string(),
            edge,
        };
        self.task_call(DaqOp::CfgTrigger, task, call, |_, _| Ok(()))
    }

    fn write_analog_f64(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        auto_start: bool,
        _timeout: f64,
        data: &[f64],
    ) -> Result<usize, DaqError> {
        let call = DaqCall::WriteAnalogF64 {
            task,
            samps_per_chan,
            auto_start,
            data: data.to_vec(),
        };
        self.task_call(DaqOp::Write, task, call, |t, state| {
            Self::check_buffer(data.len(), samps_per_chan, t.channels)?;
            Ok(Self::transferred(state, samps_per_chan))
        })
    }

    fn write_digital_u32(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        _auto_start: bool,
        _timeout: f64,
        data: &[u32],
    ) -> Result<usize, DaqError> {
        let call = DaqCall::WriteDigitalU32 {
            task,
            samps_per_chan,
            data: data.to_vec(),
        };
        self.task_call(DaqOp::Write, task, call, |t, state| {
            Self::check_buffer(data.len(), samps_per_chan, t.channels)?;
            Ok(Self::transferred(state, samps_per_chan))
        })
    }

    fn write_digital_lines(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        _auto_start: bool,
        _timeout: f64,
        data: &[u8],
    ) -> Result<usize, DaqError> {
        let call = DaqCall::WriteDigitalLines {
            task,
            samps_per_chan,
            data: data.to_vec(),
        };
        self.task_call(DaqOp::Write, task, call, |t, state| {
            Self::check_buffer(data.len(), samps_per_chan, t.channels)?;
            Ok(Self::transferred(state, samps_per_chan))
        })
    }

    fn read_analog_f64(
        &self,
        task: TaskHandle,
        samps_per_chan: usize,
        _timeout: f64,
        buffer: &mut [f64],
    ) -> Result<usize, DaqError> {
        let call = DaqCall::ReadAnalogF64 {
            task,
            samps_per_chan,
        };
        self.task_call(DaqOp::Read, task, call, |t, state| {
            let wanted = samps_per_chan * t.channels;
            Self::check_buffer(buffer.len(), samps_per_chan, t.channels)?;
            buffer[..wanted].fill(state.analog_input);
            Ok(samps_per_chan)
        })
    }

    fn read_digital_lines(
        &self,
        task: TaskHandle,
        _timeout: f64,
        buffer: &mut [u8],
    ) -> Result<usize, DaqError> {
        let call = DaqCall::ReadDigitalLines { task };
        self.task_call(DaqOp::Read, task, call, |t, state| {
            Self::check_buffer(buffer.len(), 1, t.channels)?;
            buffer[..t.channels].fill(state.digital_input as u8);
            Ok(1)
        })
    }
}

#[cfg(test)]
mod test {
    use crate::error::DaqError;
    use crate::hardware::DaqHardware;
    use crate::sim::*;

    #[test]
    fn rejects_unknown_devices_and_handles() {
        let sim = SimulatedDaq::new();
        let task = sim.create_task().unwrap();
        assert!(sim.create_ao_voltage_chan(task, "Dev1/ao0", -10., 10.).is_ok());
        assert!(matches!(
            sim.create_ao_voltage_chan(task, "Dev7/ao0", -10., 10.),
            Err(DaqError::Driver { code: INVALID_CHANNEL_CODE, .. })
        ));
        assert!(matches!(
            sim.create_ao_voltage_chan(task, "Dev1/xy0", -10., 10.),
            Err(DaqError::Driver { code: INVALID_CHANNEL_CODE, .. })
        ));
        sim.clear_task(task).unwrap();
        assert_eq!(sim.start_task(task), Err(DaqError::UnknownTask(task)));
    }

    #[test]
    fn injected_failures() {
        let sim = SimulatedDaq::new();
        let task = sim.create_task().unwrap();
        sim.fail_on(DaqOp::StartTask);
        assert!(matches!(
            sim.start_task(task),
            Err(DaqError::Driver { code: SIM_FAILURE_CODE, .. })
        ));
        sim.clear_failures();
        sim.start_task(task).unwrap();
        assert!(sim.is_running(task));
        assert!(!sim.is_task_done(task).unwrap());
    }

    #[test]
    fn write_buffer_must_cover_all_channels() {
        let sim = SimulatedDaq::new();
        let task = sim.create_task().unwrap();
        sim.create_ao_voltage_chan(task, "Dev1/ao0", -10., 10.).unwrap();
        sim.create_ao_voltage_chan(task, "Dev1/ao1", -10., 10.).unwrap();
        assert!(matches!(
            sim.write_analog_f64(task, 3, false, -1., &[0.0; 5]),
            Err(DaqError::Driver { code: BUFFER_TOO_SMALL_CODE, .. })
        ));
        assert_eq!(sim.write_analog_f64(task, 3, false, -1., &[0.0; 6]), Ok(3));
    }
}
