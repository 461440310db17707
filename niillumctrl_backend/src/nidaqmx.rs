//! Minimal rust wrapper for the parts of the NI-DAQmx C library used by the
//! illumination controllers.
//!
//! ## Overview
//!
//! [`NiTask`] owns one NI-DAQmx task handle and exposes the DAQmx C-functions
//! needed for analog/digital output and input, counter pulse generation,
//! sample-clock timing and triggering. Every call goes through [`daqmx_call`],
//! which turns a negative DAQmx status into a [`DaqError::Driver`] carrying the
//! extended error message, so failures propagate with `?` instead of aborting.
//!
//! Data layouts are always `DAQmx_Val_GroupByChannel` (channel-major).
//!
//! ## Cleanup
//!
//! [`NiTask::clear`] releases the handle; a task dropped without being cleared is
//! cleared on drop.
//!
//! ## Further Reading
//!
//! [NI-DAQmx C Reference](https://www.ni.com/docs/en-US/bundle/ni-daqmx-c-api-ref/page/cdaqmx/help_file_title.html).

use std::ffi::{CStr, CString};

use tracing::warn;

use illumctrl_backend::error::DaqError;
use illumctrl_backend::hardware::{Edge, IdleState, LineGrouping, SampleMode, TerminalConfig};

type CConstStr = *const libc::c_char;
type CCharBuf = *mut libc::c_char;
type CFloat64 = libc::c_double;
type CUint32 = libc::c_uint;
type CUint64 = libc::c_ulonglong;
type CBool32 = libc::c_uint;
type CInt32 = libc::c_int;
type RawTaskHandle = *mut libc::c_void;

pub const DAQMX_VAL_RISING: CInt32 = 10280;
pub const DAQMX_VAL_FALLING: CInt32 = 10171;
pub const DAQMX_VAL_VOLTS: CInt32 = 10348;
pub const DAQMX_VAL_HZ: CInt32 = 10373;
pub const DAQMX_VAL_FINITESAMPS: CInt32 = 10178;
pub const DAQMX_VAL_CONTSAMPS: CInt32 = 10123;
pub const DAQMX_VAL_LOW: CInt32 = 10214;
pub const DAQMX_VAL_HIGH: CInt32 = 10192;
pub const DAQMX_VAL_RSE: CInt32 = 10083;
pub const DAQMX_VAL_NRSE: CInt32 = 10078;
pub const DAQMX_VAL_DIFF: CInt32 = 10106;
pub const DAQMX_VAL_PSEUDODIFF: CInt32 = 12529;
pub const DAQMX_VAL_GROUPBYCHANNEL: CBool32 = 0;
pub const DAQMX_VAL_CHANPERLINE: CInt32 = 0;
pub const DAQMX_VAL_CHANFORALLLINES: CInt32 = 1;

const NAME_BUFFER_LEN: usize = 2048;

#[link(name = "NIDAQmx")]
extern "C" {
    fn DAQmxResetDevice(name: CConstStr) -> CInt32;
    fn DAQmxGetExtendedErrorInfo(errorString: CCharBuf, bufferSize: CUint32) -> CInt32;
    fn DAQmxGetSysDevNames(data: CCharBuf, bufferSize: CUint32) -> CInt32;
    fn DAQmxGetDevProductType(device: CConstStr, data: CCharBuf, bufferSize: CUint32) -> CInt32;

    fn DAQmxCreateTask(taskName: CConstStr, taskHandle_ptr: &mut RawTaskHandle) -> CInt32;
    fn DAQmxStartTask(handle: RawTaskHandle) -> CInt32;
    fn DAQmxStopTask(handle: RawTaskHandle) -> CInt32;
    fn DAQmxClearTask(handle: RawTaskHandle) -> CInt32;
    fn DAQmxIsTaskDone(handle: RawTaskHandle, isTaskDone: *mut CBool32) -> CInt32;

    fn DAQmxCfgSampClkTiming(
        handle: RawTaskHandle,
        src: CConstStr,
        rate: CFloat64,
        activeEdge: CInt32,
        sampleMode: CInt32,
        sampsPerChan: CUint64,
    ) -> CInt32;
    fn DAQmxCfgImplicitTiming(handle: RawTaskHandle, sampleMode: CInt32, sampsPerChan: CUint64)
        -> CInt32;
    fn DAQmxSetStartTrigRetriggerable(handle: RawTaskHandle, data: CBool32) -> CInt32;
    fn DAQmxCfgDigEdgeStartTrig(
        handle: RawTaskHandle,
        triggerSource: CConstStr,
        triggerEdge: CInt32,
    ) -> CInt32;

    fn DAQmxCreateAOVoltageChan(
        handle: RawTaskHandle,
        name: CConstStr,
        assigned_name: CConstStr,
        minVal: CFloat64,
        maxVal: CFloat64,
        units: CInt32,
        customScaleName: CConstStr,
    ) -> CInt32;
    fn DAQmxCreateAIVoltageChan(
        handle: RawTaskHandle,
        name: CConstStr,
        assigned_name: CConstStr,
        terminalConfig: CInt32,
        minVal: CFloat64,
        maxVal: CFloat64,
        units: CInt32,
        customScaleName: CConstStr,
    ) -> CInt32;
    fn DAQmxCreateDOChan(
        handle: RawTaskHandle,
        lines: CConstStr,
        name: CConstStr,
        lineGrouping: CInt32,
    ) -> CInt32;
    fn DAQmxCreateDIChan(
        handle: RawTaskHandle,
        lines: CConstStr,
        name: CConstStr,
        lineGrouping: CInt32,
    ) -> CInt32;
    fn DAQmxCreateCOPulseChanFreq(
        handle: RawTaskHandle,
        counter: CConstStr,
        name: CConstStr,
        units: CInt32,
        idleState: CInt32,
        initialDelay: CFloat64,
        freq: CFloat64,
        dutyCycle: CFloat64,
    ) -> CInt32;

    fn DAQmxWriteDigitalU32(
        handle: RawTaskHandle,
        seqLen: CInt32,
        autoStart: CBool32,
        timeout: CFloat64,
        dataLayout: CBool32,
        writeArray: *const u32,
        sampsPerChanWritten: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
    fn DAQmxWriteDigitalLines(
        handle: RawTaskHandle,
        seqLen: CInt32,
        autoStart: CBool32,
        timeout: CFloat64,
        dataLayout: CBool32,
        writeArray: *const u8,
        sampsPerChanWritten: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
    fn DAQmxWriteAnalogF64(
        handle: RawTaskHandle,
        seqLen: CInt32,
        autoStart: CBool32,
        timeout: CFloat64,
        dataLayout: CBool32,
        writeArray: *const CFloat64,
        sampsPerChanWritten: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
    fn DAQmxReadAnalogF64(
        handle: RawTaskHandle,
        numSampsPerChan: CInt32,
        timeout: CFloat64,
        fillMode: CBool32,
        readArray: *mut CFloat64,
        arraySizeInSamps: CUint32,
        sampsPerChanRead: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
    fn DAQmxReadDigitalLines(
        handle: RawTaskHandle,
        numSampsPerChan: CInt32,
        timeout: CFloat64,
        fillMode: CBool32,
        readArray: *mut u8,
        arraySizeInBytes: CUint32,
        sampsPerChanRead: *mut CInt32,
        numBytesPerSamp: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
}

/// Calls a DAQmx C-function and converts a negative status into
/// [`DaqError::Driver`] with the extended error information.
pub fn daqmx_call<F: FnOnce() -> CInt32>(func: F) -> Result<(), DaqError> {
    let err_code = func();
    if err_code < 0 {
        let mut err_buff = [0 as libc::c_char; NAME_BUFFER_LEN];
        unsafe {
            DAQmxGetExtendedErrorInfo(err_buff.as_mut_ptr(), NAME_BUFFER_LEN as CUint32);
        }
        let message = unsafe { CStr::from_ptr(err_buff.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        return Err(DaqError::Driver {
            code: err_code,
            message,
        });
    }
    Ok(())
}

fn cstring(name: &str) -> Result<CString, DaqError> {
    CString::new(name).map_err(|_| DaqError::InvalidName(name.to_string()))
}

fn read_string(func: impl FnOnce(CCharBuf, CUint32) -> CInt32) -> Result<String, DaqError> {
    let mut buff = [0 as libc::c_char; NAME_BUFFER_LEN];
    daqmx_call(|| func(buff.as_mut_ptr(), NAME_BUFFER_LEN as CUint32))?;
    Ok(unsafe { CStr::from_ptr(buff.as_ptr()) }
        .to_string_lossy()
        .into_owned())
}

/// Names of all devices known to the driver
pub fn device_names() -> Result<Vec<String>, DaqError> {
    let names = read_string(|buff, len| unsafe { DAQmxGetSysDevNames(buff, len) })?;
    Ok(names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn product_type(device: &str) -> Result<String, DaqError> {
    let device_cstr = cstring(device)?;
    read_string(|buff, len| unsafe { DAQmxGetDevProductType(device_cstr.as_ptr(), buff, len) })
}

pub fn reset_ni_device(name: &str) -> Result<(), DaqError> {
    let name_cstr = cstring(name)?;
    daqmx_call(|| unsafe { DAQmxResetDevice(name_cstr.as_ptr()) })
}

fn edge_val(edge: Edge) -> CInt32 {
    match edge {
        Edge::Rising => DAQMX_VAL_RISING,
        Edge::Falling => DAQMX_VAL_FALLING,
    }
}

fn mode_val(mode: SampleMode) -> CInt32 {
    match mode {
        SampleMode::Finite => DAQMX_VAL_FINITESAMPS,
        SampleMode::Continuous => DAQMX_VAL_CONTSAMPS,
    }
}

fn grouping_val(grouping: LineGrouping) -> CInt32 {
    match grouping {
        LineGrouping::ChanPerLine => DAQMX_VAL_CHANPERLINE,
        LineGrouping::ChanForAllLines => DAQMX_VAL_CHANFORALLLINES,
    }
}

fn terminal_val(terminal: TerminalConfig) -> CInt32 {
    match terminal {
        TerminalConfig::Rse => DAQMX_VAL_RSE,
        TerminalConfig::Nrse => DAQMX_VAL_NRSE,
        TerminalConfig::Differential => DAQMX_VAL_DIFF,
        TerminalConfig::PseudoDifferential => DAQMX_VAL_PSEUDODIFF,
    }
}

fn idle_val(idle: IdleState) -> CInt32 {
    match idle {
        IdleState::Low => DAQMX_VAL_LOW,
        IdleState::High => DAQMX_VAL_HIGH,
    }
}

/// One NI-DAQmx task.
pub struct NiTask {
    handle: RawTaskHandle,
    cleared: bool,
}

// The handle is only an identifier for the driver, which is thread safe.
unsafe impl Send for NiTask {}

impl NiTask {
    pub fn new() -> Result<Self, DaqError> {
        let mut handle: RawTaskHandle = std::ptr::null_mut();
        let task_name_cstr = cstring("")?;
        daqmx_call(|| unsafe { DAQmxCreateTask(task_name_cstr.as_ptr(), &mut handle) })?;
        Ok(Self {
            handle,
            cleared: false,
        })
    }

    pub fn clear(&mut self) -> Result<(), DaqError> {
        if self.cleared {
            return Ok(());
        }
        self.cleared = true;
        daqmx_call(|| unsafe { DAQmxClearTask(self.handle) })
    }

    pub fn start(&self) -> Result<(), DaqError> {
        daqmx_call(|| unsafe { DAQmxStartTask(self.handle) })
    }

    pub fn stop(&self) -> Result<(), DaqError> {
        daqmx_call(|| unsafe { DAQmxStopTask(self.handle) })
    }

    pub fn is_done(&self) -> Result<bool, DaqError> {
        let mut done: CBool32 = 0;
        daqmx_call(|| unsafe { DAQmxIsTaskDone(self.handle, &mut done as *mut CBool32) })?;
        Ok(done != 0)
    }

    pub fn create_ao_voltage_chan(&self, name: &str, min_val: f64, max_val: f64) -> Result<(), DaqError> {
        let name_cstr = cstring(name)?;
        let assigned_name_cstr = cstring("")?;
        daqmx_call(|| unsafe {
            DAQmxCreateAOVoltageChan(
                self.handle,
                name_cstr.as_ptr(),
                assigned_name_cstr.as_ptr(),
                min_val,
                max_val,
                DAQMX_VAL_VOLTS,
                std::ptr::null(),
            )
        })
    }

    pub fn create_ai_voltage_chan(
        &self,
        name: &str,
        terminal: TerminalConfig,
        min_val: f64,
        max_val: f64,
    ) -> Result<(), DaqError> {
        let name_cstr = cstring(name)?;
        let assigned_name_cstr = cstring("")?;
        daqmx_call(|| unsafe {
            DAQmxCreateAIVoltageChan(
                self.handle,
                name_cstr.as_ptr(),
                assigned_name_cstr.as_ptr(),
                terminal_val(terminal),
                min_val,
                max_val,
                DAQMX_VAL_VOLTS,
                std::ptr::null(),
            )
        })
    }

    pub fn create_do_chan(&self, lines: &str, grouping: LineGrouping) -> Result<(), DaqError> {
        let lines_cstr = cstring(lines)?;
        let assigned_name_cstr = cstring("")?;
        daqmx_call(|| unsafe {
            DAQmxCreateDOChan(
                self.handle,
                lines_cstr.as_ptr(),
                assigned_name_cstr.as_ptr(),
                grouping_val(grouping),
            )
        })
    }

    pub fn create_di_chan(&self, lines: &str, grouping: LineGrouping) -> Result<(), DaqError> {
        let lines_cstr = cstring(lines)?;
        let assigned_name_cstr = cstring("")?;
        daqmx_call(|| unsafe {
            DAQmxCreateDIChan(
                self.handle,
                lines_cstr.as_ptr(),
                assigned_name_cstr.as_ptr(),
                grouping_val(grouping),
            )
        })
    }

    pub fn create_co_pulse_chan_freq(
        &self,
        counter: &str,
        idle_state: IdleState,
        initial_delay: f64,
        frequency: f64,
        duty_cycle: f64,
    ) -> Result<(), DaqError> {
        let counter_cstr = cstring(counter)?;
        let assigned_name_cstr = cstring("")?;
        daqmx_call(|| unsafe {
            DAQmxCreateCOPulseChanFreq(
                self.handle,
                counter_cstr.as_ptr(),
                assigned_name_cstr.as_ptr(),
                DAQMX_VAL_HZ,
                idle_val(idle_state),
                initial_delay,
                frequency,
                duty_cycle,
            )
        })
    }

    pub fn cfg_samp_clk_timing(
        &self,
        clk_src: &str,
        rate: f64,
        edge: Edge,
        mode: SampleMode,
        samps_per_chan: u64,
    ) -> Result<(), DaqError> {
        let src_cstr = cstring(clk_src)?;
        daqmx_call(|| unsafe {
            DAQmxCfgSampClkTiming(
                self.handle,
                src_cstr.as_ptr(),
                rate,
                edge_val(edge),
                mode_val(mode),
                samps_per_chan as CUint64,
            )
        })
    }

    pub fn cfg_implicit_timing(&self, mode: SampleMode, samps_per_chan: u64) -> Result<(), DaqError> {
        daqmx_call(|| unsafe {
            DAQmxCfgImplicitTiming(self.handle, mode_val(mode), samps_per_chan as CUint64)
        })
    }

    pub fn set_start_trig_retriggerable(&self, retriggerable: bool) -> Result<(), DaqError> {
        daqmx_call(|| unsafe {
            DAQmxSetStartTrigRetriggerable(self.handle, retriggerable as CBool32)
        })
    }

    pub fn cfg_dig_edge_start_trig(&self, trigger_source: &str, edge: Edge) -> Result<(), DaqError> {
        let trigger_source_cstr = cstring(trigger_source)?;
        daqmx_call(|| unsafe {
            DAQmxCfgDigEdgeStartTrig(self.handle, trigger_source_cstr.as_ptr(), edge_val(edge))
        })
    }

    pub fn write_analog_f64(
        &self,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        data: &[f64],
    ) -> Result<usize, DaqError> {
        let mut nwritten: CInt32 = 0;
        daqmx_call(|| unsafe {
            DAQmxWriteAnalogF64(
                self.handle,
                samps_per_chan as CInt32,
                auto_start as CBool32,
                timeout,
                DAQMX_VAL_GROUPBYCHANNEL,
                data.as_ptr(),
                &mut nwritten as *mut CInt32,
                std::ptr::null_mut(),
            )
        })?;
        Ok(nwritten as usize)
    }

    pub fn write_digital_u32(
        &self,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        data: &[u32],
    ) -> Result<usize, DaqError> {
        let mut nwritten: CInt32 = 0;
        daqmx_call(|| unsafe {
            DAQmxWriteDigitalU32(
                self.handle,
                samps_per_chan as CInt32,
                auto_start as CBool32,
                timeout,
                DAQMX_VAL_GROUPBYCHANNEL,
                data.as_ptr(),
                &mut nwritten as *mut CInt32,
                std::ptr::null_mut(),
            )
        })?;
        Ok(nwritten as usize)
    }

    pub fn write_digital_lines(
        &self,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        data: &[u8],
    ) -> Result<usize, DaqError> {
        let mut nwritten: CInt32 = 0;
        daqmx_call(|| unsafe {
            DAQmxWriteDigitalLines(
                self.handle,
                samps_per_chan as CInt32,
                auto_start as CBool32,
                timeout,
                DAQMX_VAL_GROUPBYCHANNEL,
                data.as_ptr(),
                &mut nwritten as *mut CInt32,
                std::ptr::null_mut(),
            )
        })?;
        Ok(nwritten as usize)
    }

    pub fn read_analog_f64(
        &self,
        samps_per_chan: usize,
        timeout: f64,
        buffer: &mut [f64],
    ) -> Result<usize, DaqError> {
        let mut nread: CInt32 = 0;
        daqmx_call(|| unsafe {
            DAQmxReadAnalogF64(
                self.handle,
                samps_per_chan as CInt32,
                timeout,
                DAQMX_VAL_GROUPBYCHANNEL,
                buffer.as_mut_ptr(),
                buffer.len() as CUint32,
                &mut nread as *mut CInt32,
                std::ptr::null_mut(),
            )
        })?;
        Ok(nread as usize)
    }

    /// Reads all available samples (`numSampsPerChan = -1`)
    pub fn read_digital_lines(&self, timeout: f64, buffer: &mut [u8]) -> Result<usize, DaqError> {
        let mut nread: CInt32 = 0;
        let mut bytes_per_samp: CInt32 = 0;
        daqmx_call(|| unsafe {
            DAQmxReadDigitalLines(
                self.handle,
                -1,
                timeout,
                DAQMX_VAL_GROUPBYCHANNEL,
                buffer.as_mut_ptr(),
                buffer.len() as CUint32,
                &mut nread as *mut CInt32,
                &mut bytes_per_samp as *mut CInt32,
                std::ptr::null_mut(),
            )
        })?;
        Ok(nread as usize)
    }
}

impl Drop for NiTask {
    fn drop(&mut self) {
        if let Err(err) = self.clear() {
            warn!("Failed to clear NI-DAQmx task on drop: {}", err);
        }
    }
}
