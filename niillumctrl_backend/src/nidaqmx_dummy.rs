//! Dummy of the NI-DAQmx wrapper, compiled when the `nidaqmx` feature is off.
//!
//! Exposes the same functions and [`NiTask`] methods as the real wrapper without
//! linking the vendor library. A single device `Dev1` is reported; every call
//! succeeds, writes report all samples as written, reads return zeros.

use tracing::trace;

use illumctrl_backend::error::DaqError;
use illumctrl_backend::hardware::{Edge, IdleState, LineGrouping, SampleMode, TerminalConfig};

pub const DUMMY_DEVICE: &str = "Dev1";
pub const DUMMY_PRODUCT: &str = "Dummy";

pub fn device_names() -> Result<Vec<String>, DaqError> {
    Ok(vec![DUMMY_DEVICE.to_string()])
}

pub fn product_type(device: &str) -> Result<String, DaqError> {
    if device == DUMMY_DEVICE {
        Ok(DUMMY_PRODUCT.to_string())
    } else {
        Err(DaqError::Driver {
            code: -200220,
            message: format!("Device identifier is invalid: {}", device),
        })
    }
}

pub fn reset_ni_device(name: &str) -> Result<(), DaqError> {
    trace!(name, "dummy reset");
    Ok(())
}

pub struct NiTask {
    cleared: bool,
}

impl NiTask {
    pub fn new() -> Result<Self, DaqError> {
        Ok(Self { cleared: false })
    }

    pub fn clear(&mut self) -> Result<(), DaqError> {
        self.cleared = true;
        Ok(())
    }

    pub fn start(&self) -> Result<(), DaqError> {
        Ok(())
    }

    pub fn stop(&self) -> Result<(), DaqError> {
        Ok(())
    }

    pub fn is_done(&self) -> Result<bool, DaqError> {
        Ok(true)
    }

    pub fn create_ao_voltage_chan(&self, name: &str, _min_val: f64, _max_val: f64) -> Result<(), DaqError> {
        trace!(name, "dummy AO channel");
        Ok(())
    }

    pub fn create_ai_voltage_chan(
        &self,
        name: &str,
        _terminal: TerminalConfig,
        _min_val: f64,
        _max_val: f64,
    ) -> Result<(), DaqError> {
        trace!(name, "dummy AI channel");
        Ok(())
    }

    pub fn create_do_chan(&self, lines: &str, _grouping: LineGrouping) -> Result<(), DaqError> {
        trace!(lines, "dummy DO channel");
        Ok(())
    }

    pub fn create_di_chan(&self, lines: &str, _grouping: LineGrouping) -> Result<(), DaqError> {
        trace!(lines, "dummy DI channel");
        Ok(())
    }

    pub fn create_co_pulse_chan_freq(
        &self,
        counter: &str,
        _idle_state: IdleState,
        _initial_delay: f64,
        frequency: f64,
        _duty_cycle: f64,
    ) -> Result<(), DaqError> {
        trace!(counter, frequency, "dummy CO channel");
        Ok(())
    }

    pub fn cfg_samp_clk_timing(
        &self,
        _clk_src: &str,
        _rate: f64,
        _edge: Edge,
        _mode: SampleMode,
        _samps_per_chan: u64,
    ) -> Result<(), DaqError> {
        Ok(())
    }

    pub fn cfg_implicit_timing(&self, _mode: SampleMode, _samps_per_chan: u64) -> Result<(), DaqError> {
        Ok(())
    }

    pub fn set_start_trig_retriggerable(&self, _retriggerable: bool) -> Result<(), DaqError> {
        Ok(())
    }

    pub fn cfg_dig_edge_start_trig(&self, _trigger_source: &str, _edge: Edge) -> Result<(), DaqError> {
        Ok(())
    }

    pub fn write_analog_f64(
        &self,
        samps_per_chan: usize,
        _auto_start: bool,
        _timeout: f64,
        _data: &[f64],
    ) -> Result<usize, DaqError> {
        Ok(samps_per_chan)
    }

    pub fn write_digital_u32(
        &self,
        samps_per_chan: usize,
        _auto_start: bool,
        _timeout: f64,
        _data: &[u32],
    ) -> Result<usize, DaqError> {
        Ok(samps_per_chan)
    }

    pub fn write_digital_lines(
        &self,
        samps_per_chan: usize,
        _auto_start: bool,
        _timeout: f64,
        _data: &[u8],
    ) -> Result<usize, DaqError> {
        Ok(samps_per_chan)
    }

    pub fn read_analog_f64(
        &self,
        samps_per_chan: usize,
        _timeout: f64,
        buffer: &mut [f64],
    ) -> Result<usize, DaqError> {
        buffer.fill(0.0);
        Ok(samps_per_chan)
    }

    pub fn read_digital_lines(&self, _timeout: f64, buffer: &mut [u8]) -> Result<usize, DaqError> {
        buffer.fill(0);
        Ok(1)
    }
}

impl Drop for NiTask {
    fn drop(&mut self) {
        if !self.cleared {
            trace!("dummy task dropped without clear");
        }
    }
}
