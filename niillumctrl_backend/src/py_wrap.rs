use std::sync::Arc;

use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use tracing::error;

use illumctrl_backend::config::ShutterConfig;
use illumctrl_backend::error::ShutterError;
use illumctrl_backend::hardware::DaqHardware;
use illumctrl_backend::ni_comm::{NiAnalogComm, NiDigitalComm};
use illumctrl_backend::shutter::{PowerToVoltage, ShutterController, ShutterState};

use crate::daq::NiDaq;

fn ni_daq() -> Arc<dyn DaqHardware> {
    Arc::new(NiDaq::new())
}

fn shutter_err(err: ShutterError) -> PyErr {
    match err {
        ShutterError::Daq(_) => PyRuntimeError::new_err(err.to_string()),
        _ => PyValueError::new_err(err.to_string()),
    }
}

/// Wraps a Python `power_to_voltage(channel, power)` callable. A failing
/// callable yields 0 V so lines still return to a known level.
fn py_power_to_voltage(callable: Option<PyObject>) -> PowerToVoltage {
    match callable {
        None => Box::new(|_, _| 0.0),
        Some(callable) => Box::new(move |channel, power| {
            Python::with_gil(|py| {
                callable
                    .call1(py, (channel, power))
                    .and_then(|voltage| voltage.extract::<f64>(py))
                    .unwrap_or_else(|err| {
                        error!("power_to_voltage({}, {}) failed: {}", channel, power, err);
                        0.0
                    })
            })
        }),
    }
}

#[pyclass(name = "ShutterControl")]
pub struct ShutterControlWrap {
    inner: ShutterController,
}

#[pymethods]
impl ShutterControlWrap {
    #[new]
    #[pyo3(signature = (power_to_voltage=None, board=None, channels=None, oversampling=None))]
    pub fn new(
        power_to_voltage: Option<PyObject>,
        board: Option<String>,
        channels: Option<usize>,
        oversampling: Option<usize>,
    ) -> PyResult<Self> {
        let defaults = ShutterConfig::default();
        let cfg = ShutterConfig {
            board: board.unwrap_or(defaults.board.clone()),
            channels: channels.unwrap_or(defaults.channels),
            oversampling: oversampling.unwrap_or(defaults.oversampling),
            ..defaults
        };
        cfg.validate()
            .map_err(|err| PyValueError::new_err(err.to_string()))?;
        Ok(Self {
            inner: ShutterController::new(ni_daq(), cfg, py_power_to_voltage(power_to_voltage)),
        })
    }

    /// Flat channel-major waveform spanning all channels
    pub fn set_waveform(&mut self, waveform: Vec<f64>) -> PyResult<()> {
        self.inner.set_waveform_flat(waveform).map_err(shutter_err)
    }

    pub fn setup(&mut self, cycle_time: f64) -> PyResult<()> {
        self.inner.setup(cycle_time).map_err(shutter_err)
    }

    pub fn start_film(&mut self) -> PyResult<()> {
        self.inner.start_film().map_err(shutter_err)
    }

    pub fn stop_film(&mut self) -> PyResult<()> {
        self.inner.stop_film().map_err(shutter_err)
    }

    pub fn cleanup(&mut self) -> PyResult<()> {
        self.inner.cleanup().map_err(shutter_err)
    }

    pub fn state(&self) -> &'static str {
        match self.inner.state() {
            ShutterState::Idle => "idle",
            ShutterState::Configured => "configured",
            ShutterState::Filming => "filming",
        }
    }
}

#[pyclass(name = "NiAnalogComm")]
pub struct NiAnalogCommWrap {
    inner: NiAnalogComm,
}

#[pymethods]
impl NiAnalogCommWrap {
    #[new]
    pub fn new(on_voltage: f64) -> Self {
        Self {
            inner: NiAnalogComm::new(ni_daq(), on_voltage),
        }
    }

    pub fn add_request(&self, on: bool, board: &str, channel: usize) -> PyResult<()> {
        self.inner
            .add_request(on, board, channel)
            .map_err(|err| PyRuntimeError::new_err(err.to_string()))
    }

    pub fn set_filming(&mut self, flag: bool) {
        self.inner.set_filming(flag)
    }
}

#[pyclass(name = "NiDigitalComm")]
pub struct NiDigitalCommWrap {
    inner: NiDigitalComm,
}

#[pymethods]
impl NiDigitalCommWrap {
    #[new]
    pub fn new() -> Self {
        Self {
            inner: NiDigitalComm::new(ni_daq()),
        }
    }

    pub fn set_shutter(&self, on: bool, board: &str, line: usize) -> PyResult<()> {
        self.inner
            .set_shutter(on, board, line)
            .map_err(|err| PyRuntimeError::new_err(err.to_string()))
    }

    pub fn set_filming(&mut self, flag: bool) {
        self.inner.set_filming(flag)
    }
}
