//! NI-DAQmx backend for the STORM illumination controllers.
//!
//! [`NiDaq`] implements [`illumctrl_backend::hardware::DaqHardware`] on top of the
//! NI-DAQmx C library. With the `nidaqmx` feature the vendor library is linked;
//! without it a dummy binding reporting a single `Dev1` board is compiled in, so
//! the crate builds and runs on machines without the NI runtime.
//!
//! The `python` feature builds the `niillumctrl_backend` Python extension module
//! with the `ShutterControl`, `NiAnalogComm` and `NiDigitalComm` classes.

pub mod daq;

#[cfg(feature = "nidaqmx")]
pub mod nidaqmx;
#[cfg(not(feature = "nidaqmx"))]
#[path = "nidaqmx_dummy.rs"]
pub mod nidaqmx;

#[cfg(feature = "python")]
mod py_wrap;

pub use crate::daq::NiDaq;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn niillumctrl_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<py_wrap::ShutterControlWrap>()?;
    m.add_class::<py_wrap::NiAnalogCommWrap>()?;
    m.add_class::<py_wrap::NiDigitalCommWrap>()?;
    Ok(())
}
