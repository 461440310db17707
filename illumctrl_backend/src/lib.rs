//! # illumctrl_backend
//!
//! Hardware-agnostic core of the STORM illumination control software.
//!
//! Two pieces keep the illumination in step with the camera while the operator
//! drags sliders around:
//!
//! - **Command queues** ([`queue::CommandQueue`]) sit in front of every slow
//!   illumination device (lasers, AOTFs, NI analog lines). Requests are buffered
//!   and coalesced ([`buffer::CoalescingBuffer`]) so that only the newest request
//!   (per channel, for multi-channel devices) ever reaches the hardware.
//! - The **shutter controller** ([`shutter::ShutterController`]) arms an NI board so
//!   that one full illumination waveform cycle is emitted, without any software
//!   in the loop, every time the camera fires its trigger.
//!
//! All board access goes through the [`hardware::DaqHardware`] capability, which
//! is handed to controllers at construction. `niillumctrl_backend` implements it
//! on top of NI-DAQmx; [`sim::SimulatedDaq`] implements it for dry runs and tests.
//!
//! ## Modules
//!
//! - [`hardware`]: the hardware I/O capability and its parameter enums.
//! - [`tasks`]: typed tasks (voltage output, waveform output, counter, digital
//!   and analog I/O) owning one hardware task each.
//! - [`waveform`]: per-cycle multi-channel waveforms.
//! - [`buffer`], [`device`], [`queue`]: requests, device families and command queues.
//! - [`ni_comm`]: unbuffered NI analog and digital line control.
//! - [`shutter`]: the triggered waveform output controller.
//! - [`config`]: rig configuration with STORM4pi defaults.
//! - [`error`]: error types.

pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod hardware;
pub mod ni_comm;
pub mod queue;
pub mod shutter;
pub mod sim;
pub mod tasks;
pub mod waveform;
mod worker_signal;

pub use buffer::{Coalescing, CoalescingBuffer, Request};
pub use config::{EndpointConfig, RigConfig, ShutterConfig};
pub use device::{AaAotf, AotfDriver, CtAotf, IlluminationDevice, Laser, LaserDriver, NiAnalogLine};
pub use error::*;
pub use hardware::{DaqHardware, TaskHandle};
pub use ni_comm::{NiAnalogComm, NiDigitalComm};
pub use queue::{CommandQueue, Endpoint};
pub use shutter::{sample_clock_frequency, PowerToVoltage, ShutterController, ShutterState};
pub use sim::SimulatedDaq;
pub use waveform::Waveform;
