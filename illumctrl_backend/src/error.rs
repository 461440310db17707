//! Error types for the illumination backend.
//!
//! Hardware failures are never retried: a DAQ call that fails implies a wiring,
//! driver or parameter mismatch, so every error here propagates to the caller,
//! which is expected to abort the acquisition session.

use thiserror::Error;

use crate::hardware::TaskHandle;

/// Errors reported by a [`DaqHardware`](crate::hardware::DaqHardware) implementation
/// or by the typed task wrappers built on top of it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DaqError {
    /// Negative status code returned by the driver, with the vendor message
    #[error("DAQ call failed with error {code}: {message}")]
    Driver { code: i32, message: String },

    /// Fewer (or more) samples were transferred than requested
    #[error("{operation}: transferred {actual} samples per channel, expected {expected}")]
    SampleCountMismatch {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    /// No attached device matches the requested board
    #[error("Board {0} is not available")]
    BoardNotFound(String),

    /// A name passed to the driver contained an interior NUL byte
    #[error("Failed to convert '{0}' to a C string")]
    InvalidName(String),

    /// The handle does not refer to a live task
    #[error("Task {0:?} is invalid or has already been cleared")]
    UnknownTask(TaskHandle),

    #[error(transparent)]
    Waveform(#[from] WaveformError),
}

/// Waveform shape errors. These are configuration errors and are never
/// resolved by truncating or padding the data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaveformError {
    #[error("Waveform must span at least one channel")]
    NoChannels,

    #[error("Waveform length {len} is not a multiple of the channel count {channels}")]
    NotDivisible { len: usize, channels: usize },

    #[error("Channel {channel} has {len} samples while channel 0 has {expected}")]
    RaggedChannels {
        channel: usize,
        len: usize,
        expected: usize,
    },

    #[error("A digital port has 32 lines, cannot pack {0} channels")]
    TooManyLines(usize),
}

/// Errors raised by illumination devices (lasers, AOTFs, NI analog lines).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Failure reported by a vendor driver
    #[error("{device}: {message}")]
    Driver { device: String, message: String },

    #[error("{device} does not support {operation}")]
    NotSupported {
        device: String,
        operation: &'static str,
    },

    /// A multi-channel device received a request without a channel
    #[error("{0} requires a channel for every request")]
    MissingChannel(String),

    #[error(transparent)]
    Daq(#[from] DaqError),
}

/// Errors raised by the triggered waveform output controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShutterError {
    /// `setup` was called while tasks from a previous session are still held
    #[error("Attempt to call setup without first calling cleanup")]
    AlreadyConfigured,

    #[error("Attempt to start filming before setup")]
    NotConfigured,

    #[error("No waveform loaded")]
    NoWaveform,

    #[error("Waveform has {actual} channels, the controller drives {expected}")]
    ChannelMismatch { expected: usize, actual: usize },

    #[error("Cannot replace the waveform while it is uploaded to the board")]
    WaveformLocked,

    #[error("Cycle time must be positive, got {0}")]
    InvalidCycleTime(f64),

    #[error(transparent)]
    Waveform(#[from] WaveformError),

    #[error(transparent)]
    Daq(#[from] DaqError),
}

/// Errors raised by a command queue endpoint.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to spawn drain thread for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Drain thread of {0} panicked")]
    WorkerPanicked(String),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Errors raised while reading the rig configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
