//! Rig configuration.
//!
//! Everything has a default matching the STORM4pi rig, so an empty document is a
//! valid configuration:
//!
//! ```toml
//! [endpoint]
//! poll_interval_ms = 10
//! shutdown_poll_ms = 50
//!
//! [shutter]
//! board = "PCI-6722"
//! channels = 7
//! oversampling = 100
//! counter = 0
//! trigger = 0
//! clock = "ctr0out"
//! slack = 0.001
//! duty_cycle = 0.5
//! min_voltage = -10.0
//! max_voltage = 10.0
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub endpoint: EndpointConfig,
    pub shutter: ShutterConfig,
}

impl RigConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint.validate()?;
        self.shutter.validate()
    }
}

/// Timing of the command queue drain loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub poll_interval_ms: u64,
    /// Period at which `stop_thread` checks whether the drain loop has exited
    pub shutdown_poll_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            shutdown_poll_ms: 50,
        }
    }
}

impl EndpointConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_poll(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 || self.shutdown_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "endpoint poll intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Triggered waveform output of the shutter board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutterConfig {
    /// Device name or product type
    pub board: String,
    /// Analog output channels `ao0..ao{channels-1}`
    pub channels: usize,
    /// Samples per illumination cycle
    pub oversampling: usize,
    /// Counter generating the sample clock
    pub counter: usize,
    /// `PFI` line carrying the camera trigger
    pub trigger: usize,
    /// Terminal the waveform task takes its sample clock from
    pub clock: String,
    /// Relative amount by which the sample clock runs faster than the cycle
    pub slack: f64,
    pub duty_cycle: f64,
    pub min_voltage: f64,
    pub max_voltage: f64,
}

impl Default for ShutterConfig {
    fn default() -> Self {
        Self {
            board: "PCI-6722".to_string(),
            channels: 7,
            oversampling: 100,
            counter: 0,
            trigger: 0,
            clock: "ctr0out".to_string(),
            slack: 0.001,
            duty_cycle: 0.5,
            min_voltage: -10.0,
            max_voltage: 10.0,
        }
    }
}

impl ShutterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(format!("shutter: {}", msg)))
        };
        if self.channels == 0 {
            return invalid("at least one channel is required");
        }
        if self.oversampling == 0 {
            return invalid("oversampling must be at least 1");
        }
        if !(self.duty_cycle > 0.0 && self.duty_cycle < 1.0) {
            return invalid("duty cycle must be within (0, 1)");
        }
        if !(self.slack >= 0.0) {
            return invalid("slack must not be negative");
        }
        if !(self.min_voltage < self.max_voltage) {
            return invalid("voltage range is empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::config::*;
    use crate::error::ConfigError;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = RigConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, RigConfig::default());
        assert_eq!(cfg.shutter.board, "PCI-6722");
        assert_eq!(cfg.shutter.channels, 7);
        assert_eq!(cfg.endpoint.poll_interval().as_millis(), 10);
    }

    #[test]
    fn partial_override() {
        let cfg = RigConfig::from_toml_str(
            r#"
            [shutter]
            board = "Dev2"
            channels = 2
            "#,
        )
        .unwrap();
        assert_eq!(cfg.shutter.board, "Dev2");
        assert_eq!(cfg.shutter.channels, 2);
        assert_eq!(cfg.shutter.oversampling, 100);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            RigConfig::from_toml_str("[shutter]\nduty_cycle = 1.5"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RigConfig::from_toml_str("[endpoint]\npoll_interval_ms = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RigConfig::from_toml_str("[shutter]\nchannels = \"seven\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
