//! Illumination device families driven through command queues.
//!
//! ## Overview
//!
//! A command queue only needs to know how to put one [`Request`] on a device, so
//! every device family implements the small [`IlluminationDevice`] capability:
//!
//! - [`Laser`]: any single-channel laser behind a [`LaserDriver`] (Coherent Cube,
//!   Vortran Stradus, generic serial lasers). Off means power 0.
//! - [`CtAotf`]: Crystal Technologies AOTF behind an [`AotfDriver`]. Off means
//!   amplitude 0 on the requested channel.
//! - [`AaAotf`]: AA Opto-Electronics AOTF. The requested amplitude is mapped onto
//!   the driver's amplitude and frequency offset; off disables the channel.
//! - [`NiAnalogLine`]: an analog output line of an NI board (AOM drivers, LED
//!   current drivers), written through a short-lived single-sample task.
//!
//! Vendor protocols stay behind the driver traits; implementations for a real
//! serial or USB link live with the acquisition software, tests use fakes.
//!
//! Every family declares its [`Coalescing`] policy: single-channel devices only
//! ever care about the newest request, multi-channel devices about the newest
//! request per channel.

use std::sync::Arc;

use crate::buffer::{Coalescing, Request};
use crate::error::DeviceError;
use crate::hardware::DaqHardware;
use crate::tasks::{board_device, BaseTask, VoltageOutput};

/// Capability used by [`CommandQueue`](crate::queue::CommandQueue) to drive a device.
pub trait IlluminationDevice: Send + 'static {
    /// How the request backlog of this device is coalesced
    const COALESCING: Coalescing;

    /// Whether the device answered correctly at start-up. A device that is not
    /// ready is shut down and its endpoint runs in simulation mode.
    fn is_ready(&mut self) -> bool {
        true
    }

    /// Puts the requested on/off state and amplitude on the hardware.
    fn apply_state(&mut self, request: &Request) -> Result<(), DeviceError>;

    /// Switches external analog modulation. Devices without it ignore the call.
    fn analog_modulation(&mut self, _on: bool) -> Result<(), DeviceError> {
        Ok(())
    }

    fn shut_down(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

fn not_supported(device: &str, operation: &'static str) -> DeviceError {
    DeviceError::NotSupported {
        device: device.to_string(),
        operation,
    }
}

fn require_channel(device: &str, request: &Request) -> Result<usize, DeviceError> {
    request
        .channel
        .ok_or_else(|| DeviceError::MissingChannel(device.to_string()))
}

/// Vendor driver of a single-channel laser.
pub trait LaserDriver: Send + 'static {
    fn name(&self) -> &str;
    /// `true` when the laser answered and reports no fault
    fn status(&mut self) -> bool;
    fn set_power(&mut self, power: f64) -> Result<(), DeviceError>;
    fn set_ext_control(&mut self, on: bool) -> Result<(), DeviceError>;
    fn set_pulse_mode(&mut self, _on: bool) -> Result<(), DeviceError> {
        Err(not_supported(self.name(), "pulse mode"))
    }
    fn shut_down(&mut self) -> Result<(), DeviceError>;
}

pub struct Laser<L: LaserDriver> {
    driver: L,
}

impl<L: LaserDriver> Laser<L> {
    pub fn new(driver: L) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &L {
        &self.driver
    }

    pub fn set_pulse_mode(&mut self, on: bool) -> Result<(), DeviceError> {
        self.driver.set_pulse_mode(on)
    }
}

impl<L: LaserDriver> IlluminationDevice for Laser<L> {
    const COALESCING: Coalescing = Coalescing::Latest;

    fn is_ready(&mut self) -> bool {
        self.driver.status()
    }

    fn apply_state(&mut self, request: &Request) -> Result<(), DeviceError> {
        self.driver.set_power(request.effective_amplitude())
    }

    fn analog_modulation(&mut self, on: bool) -> Result<(), DeviceError> {
        self.driver.set_ext_control(on)
    }

    fn shut_down(&mut self) -> Result<(), DeviceError> {
        self.driver.shut_down()
    }
}

/// Vendor driver of a multi-channel AOTF. Optional operations default to
/// [`DeviceError::NotSupported`].
pub trait AotfDriver: Send + 'static {
    fn name(&self) -> &str;
    fn status(&mut self) -> bool;
    fn set_amplitude(&mut self, channel: usize, amplitude: f64) -> Result<(), DeviceError>;
    fn set_frequency(&mut self, channel: usize, frequency: f64) -> Result<(), DeviceError>;
    fn shut_down(&mut self) -> Result<(), DeviceError>;

    fn channel_on_off(&mut self, _channel: usize, _on: bool) -> Result<(), DeviceError> {
        Err(not_supported(self.name(), "channel on/off"))
    }
    fn offset_frequency(&mut self, _channel: usize, _offset: f64) -> Result<(), DeviceError> {
        Err(not_supported(self.name(), "frequency offset"))
    }
    fn set_frequencies(&mut self, _channel: usize, _frequencies: &[f64]) -> Result<(), DeviceError> {
        Err(not_supported(self.name(), "frequency lists"))
    }
    fn analog_modulation(&mut self, _on: bool) -> Result<(), DeviceError> {
        Err(not_supported(self.name(), "analog modulation"))
    }
    fn fsk(&mut self, _channel: usize, _on: bool) -> Result<(), DeviceError> {
        Err(not_supported(self.name(), "frequency shift keying"))
    }
}

/// Crystal Technologies AOTF.
pub struct CtAotf<A: AotfDriver> {
    driver: A,
}

impl<A: AotfDriver> CtAotf<A> {
    pub fn new(driver: A) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &A {
        &self.driver
    }

    pub fn fsk(&mut self, channel: usize, on: bool) -> Result<(), DeviceError> {
        self.driver.fsk(channel, on)
    }

    pub fn set_frequency(&mut self, channel: usize, frequency: f64) -> Result<(), DeviceError> {
        self.driver.set_frequency(channel, frequency)
    }

    pub fn set_frequencies(&mut self, channel: usize, frequencies: &[f64]) -> Result<(), DeviceError> {
        self.driver.set_frequencies(channel, frequencies)
    }
}

impl<A: AotfDriver> IlluminationDevice for CtAotf<A> {
    const COALESCING: Coalescing = Coalescing::PerChannel;

    fn is_ready(&mut self) -> bool {
        self.driver.status()
    }

    fn apply_state(&mut self, request: &Request) -> Result<(), DeviceError> {
        let channel = require_channel(self.driver.name(), request)?;
        self.driver
            .set_amplitude(channel, request.effective_amplitude())
    }

    fn analog_modulation(&mut self, on: bool) -> Result<(), DeviceError> {
        self.driver.analog_modulation(on)
    }

    fn shut_down(&mut self) -> Result<(), DeviceError> {
        self.driver.shut_down()
    }
}

/// Amplitudes above this use the driver's amplitude directly, below it the
/// intensity is trimmed by detuning the channel.
pub const AA_AMPLITUDE_THRESHOLD: f64 = 13.0;
/// Driver amplitude used while trimming by detuning
pub const AA_MIN_DRIVER_AMPLITUDE: f64 = -7.4;

/// Driver `(amplitude, frequency offset)` for a requested AA AOTF amplitude.
pub fn aa_driver_setting(amplitude: f64) -> (f64, f64) {
    if amplitude > AA_AMPLITUDE_THRESHOLD {
        ((amplitude - 15.0) / 10.0 - 7.0, 0.0)
    } else {
        (AA_MIN_DRIVER_AMPLITUDE, 0.65 - amplitude / 20.0)
    }
}

/// AA Opto-Electronics AOTF.
pub struct AaAotf<A: AotfDriver> {
    driver: A,
}

impl<A: AotfDriver> AaAotf<A> {
    pub fn new(driver: A) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &A {
        &self.driver
    }

    pub fn set_frequency(&mut self, channel: usize, frequency: f64) -> Result<(), DeviceError> {
        self.driver.set_frequency(channel, frequency)
    }
}

impl<A: AotfDriver> IlluminationDevice for AaAotf<A> {
    const COALESCING: Coalescing = Coalescing::PerChannel;

    fn is_ready(&mut self) -> bool {
        self.driver.status()
    }

    fn apply_state(&mut self, request: &Request) -> Result<(), DeviceError> {
        let channel = require_channel(self.driver.name(), request)?;
        if !request.on {
            return self.driver.channel_on_off(channel, false);
        }
        self.driver
            .channel_on_off(channel, request.amplitude > 0.0)?;
        let (amplitude, offset) = aa_driver_setting(request.amplitude);
        self.driver.set_amplitude(channel, amplitude)?;
        self.driver.offset_frequency(channel, offset)
    }

    fn shut_down(&mut self) -> Result<(), DeviceError> {
        self.driver.shut_down()
    }
}

/// Analog output line of an NI board. Each request writes the effective
/// amplitude as a voltage through its own single-sample task.
pub struct NiAnalogLine {
    hw: Arc<dyn DaqHardware>,
    board: String,
    channel: usize,
}

impl NiAnalogLine {
    pub fn new(hw: Arc<dyn DaqHardware>, board: &str, channel: usize) -> Self {
        Self {
            hw,
            board: board.to_string(),
            channel,
        }
    }

    pub fn board(&self) -> &str {
        &self.board
    }

    pub fn channel(&self) -> usize {
        self.channel
    }
}

impl IlluminationDevice for NiAnalogLine {
    const COALESCING: Coalescing = Coalescing::Latest;

    fn is_ready(&mut self) -> bool {
        board_device(self.hw.as_ref(), &self.board).is_ok()
    }

    fn apply_state(&mut self, request: &Request) -> Result<(), DeviceError> {
        let task = VoltageOutput::new(self.hw.clone(), &self.board, self.channel)?;
        task.output_voltage(request.effective_amplitude())?;
        task.clear_task()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::buffer::Request;
    use crate::device::*;
    use crate::error::DeviceError;
    use crate::hardware::DaqHardware;
    use crate::sim::{DaqCall, SimulatedDaq};

    #[derive(Default)]
    struct AaLog {
        calls: Vec<String>,
    }

    impl AotfDriver for AaLog {
        fn name(&self) -> &str {
            "aa-aotf"
        }
        fn status(&mut self) -> bool {
            true
        }
        fn set_amplitude(&mut self, channel: usize, amplitude: f64) -> Result<(), DeviceError> {
            self.calls.push(format!("amp {} {:.3}", channel, amplitude));
            Ok(())
        }
        fn set_frequency(&mut self, channel: usize, frequency: f64) -> Result<(), DeviceError> {
            self.calls.push(format!("freq {} {}", channel, frequency));
            Ok(())
        }
        fn channel_on_off(&mut self, channel: usize, on: bool) -> Result<(), DeviceError> {
            self.calls.push(format!("chan {} {}", channel, on));
            Ok(())
        }
        fn offset_frequency(&mut self, channel: usize, offset: f64) -> Result<(), DeviceError> {
            self.calls.push(format!("offset {} {:.3}", channel, offset));
            Ok(())
        }
        fn shut_down(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    #[test]
    fn aa_amplitude_mapping() {
        assert_eq!(aa_driver_setting(25.0), (-6.0, 0.0));
        let (amp, offset) = aa_driver_setting(5.0);
        assert_eq!(amp, AA_MIN_DRIVER_AMPLITUDE);
        assert!((offset - 0.4).abs() < 1e-12);
    }

    #[test]
    fn aa_aotf_requests() {
        let mut aotf = AaAotf::new(AaLog::default());
        aotf.apply_state(&Request::for_channel(true, 2, 35.0)).unwrap();
        aotf.apply_state(&Request::for_channel(true, 1, 0.0)).unwrap();
        aotf.apply_state(&Request::for_channel(false, 3, 35.0)).unwrap();
        assert_eq!(
            aotf.driver().calls,
            vec![
                "chan 2 true",
                "amp 2 -5.000",
                "offset 2 0.000",
                "chan 1 false",
                "amp 1 -7.400",
                "offset 1 0.650",
                "chan 3 false",
            ]
        );
        assert_eq!(
            aotf.apply_state(&Request::new(true, 1.0)),
            Err(DeviceError::MissingChannel("aa-aotf".to_string()))
        );
        // AA AOTFs have no analog modulation; the request is ignored
        assert!(aotf.analog_modulation(true).is_ok());
    }

    #[test]
    fn ct_aotf_optional_operations() {
        let mut aotf = CtAotf::new(AaLog::default());
        aotf.apply_state(&Request::for_channel(false, 0, 4.0)).unwrap();
        assert_eq!(aotf.driver().calls, vec!["amp 0 0.000"]);
        assert!(matches!(
            aotf.fsk(0, true),
            Err(DeviceError::NotSupported { operation: "frequency shift keying", .. })
        ));
    }

    #[test]
    fn ni_analog_line_writes_voltage() {
        let sim = Arc::new(SimulatedDaq::new());
        let hw: Arc<dyn DaqHardware> = sim.clone();
        let mut line = NiAnalogLine::new(hw.clone(), "PCI-6722", 1);
        assert!(line.is_ready());
        line.apply_state(&Request::new(true, 2.5)).unwrap();
        line.apply_state(&Request::new(false, 2.5)).unwrap();
        let written: Vec<f64> = sim
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DaqCall::WriteAnalogF64 { data, .. } => Some(data[0]),
                _ => None,
            })
            .collect();
        assert_eq!(written, vec![2.5, 0.0]);
        assert_eq!(sim.live_tasks(), 0);

        assert!(!NiAnalogLine::new(hw, "PCIe-6353", 0).is_ready());
    }
}
