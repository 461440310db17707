//! Unbuffered NI line control.
//!
//! Writes to an NI board return in microseconds, so shutter lines and simple
//! on/off analog lines are written directly from the caller's thread through a
//! short-lived task each, without a command queue.

use std::sync::Arc;

use tracing::debug;

use crate::error::DaqError;
use crate::hardware::DaqHardware;
use crate::tasks::{BaseTask, DigitalOutput, VoltageOutput};

/// On/off analog lines. While filming, the lines belong to the waveform
/// controller and requests are ignored.
pub struct NiAnalogComm {
    hw: Arc<dyn DaqHardware>,
    on_voltage: f64,
    filming: bool,
}

impl NiAnalogComm {
    pub fn new(hw: Arc<dyn DaqHardware>, on_voltage: f64) -> Self {
        Self {
            hw,
            on_voltage,
            filming: false,
        }
    }

    pub fn on_voltage(&self) -> f64 {
        self.on_voltage
    }

    pub fn is_filming(&self) -> bool {
        self.filming
    }

    pub fn add_request(&self, on: bool, board: &str, channel: usize) -> Result<(), DaqError> {
        if self.filming {
            debug!(board, channel, "filming, analog request ignored");
            return Ok(());
        }
        let task = VoltageOutput::new(self.hw.clone(), board, channel)?;
        task.output_voltage(if on { self.on_voltage } else { 0.0 })?;
        task.clear_task()
    }

    pub fn set_filming(&mut self, filming: bool) {
        self.filming = filming;
    }
}

/// Digital shutter lines. Shutters only back up the light modulation, so they
/// are switched regardless of filming.
#[derive(Clone)]
pub struct NiDigitalComm {
    hw: Arc<dyn DaqHardware>,
    filming: bool,
}

impl NiDigitalComm {
    pub fn new(hw: Arc<dyn DaqHardware>) -> Self {
        Self { hw, filming: false }
    }

    pub fn set_shutter(&self, on: bool, board: &str, line: usize) -> Result<(), DaqError> {
        let task = DigitalOutput::new(self.hw.clone(), board, line)?;
        task.output(on)?;
        task.clear_task()
    }

    pub fn is_filming(&self) -> bool {
        self.filming
    }

    pub fn set_filming(&mut self, filming: bool) {
        self.filming = filming;
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::hardware::DaqHardware;
    use crate::ni_comm::*;
    use crate::sim::{DaqCall, SimulatedDaq};

    fn writes(sim: &SimulatedDaq) -> usize {
        sim.calls()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    DaqCall::WriteAnalogF64 { .. } | DaqCall::WriteDigitalLines { .. }
                )
            })
            .count()
    }

    #[test]
    fn analog_requests_are_skipped_while_filming() {
        let sim = Arc::new(SimulatedDaq::new());
        let hw: Arc<dyn DaqHardware> = sim.clone();
        let mut comm = NiAnalogComm::new(hw, 5.0);
        comm.add_request(true, "PCI-6722", 2).unwrap();
        comm.set_filming(true);
        comm.add_request(false, "PCI-6722", 2).unwrap();
        assert_eq!(writes(&sim), 1);
        assert!(sim.calls().contains(&DaqCall::WriteAnalogF64 {
            task: crate::hardware::TaskHandle(1),
            samps_per_chan: 1,
            auto_start: true,
            data: vec![5.0],
        }));
    }

    #[test]
    fn shutters_ignore_filming() {
        let sim = Arc::new(SimulatedDaq::new());
        let hw: Arc<dyn DaqHardware> = sim.clone();
        let mut comm = NiDigitalComm::new(hw);
        comm.set_filming(true);
        comm.set_shutter(true, "Dev1", 3).unwrap();
        comm.set_shutter(false, "Dev1", 3).unwrap();
        assert_eq!(writes(&sim), 2);
        assert_eq!(sim.live_tasks(), 0);
        assert!(comm.set_shutter(true, "PCIe-6353", 3).is_err());
    }
}
