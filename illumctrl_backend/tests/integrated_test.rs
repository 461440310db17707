use std::collections::HashMap;
use std::sync::Arc;

use maplit::hashmap;
use parking_lot::Mutex;

use illumctrl_backend::device::{AotfDriver, CtAotf, Laser, LaserDriver};
use illumctrl_backend::hardware::{DaqHardware, Edge, SampleMode, TaskHandle};
use illumctrl_backend::sim::{DaqCall, SimulatedDaq};
use illumctrl_backend::*;

#[derive(Default)]
struct LaserLog {
    powers: Vec<f64>,
    ext_control: Option<bool>,
    pulse_mode: Option<bool>,
    shutdowns: usize,
}

struct FakeLaser {
    log: Arc<Mutex<LaserLog>>,
    ready: bool,
}

impl LaserDriver for FakeLaser {
    fn name(&self) -> &str {
        "stradus"
    }
    fn status(&mut self) -> bool {
        self.ready
    }
    fn set_power(&mut self, power: f64) -> Result<(), DeviceError> {
        self.log.lock().powers.push(power);
        Ok(())
    }
    fn set_ext_control(&mut self, on: bool) -> Result<(), DeviceError> {
        self.log.lock().ext_control = Some(on);
        Ok(())
    }
    fn set_pulse_mode(&mut self, on: bool) -> Result<(), DeviceError> {
        self.log.lock().pulse_mode = Some(on);
        Ok(())
    }
    fn shut_down(&mut self) -> Result<(), DeviceError> {
        self.log.lock().shutdowns += 1;
        Ok(())
    }
}

#[derive(Default)]
struct FakeAotf {
    amplitudes: Arc<Mutex<HashMap<usize, f64>>>,
}

impl AotfDriver for FakeAotf {
    fn name(&self) -> &str {
        "ct-aotf"
    }
    fn status(&mut self) -> bool {
        true
    }
    fn set_amplitude(&mut self, channel: usize, amplitude: f64) -> Result<(), DeviceError> {
        self.amplitudes.lock().insert(channel, amplitude);
        Ok(())
    }
    fn set_frequency(&mut self, _channel: usize, _frequency: f64) -> Result<(), DeviceError> {
        Ok(())
    }
    fn shut_down(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}

fn laser(ready: bool) -> (Arc<Mutex<LaserLog>>, Laser<FakeLaser>) {
    let log = Arc::new(Mutex::new(LaserLog::default()));
    let driver = FakeLaser {
        log: log.clone(),
        ready,
    };
    (log, Laser::new(driver))
}

fn shutter(channels: usize) -> (Arc<SimulatedDaq>, ShutterController) {
    let sim = Arc::new(SimulatedDaq::new());
    let hw: Arc<dyn DaqHardware> = sim.clone();
    let cfg = ShutterConfig {
        channels,
        ..ShutterConfig::default()
    };
    // 0.1 V per channel index, so each baseline write is identifiable
    let power_to_voltage: PowerToVoltage = Box::new(|channel, power| power + 0.1 * channel as f64);
    (sim, ShutterController::new(hw, cfg, power_to_voltage))
}

fn created_tasks(calls: &[DaqCall]) -> Vec<TaskHandle> {
    calls
        .iter()
        .filter_map(|call| match call {
            DaqCall::CreateTask(handle) => Some(*handle),
            _ => None,
        })
        .collect()
}

#[test]
fn laser_backlog_collapses_to_last_request() {
    let (log, laser) = laser(true);
    let endpoint = Endpoint::new("405", Some(laser));
    endpoint.add_request(Request::new(true, 5.0));
    endpoint.add_request(Request::new(true, 8.0));
    endpoint.add_request(Request::new(false, 0.0));

    assert_eq!(endpoint.drain_cycle().unwrap(), Some(Request::new(false, 0.0)));
    assert!(endpoint.pending().is_empty());
    assert_eq!(endpoint.drain_cycle().unwrap(), None);
    assert_eq!(log.lock().powers, vec![0.0]);
}

#[test]
fn aotf_backlog_collapses_per_channel() {
    let driver = FakeAotf::default();
    let amplitudes = driver.amplitudes.clone();
    let endpoint = Endpoint::new("aotf", Some(CtAotf::new(driver)));
    endpoint.add_request(Request::for_channel(true, 0, 3.0));
    endpoint.add_request(Request::for_channel(true, 1, 4.0));
    endpoint.add_request(Request::for_channel(true, 0, 6.0));

    assert_eq!(
        endpoint.drain_cycle().unwrap(),
        Some(Request::for_channel(true, 0, 6.0))
    );
    assert_eq!(endpoint.pending(), vec![Request::for_channel(true, 1, 4.0)]);
    assert_eq!(*amplitudes.lock(), hashmap! {0 => 6.0});

    endpoint.drain_cycle().unwrap();
    assert!(endpoint.pending().is_empty());
    assert_eq!(*amplitudes.lock(), hashmap! {0 => 6.0, 1 => 4.0});
}

#[test]
fn laser_queue_lifecycle() {
    let (log, laser) = laser(true);
    let mut queue = CommandQueue::spawn("488", Some(laser), &EndpointConfig::default()).unwrap();
    assert!(!queue.is_simulated());
    queue.analog_modulation_on().unwrap();
    queue.pulse_mode_on().unwrap();
    queue.set_amplitude(true, 12.5).unwrap();
    queue.stop_thread().unwrap();
    queue.stop_thread().unwrap();

    let log = log.lock();
    assert_eq!(log.powers, vec![12.5]);
    assert_eq!(log.ext_control, Some(true));
    assert_eq!(log.pulse_mode, Some(true));
    assert_eq!(log.shutdowns, 1);
}

#[test]
fn unready_laser_runs_simulated() {
    let (log, laser) = laser(false);
    let mut queue = CommandQueue::spawn("561", Some(laser), &EndpointConfig::default()).unwrap();
    assert!(queue.is_simulated());
    queue.add_request(true, 3.0);
    queue.pulse_mode_off().unwrap();
    queue.analog_modulation_off().unwrap();
    queue.stop_thread().unwrap();

    let log = log.lock();
    assert!(log.powers.is_empty());
    assert_eq!(log.pulse_mode, None);
    // shut down once when found faulty, never again
    assert_eq!(log.shutdowns, 1);
}

#[test]
fn setup_twice_is_a_precondition_violation() {
    let (_sim, mut shutter) = shutter(2);
    shutter.set_waveform_flat(vec![1.0; 20]).unwrap();
    shutter.setup(0.1).unwrap();
    assert_eq!(shutter.setup(0.1).unwrap_err(), ShutterError::AlreadyConfigured);
    assert_eq!(
        ShutterError::AlreadyConfigured.to_string(),
        "Attempt to call setup without first calling cleanup"
    );
    assert_eq!(shutter.state(), ShutterState::Configured);
}

#[test]
fn setup_arms_counter_clocked_waveform() {
    let (sim, mut shutter) = shutter(7);
    shutter.set_waveform_flat(vec![0.5; 700]).unwrap();
    shutter.setup(0.1).unwrap();

    let calls = sim.calls();
    let tasks = created_tasks(&calls);
    assert_eq!(tasks.len(), 2);
    let (wv, ct) = (tasks[0], tasks[1]);

    let ao_channels: Vec<&str> = calls
        .iter()
        .filter_map(|call| match call {
            DaqCall::CreateAoVoltageChan {
                task,
                physical_channel,
                ..
            } if *task == wv => Some(physical_channel.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        ao_channels,
        vec!["Dev1/ao0", "Dev1/ao1", "Dev1/ao2", "Dev1/ao3", "Dev1/ao4", "Dev1/ao5", "Dev1/ao6"]
    );

    let timing = calls
        .iter()
        .find_map(|call| match call {
            DaqCall::CfgSampClkTiming {
                task,
                source,
                rate,
                edge,
                mode,
                samps_per_chan,
            } if *task == wv => Some((source.clone(), *rate, *edge, *mode, *samps_per_chan)),
            _ => None,
        })
        .unwrap();
    assert_eq!(timing.0, "/Dev1/ctr0out");
    assert!((timing.1 - 1001.0).abs() < 1e-9);
    assert_eq!((timing.2, timing.3, timing.4), (Edge::Rising, SampleMode::Continuous, 100));

    assert!(calls.iter().any(|call| matches!(call,
        DaqCall::WriteAnalogF64 { task, samps_per_chan: 100, auto_start: false, data }
            if *task == wv && data.len() == 700)));

    let pulse = calls
        .iter()
        .find_map(|call| match call {
            DaqCall::CreateCoPulseChanFreq {
                task,
                counter,
                frequency,
                duty_cycle,
                ..
            } if *task == ct => Some((counter.clone(), *frequency, *duty_cycle)),
            _ => None,
        })
        .unwrap();
    assert_eq!(pulse.0, "Dev1/ctr0");
    assert!((pulse.1 - 1001.0).abs() < 1e-9);
    assert_eq!(pulse.2, 0.5);

    let ct_config: Vec<&DaqCall> = calls
        .iter()
        .filter(|call| match call {
            DaqCall::CfgImplicitTiming { task, .. }
            | DaqCall::SetStartTrigRetriggerable { task, .. }
            | DaqCall::CfgDigEdgeStartTrig { task, .. } => *task == ct,
            _ => false,
        })
        .collect();
    assert_eq!(
        ct_config,
        vec![
            &DaqCall::CfgImplicitTiming {
                task: ct,
                mode: SampleMode::Finite,
                samps_per_chan: 100
            },
            &DaqCall::SetStartTrigRetriggerable {
                task: ct,
                retriggerable: true
            },
            &DaqCall::CfgDigEdgeStartTrig {
                task: ct,
                source: "/Dev1/PFI0".to_string(),
                edge: Edge::Rising
            },
        ]
    );
}

#[test]
fn film_start_and_stop_ordering() {
    let (sim, mut shutter) = shutter(2);
    shutter.set_waveform_flat(vec![1.0, 1.0, 0.0, 0.0]).unwrap();
    shutter.setup(0.02).unwrap();
    let tasks = created_tasks(&sim.calls());
    let (wv, ct) = (tasks[0], tasks[1]);

    sim.clear_calls();
    shutter.start_film().unwrap();
    assert_eq!(shutter.state(), ShutterState::Filming);
    assert_eq!(sim.calls(), vec![DaqCall::StartTask(wv), DaqCall::StartTask(ct)]);

    sim.clear_calls();
    shutter.stop_film().unwrap();
    let calls = sim.calls();
    assert_eq!(
        calls[..4],
        [
            DaqCall::StopTask(ct),
            DaqCall::StopTask(wv),
            DaqCall::ClearTask(ct),
            DaqCall::ClearTask(wv),
        ]
    );

    // one short-lived task per channel: create, channel, write, start, stop, clear
    let baseline = &calls[4..];
    assert_eq!(baseline.len(), 12);
    for (channel, task_calls) in baseline.chunks(6).enumerate() {
        let DaqCall::CreateTask(task) = task_calls[0] else {
            panic!("expected task creation, got {:?}", task_calls[0]);
        };
        assert_eq!(
            task_calls[1],
            DaqCall::CreateAoVoltageChan {
                task,
                physical_channel: format!("Dev1/ao{}", channel),
                min_val: -10.0,
                max_val: 10.0
            }
        );
        match &task_calls[2] {
            DaqCall::WriteAnalogF64 { data, .. } => {
                assert!((data[0] - 0.1 * channel as f64).abs() < 1e-12)
            }
            other => panic!("expected baseline write, got {:?}", other),
        }
        assert_eq!(
            task_calls[3..],
            [
                DaqCall::StartTask(task),
                DaqCall::StopTask(task),
                DaqCall::ClearTask(task)
            ]
        );
    }
    assert_eq!(sim.live_tasks(), 0);
    assert_eq!(shutter.state(), ShutterState::Idle);
}

#[test]
fn stop_film_and_cleanup_are_idempotent() {
    let (sim, mut shutter) = shutter(3);
    shutter.set_waveform_flat(vec![2.0; 30]).unwrap();
    shutter.setup(0.1).unwrap();
    shutter.start_film().unwrap();

    shutter.stop_film().unwrap();
    shutter.stop_film().unwrap();
    shutter.cleanup().unwrap();
    shutter.cleanup().unwrap();
    assert_eq!(shutter.state(), ShutterState::Idle);
    assert_eq!(sim.live_tasks(), 0);

    // a new session creates new tasks
    shutter.setup(0.1).unwrap();
    shutter.cleanup().unwrap();
    assert_eq!(created_tasks(&sim.calls()).len(), 2 + 3 + 3 + 2);
}

#[test]
fn hardware_failure_is_surfaced() {
    let (sim, mut shutter) = shutter(1);
    shutter.set_waveform_flat(vec![1.0; 10]).unwrap();
    sim.set_write_limit(Some(5));
    let err = shutter.setup(0.1).unwrap_err();
    assert_eq!(
        err,
        ShutterError::Daq(DaqError::SampleCountMismatch {
            operation: "set_waveform",
            expected: 10,
            actual: 5
        })
    );
    assert_eq!(sim.live_tasks(), 0);
}

#[test]
fn rig_config_drives_controller() {
    let cfg = RigConfig::from_toml_str(
        r#"
        [shutter]
        board = "PCIe-6353"
        channels = 1
        trigger = 3
        "#,
    )
    .unwrap();
    let sim = Arc::new(SimulatedDaq::with_boards(&[("Dev1", "PCI-6722"), ("Dev2", "PCIe-6353")]));
    let hw: Arc<dyn DaqHardware> = sim.clone();
    let mut shutter = ShutterController::new(hw, cfg.shutter, Box::new(|_, power| power));
    shutter.set_waveform_flat(vec![1.0; 4]).unwrap();
    shutter.setup(1.0).unwrap();
    assert!(sim.calls().contains(&DaqCall::CfgDigEdgeStartTrig {
        task: TaskHandle(2),
        source: "/Dev2/PFI3".to_string(),
        edge: Edge::Rising
    }));
    shutter.cleanup().unwrap();
}
