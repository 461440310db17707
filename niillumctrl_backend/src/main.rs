use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use illumctrl_backend::config::{EndpointConfig, RigConfig};
use illumctrl_backend::device::NiAnalogLine;
use illumctrl_backend::hardware::DaqHardware;
use illumctrl_backend::queue::CommandQueue;
use illumctrl_backend::shutter::ShutterController;
use illumctrl_backend::waveform::Waveform;

use niillumctrl_backend::NiDaq;

const DEFAULT_BOARD: &str = "Dev1";

/// Ramps the AOM on analog line 0 through its queue, then turns it off before
/// the drain thread stops.
fn ramp_aom(hw: Arc<dyn DaqHardware>, board: &str, cfg: &EndpointConfig) -> anyhow::Result<()> {
    let mut aom = CommandQueue::spawn("aom", Some(NiAnalogLine::new(hw, board, 0)), cfg)?;
    for step in 0..=10 {
        aom.add_request(true, f64::from(step) / 10.0);
    }
    thread::sleep(cfg.poll_interval() * 5);
    aom.add_request(false, 0.0);
    // stop_thread does not drain what is still buffered
    while aom.is_running() && !aom.endpoint().pending().is_empty() {
        thread::sleep(cfg.poll_interval());
    }
    aom.stop_thread()?;
    Ok(())
}

/// The board given on the command line wins over the config file. Without
/// either, the first dummy board is used.
fn rig_config(board_arg: Option<String>, config_text: Option<&str>) -> anyhow::Result<RigConfig> {
    let mut rig = match config_text {
        Some(text) => RigConfig::from_toml_str(text).context("parsing rig config")?,
        None => {
            let mut rig = RigConfig::default();
            rig.shutter.board = DEFAULT_BOARD.to_string();
            rig
        }
    };
    if let Some(board) = board_arg {
        rig.shutter.board = board;
    }
    rig.validate()?;
    Ok(rig)
}

/// Usage: `niillumctrl_backend_bin [BOARD|-] [CONFIG.toml]`
///
/// `-` keeps the board named in the config file.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let board_arg = args.next().filter(|board| board != "-");
    let config_text = match args.next() {
        Some(path) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("reading rig config {}", path))?,
        ),
        None => None,
    };
    let rig = rig_config(board_arg, config_text.as_deref())?;
    let board = rig.shutter.board.clone();

    let daq = Arc::new(NiDaq::new());
    let hw: Arc<dyn DaqHardware> = daq.clone();
    daq.reset_device(&board)?;

    ramp_aom(hw.clone(), &board, &rig.endpoint)?;

    // Two pulses per camera frame on every channel, staggered by channel.
    let channels = rig.shutter.channels;
    let samples = rig.shutter.oversampling;
    let half = (samples / 2).max(1);
    let mut flat = Vec::with_capacity(channels * samples);
    for ch in 0..channels {
        flat.extend((0..samples).map(|i| {
            if (i + ch * half / channels) % half < half / 2 {
                1.0
            } else {
                0.0
            }
        }));
    }
    let waveform = Waveform::from_flat(flat, channels)?;

    let mut shutter = ShutterController::new(
        hw,
        rig.shutter.clone(),
        Box::new(|_, power| 5.0 * power),
    );
    shutter.set_waveform(waveform)?;
    shutter.setup(0.1)?;
    shutter.start_film()?;
    info!("filming on {} for 1 s", board);
    thread::sleep(Duration::from_secs(1));
    shutter.stop_film()?;
    shutter.cleanup()?;
    info!(live_tasks = daq.live_tasks(), "done");
    Ok(())
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use illumctrl_backend::config::EndpointConfig;
    use illumctrl_backend::hardware::DaqHardware;
    use illumctrl_backend::sim::{DaqCall, SimulatedDaq};

    use super::{ramp_aom, rig_config};

    #[test]
    fn board_comes_from_config_unless_given() {
        let text = "[shutter]\nboard = \"PCIe-6353\"\n";
        assert_eq!(rig_config(None, Some(text)).unwrap().shutter.board, "PCIe-6353");
        assert_eq!(
            rig_config(Some("Dev2".to_string()), Some(text)).unwrap().shutter.board,
            "Dev2"
        );
        assert_eq!(rig_config(None, None).unwrap().shutter.board, "Dev1");
    }

    #[test]
    fn aom_ramp_ends_switched_off() {
        let sim = Arc::new(SimulatedDaq::new());
        let hw: Arc<dyn DaqHardware> = sim.clone();
        let cfg = EndpointConfig {
            poll_interval_ms: 1,
            shutdown_poll_ms: 1,
        };
        ramp_aom(hw, "Dev1", &cfg).unwrap();

        let written: Vec<Vec<f64>> = sim
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                DaqCall::WriteAnalogF64 { data, .. } => Some(data),
                _ => None,
            })
            .collect();
        assert_eq!(written.last(), Some(&vec![0.0]));
        assert_eq!(sim.live_tasks(), 0);
    }
}
