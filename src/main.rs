// src/main.rs
//! Simulated run: plug a virtual sensor into the loopback jack, identify it,
//! then watch the live signal for a moment.
//!
//! Usage: lapka-sense [sensor] [config.json] [--grant-eu]
use std::thread;
use std::time::{Duration, Instant};
use anyhow::{bail, Context, Result};
use log::info;
use lapka_sense::drivers::{DemodResult, LoopbackDriver, SensorModel};
use lapka_sense::{
    IdentificationOutcome, Identificator, IdentificatorDelegate, ProbeTrial, SenseConfig,
    SensorFingerprint, SensorType, SignalEngine, SignalEngineDelegate, StaticAudioSession,
};

struct Console;
impl IdentificatorDelegate for Console {
    fn did_recognize_sensor(&mut self, sensor: SensorType) {
        println!("sensor: {sensor}");
    }
    fn did_obtain_trial_amplitude(&mut self, trial: ProbeTrial, amplitude: f64) {
        println!("  {trial:?}: {amplitude:.4}");
    }
    fn did_obtain_fingerprint(&mut self, fingerprint: &SensorFingerprint) {
        println!("fingerprint: {:?}", fingerprint.to_array());
    }
    fn did_recognize_device_volume_limit_state(&mut self, limited: bool) {
        if limited {
            println!("output volume is region-limited");
        }
    }
    fn did_recognize_device_microphone_level(&mut self, level: f32) {
        println!("microphone level: {level:.3}");
    }
    fn ask_to_grant_permission_to_switch_to_eu(&mut self) {
        println!("permission needed to raise the output volume");
    }
}

#[derive(Default)]
struct Monitor {
    last: Option<DemodResult>,
    means: usize,
    impulses: usize,
}
impl SignalEngineDelegate for Monitor {
    fn did_update_amplitude(&mut self, result: &DemodResult) {
        self.last = Some(*result);
    }
    fn did_update_mean_amplitude(&mut self, mean_amplitude: f32) {
        self.means += 1;
        println!("mean amplitude: {mean_amplitude:.4}");
    }
    fn did_update_mean_max_amplitude(&mut self, mean_max_amplitude: f32) {
        println!("mean peak: {mean_max_amplitude:.4}");
    }
    fn did_recognize_impulse(&mut self, amplitude: f32) {
        self.impulses += 1;
        println!("impulse: {amplitude:.3}");
    }
}

fn parse_sensor(name: &str) -> Result<SensorType> {
    SensorType::ALL
        .into_iter()
        .find(|s| s.name().eq_ignore_ascii_case(name))
        .with_context(|| format!("unknown sensor '{name}'"))
}

fn main() -> Result<()> {
    env_logger::init();
    let mut sensor = SensorType::Humidity;
    let mut config_path = None;
    let mut grant_eu = false;
    for arg in std::env::args().skip(1) {
        if arg == "--grant-eu" {
            grant_eu = true;
        } else if arg.ends_with(".json") {
            config_path = Some(arg);
        } else {
            sensor = parse_sensor(&arg)?;
        }
    }
    let config = match &config_path {
        Some(path) => {
            SenseConfig::load(path).with_context(|| format!("loading config from {path}"))?
        }
        None => SenseConfig::default(),
    };
    info!("simulating a {sensor} sensor");

    let driver = LoopbackDriver::new(SensorModel::preset(sensor));
    let mut engine = SignalEngine::new(config.engine.clone(), Box::new(driver))
        .context("creating signal engine")?;
    let mut session = StaticAudioSession::default();
    let mut console = Console;
    let mut identificator = Identificator::new(
        &mut engine,
        &mut session,
        &mut console,
        config.identification.clone(),
    );
    let mut outcome = identificator
        .identificate()
        .context("running identification")?;
    if outcome == IdentificationOutcome::PermissionRequired {
        outcome = if grant_eu {
            identificator.user_granted_permission_to_switch_to_eu()
        } else {
            identificator.user_prohibited_permission_to_switch_to_eu()
        }
        .context("answering the volume permission request")?;
    }
    let IdentificationOutcome::Recognized(recognized) = outcome else {
        bail!("identification did not finish: {outcome:?}");
    };
    drop(identificator);
    if recognized == SensorType::Unknown {
        return Ok(());
    }

    // Keep the probe tone running and watch the live readings.
    engine.set_amplitude(1.0)?;
    engine.start().context("restarting signal engine")?;
    let mut monitor = Monitor::default();
    let until = Instant::now() + Duration::from_secs(2);
    while Instant::now() < until {
        engine.dispatch_events(&mut monitor);
        thread::sleep(Duration::from_millis(50));
    }
    engine.stop();
    if let Some(last) = monitor.last {
        println!(
            "last reading: amplitude {:.4}, angle {:.3} rad",
            last.amplitude, last.angle
        );
    }
    println!(
        "{} mean updates, {} impulses in {} buffers",
        monitor.means,
        monitor.impulses,
        engine.buffers_rendered()
    );
    Ok(())
}
