use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::drivers::source::{AudioDriver, RenderCallback, StreamFormat};
use crate::drivers::SenseError;
use crate::types::SensorType;
/// Electrical behaviour of a passive probe seen through the jack.
///
/// The captured input is a linear mix of both output channels plus uniform
/// noise, with an optional periodic spike on top.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorModel {
    pub left_gain: f32,
    pub right_gain: f32,
    pub noise_level: f32,
    /// Inject a spike every this many buffers.
    pub impulse_every: Option<u64>,
    pub impulse_amplitude: f32,
}
impl SensorModel {
    /// Nothing plugged in: only noise comes back.
    pub fn open_jack() -> Self {
        Self {
            left_gain: 0.0,
            right_gain: 0.0,
            noise_level: 0.002,
            impulse_every: None,
            impulse_amplitude: 0.0,
        }
    }
    /// Gains matching the default reference fingerprints.
    pub fn preset(sensor: SensorType) -> Self {
        let (left_gain, right_gain) = match sensor {
            SensorType::Unknown => return Self::open_jack(),
            SensorType::Nitrates => (0.30, 0.10),
            SensorType::Fields => (0.10, 0.50),
            SensorType::Radiation => (0.60, 0.00),
            SensorType::Humidity => (0.45, 0.35),
        };
        let mut model = Self {
            left_gain,
            right_gain,
            ..Self::open_jack()
        };
        if sensor == SensorType::Radiation {
            model.impulse_every = Some(40);
            model.impulse_amplitude = 0.9;
        }
        model
    }
    /// Mix one rendered stereo buffer into the next captured input buffer.
    pub fn respond(
        &self,
        left: &[f32],
        right: &[f32],
        input: &mut [f32],
        rng: &mut StdRng,
        buffer_index: u64,
    ) {
        for ((captured, &l), &r) in input.iter_mut().zip(left).zip(right) {
            let noise = if self.noise_level > 0.0 {
                rng.gen_range(-self.noise_level..self.noise_level)
            } else {
                0.0
            };
            *captured = self.left_gain * l + self.right_gain * r + noise;
        }
        if let Some(every) = self.impulse_every {
            if every > 0 && buffer_index % every == every - 1 {
                let middle = input.len() / 2;
                if let Some(sample) = input.get_mut(middle) {
                    *sample += self.impulse_amplitude;
                }
            }
        }
    }
}
/// Simulated jack: a background thread renders buffers and feeds each output
/// through a `SensorModel` into the following input buffer.
pub struct LoopbackDriver {
    model: SensorModel,
    paced: bool,
    seed: u64,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}
impl LoopbackDriver {
    pub fn new(model: SensorModel) -> Self {
        Self {
            model,
            paced: true,
            seed: 0x1a9c_a5e7,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
    /// When paced (the default) buffers are produced at the real audio rate,
    /// otherwise as fast as the consumer allows.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
    pub fn model(&self) -> &SensorModel {
        &self.model
    }
}
impl AudioDriver for LoopbackDriver {
    fn start(&mut self, format: StreamFormat, mut render: RenderCallback) -> Result<(), SenseError> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let model = self.model.clone();
        let paced = self.paced;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let worker = thread::Builder::new()
            .name("lapka-audio".into())
            .spawn(move || {
                let frames = format.number_of_frames;
                let period = format.period();
                let mut input = vec![0.0f32; frames];
                let mut left = vec![0.0f32; frames];
                let mut right = vec![0.0f32; frames];
                let mut deadline = Instant::now();
                let mut buffer_index = 0u64;
                while running.load(Ordering::SeqCst) {
                    render(&input, &mut left, &mut right);
                    model.respond(&left, &right, &mut input, &mut rng, buffer_index);
                    buffer_index += 1;
                    if paced {
                        deadline += period;
                        let now = Instant::now();
                        if deadline > now {
                            thread::sleep(deadline - now);
                        }
                    } else {
                        thread::yield_now();
                    }
                }
                debug!("loopback stream exited after {buffer_index} buffers");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                SenseError::hardware(format!("failed to spawn loopback thread: {e}"))
            })?;
        info!(
            "loopback stream started ({} Hz, {} frames)",
            format.sample_rate, format.number_of_frames
        );
        self.worker = Some(worker);
        Ok(())
    }
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("loopback audio thread panicked");
            }
        }
    }
    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}
impl Drop for LoopbackDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::Duration;
    #[test]
    fn model_mixes_both_channels() {
        let model = SensorModel {
            noise_level: 0.0,
            ..SensorModel::preset(SensorType::Humidity)
        };
        let mut rng = StdRng::seed_from_u64(1);
        let mut input = vec![0.0f32; 4];
        model.respond(&[1.0; 4], &[1.0; 4], &mut input, &mut rng, 0);
        assert!(input.iter().all(|&s| (s - 0.80).abs() < 1e-6));
    }
    #[test]
    fn model_injects_periodic_spikes() {
        let model = SensorModel::preset(SensorType::Radiation);
        let mut rng = StdRng::seed_from_u64(1);
        let mut input = vec![0.0f32; 8];
        model.respond(&[0.0; 8], &[0.0; 8], &mut input, &mut rng, 39);
        assert!(input[4] > 0.85);
        model.respond(&[0.0; 8], &[0.0; 8], &mut input, &mut rng, 40);
        assert!(input.iter().all(|s| s.abs() < 0.01));
    }
    #[test]
    fn loopback_feeds_output_back_as_input() {
        let model = SensorModel {
            left_gain: 0.5,
            right_gain: 0.0,
            noise_level: 0.0,
            impulse_every: None,
            impulse_amplitude: 0.0,
        };
        let mut driver = LoopbackDriver::new(model).paced(false);
        let (tx, rx) = channel();
        let format = StreamFormat {
            sample_rate: 8_000.0,
            number_of_frames: 16,
        };
        driver
            .start(
                format,
                Box::new(move |input: &[f32], left: &mut [f32], right: &mut [f32]| {
                    left.fill(1.0);
                    right.fill(0.0);
                    tx.send(input[0]).ok();
                }),
            )
            .unwrap();
        let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        driver.stop();
        assert_eq!(first, 0.0);
        assert_eq!(second, 0.5);
        assert!(!driver.is_running());
    }
}
