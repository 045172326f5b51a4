use std::sync::Arc;
use rustfft::{num_complex::Complex32, Fft, FftPlanner};
use crate::drivers::SenseError;
/// Complex value of the target bin after one buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DemodResult {
    pub real: f32,
    pub imag: f32,
    pub amplitude: f32,
    /// In `(-π, π]`.
    pub angle: f32,
    /// Amplitude relative to the signal-max reference, when one is set.
    pub relative_amplitude: Option<f32>,
}
/// Constant interference vector removed from the target bin.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NoiseBaseline {
    pub real: f32,
    pub imag: f32,
}
/// Bin value recorded at full sensor response. Together with the noise
/// baseline it spans the measurement range.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SignalMax {
    pub real: f32,
    pub imag: f32,
}
/// Output of one `FftDemodulator::process` call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DemodOutput {
    pub result: DemodResult,
    /// Present on every `mean_steps`-th buffer.
    pub mean: Option<f32>,
}
/// Lock-in style demodulator: reads a single FFT bin per buffer.
///
/// The plan is computed once; clones share it and only copy the scratch
/// buffers and running state.
#[derive(Clone)]
pub struct FftDemodulator {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex32>,
    scratch: Vec<Complex32>,
    number_of_frames: usize,
    sample_rate: f64,
    frequency: f64,
    bin: usize,
    scale: f32,
    noise: Option<NoiseBaseline>,
    signal_max: Option<SignalMax>,
    last_raw: NoiseBaseline,
    mean_steps: usize,
    sum_of_amplitudes: f64,
    mean_step: usize,
}
impl FftDemodulator {
    pub fn new(number_of_frames: usize, sample_rate: f64) -> Result<Self, SenseError> {
        if number_of_frames < 2 || !number_of_frames.is_power_of_two() {
            return Err(SenseError::config(format!(
                "number of frames must be a power of two, got {number_of_frames}"
            )));
        }
        validate_sample_rate(sample_rate)?;
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(number_of_frames);
        let scratch = vec![Complex32::ZERO; fft.get_inplace_scratch_len()];
        Ok(Self {
            fft,
            buffer: vec![Complex32::ZERO; number_of_frames],
            scratch,
            number_of_frames,
            sample_rate,
            frequency: 0.0,
            bin: 0,
            scale: 2.0 / number_of_frames as f32,
            noise: None,
            signal_max: None,
            last_raw: NoiseBaseline::default(),
            mean_steps: 1,
            sum_of_amplitudes: 0.0,
            mean_step: 0,
        })
    }
    pub fn number_of_frames(&self) -> usize {
        self.number_of_frames
    }
    pub fn frequency(&self) -> f64 {
        self.frequency
    }
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
    pub fn bin(&self) -> usize {
        self.bin
    }
    pub fn mean_steps(&self) -> usize {
        self.mean_steps
    }
    pub fn noise(&self) -> Option<NoiseBaseline> {
        self.noise
    }
    pub fn signal_max(&self) -> Option<SignalMax> {
        self.signal_max
    }
    /// Retarget the demodulator. The bin index is recomputed immediately.
    pub fn set_frequency(&mut self, frequency: f64) -> Result<(), SenseError> {
        self.bin = bin_for(frequency, self.sample_rate, self.number_of_frames)?;
        self.frequency = frequency;
        Ok(())
    }
    pub fn set_sample_rate(&mut self, sample_rate: f64) -> Result<(), SenseError> {
        validate_sample_rate(sample_rate)?;
        self.bin = bin_for(self.frequency, sample_rate, self.number_of_frames)?;
        self.sample_rate = sample_rate;
        Ok(())
    }
    pub fn set_mean_steps(&mut self, mean_steps: usize) -> Result<(), SenseError> {
        if mean_steps == 0 {
            return Err(SenseError::config("mean steps must be at least one"));
        }
        self.mean_steps = mean_steps;
        self.reset_mean();
        Ok(())
    }
    pub fn reset_mean(&mut self) {
        self.sum_of_amplitudes = 0.0;
        self.mean_step = 0;
    }
    /// Use the most recent uncorrected bin value as the noise baseline.
    pub fn capture_noise(&mut self) {
        self.noise = Some(self.last_raw);
    }
    pub fn set_noise(&mut self, noise: Option<NoiseBaseline>) {
        self.noise = noise;
    }
    pub fn clear_noise(&mut self) {
        self.noise = None;
    }
    /// Use the most recent uncorrected bin value as the full-response reference.
    pub fn capture_signal_max(&mut self) {
        self.signal_max = Some(SignalMax {
            real: self.last_raw.real,
            imag: self.last_raw.imag,
        });
    }
    pub fn set_signal_max(&mut self, signal_max: Option<SignalMax>) {
        self.signal_max = signal_max;
    }
    /// Demodulate one buffer. `data` must hold exactly `number_of_frames` samples.
    pub fn process(&mut self, data: &[f32]) -> DemodOutput {
        debug_assert_eq!(data.len(), self.number_of_frames);
        for (slot, &sample) in self.buffer.iter_mut().zip(data) {
            *slot = Complex32::new(sample, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.buffer, &mut self.scratch);
        let value = self.buffer[self.bin] * self.scale;
        self.last_raw = NoiseBaseline {
            real: value.re,
            imag: value.im,
        };
        let (real, imag) = match self.noise {
            Some(noise) => (value.re - noise.real, value.im - noise.imag),
            None => (value.re, value.im),
        };
        let amplitude = real.hypot(imag);
        let relative_amplitude = self.signal_max.and_then(|max| {
            let noise = self.noise.unwrap_or_default();
            let span = (max.real - noise.real).hypot(max.imag - noise.imag);
            (span > f32::EPSILON).then(|| amplitude / span)
        });
        let result = DemodResult {
            real,
            imag,
            amplitude,
            angle: principal_angle(imag, real),
            relative_amplitude,
        };
        self.sum_of_amplitudes += result.amplitude as f64;
        self.mean_step += 1;
        let mean = if self.mean_step >= self.mean_steps {
            let mean = (self.sum_of_amplitudes / self.mean_steps as f64) as f32;
            self.reset_mean();
            Some(mean)
        } else {
            None
        };
        DemodOutput { result, mean }
    }
}
// atan2 yields -π for a negative real part with imag == -0.0
fn principal_angle(imag: f32, real: f32) -> f32 {
    let angle = imag.atan2(real);
    if angle <= -std::f32::consts::PI {
        std::f32::consts::PI
    } else {
        angle
    }
}
fn validate_sample_rate(sample_rate: f64) -> Result<(), SenseError> {
    if sample_rate.is_finite() && sample_rate > 0.0 {
        Ok(())
    } else {
        Err(SenseError::config(format!(
            "sample rate must be positive, got {sample_rate}"
        )))
    }
}
fn bin_for(frequency: f64, sample_rate: f64, number_of_frames: usize) -> Result<usize, SenseError> {
    let bin = (frequency * number_of_frames as f64 / sample_rate).round();
    if !bin.is_finite() || bin < 0.0 || bin >= (number_of_frames / 2) as f64 {
        return Err(SenseError::config(format!(
            "frequency {frequency} Hz is outside the analyzable band (0..{} Hz)",
            sample_rate / 2.0
        )));
    }
    Ok(bin as usize)
}
