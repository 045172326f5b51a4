use std::f64::consts::TAU;
use std::time::Duration;
use serde::{Deserialize, Serialize};
/// Shape of the excitation tone on one channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveType {
    #[default]
    Sine,
    Square,
}
/// Output side of the jack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Left,
    Right,
}
impl Channel {
    pub fn index(self) -> usize {
        match self {
            Channel::Left => 0,
            Channel::Right => 1,
        }
    }
}
/// Oscillator state for one output channel.
///
/// The phase accumulator survives across buffers so consecutive renders join
/// without a step; it is only reset by building a new `ChannelConfig`.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelConfig {
    pub frequency: f64,
    pub amplitude: f64,
    pub wave_type: WaveType,
    theta: f64,
}
impl ChannelConfig {
    pub fn new(frequency: f64, amplitude: f64, wave_type: WaveType) -> Self {
        Self {
            frequency,
            amplitude,
            wave_type,
            theta: 0.0,
        }
    }
    pub fn phase(&self) -> f64 {
        self.theta
    }
    /// Fill `out` with the next samples of this channel.
    pub fn render(&mut self, sample_rate: f64, out: &mut [f32]) {
        let step = TAU * self.frequency / sample_rate;
        let amplitude = self.amplitude;
        for sample in out.iter_mut() {
            let s = self.theta.sin();
            let value = match self.wave_type {
                WaveType::Sine => s * amplitude,
                WaveType::Square => {
                    if s >= 0.0 {
                        amplitude
                    } else {
                        -amplitude
                    }
                }
            };
            *sample = value as f32;
            self.theta += step;
            if self.theta >= TAU {
                self.theta = self.theta.rem_euclid(TAU);
            }
        }
    }
}
/// One-shot deferred amplitude change, counted in rendered buffers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledChange {
    pub channel: Channel,
    pub amplitude: f64,
    pub remaining_buffers: u64,
}
impl ScheduledChange {
    pub fn after_delay(
        channel: Channel,
        amplitude: f64,
        delay: Duration,
        sample_rate: f64,
        number_of_frames: usize,
    ) -> Self {
        Self {
            channel,
            amplitude,
            remaining_buffers: buffers_for_delay(delay, sample_rate, number_of_frames),
        }
    }
    /// Count one rendered buffer. Returns true once the change is due.
    pub fn tick(&mut self) -> bool {
        self.remaining_buffers = self.remaining_buffers.saturating_sub(1);
        self.remaining_buffers == 0
    }
}
/// Number of whole buffers whose combined duration covers `delay`.
pub fn buffers_for_delay(delay: Duration, sample_rate: f64, number_of_frames: usize) -> u64 {
    let buffers = delay.as_secs_f64() * sample_rate / number_of_frames as f64;
    // Absorb float noise so an exact multiple of the period does not round up.
    (buffers - 1e-6).ceil().max(0.0) as u64
}
/// Nearest frequency that fits a whole number of cycles into one buffer.
///
/// Such a tone lands exactly on an FFT bin, so the demodulator sees no
/// spectral leakage. The result stays between one cycle per buffer and the
/// last bin below Nyquist.
pub fn optimize_frequency(frequency: f64, sample_rate: f64, number_of_frames: usize) -> f64 {
    let n = number_of_frames as f64;
    let max_cycles = (number_of_frames / 2).saturating_sub(1).max(1) as f64;
    let cycles = if frequency.is_finite() {
        (frequency * n / sample_rate).round().clamp(1.0, max_cycles)
    } else {
        1.0
    };
    cycles * sample_rate / n
}
