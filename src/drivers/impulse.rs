use crate::drivers::SenseError;
/// Result of scanning one buffer for impulses.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImpulseReading {
    pub max_amplitude: f32,
    /// True only on the buffer where the peak first rises above threshold.
    pub impulse: bool,
    /// Average peak over the last `mean_steps` buffers, present on every
    /// `mean_steps`-th buffer.
    pub mean_max_amplitude: Option<f32>,
}
/// Rising-edge peak detector for particle strikes.
#[derive(Clone, Debug)]
pub struct ImpulseDetector {
    threshold: f32,
    previous_value_was_above_threshold: bool,
    impulse_amplitude: f32,
    mean_steps: usize,
    sum_of_maxima: f64,
    mean_step: usize,
}
impl ImpulseDetector {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            previous_value_was_above_threshold: false,
            impulse_amplitude: 0.0,
            mean_steps: 1,
            sum_of_maxima: 0.0,
            mean_step: 0,
        }
    }
    /// Peak of the most recent impulse, zero before the first one.
    pub fn impulse_amplitude(&self) -> f32 {
        self.impulse_amplitude
    }
    pub fn mean_steps(&self) -> usize {
        self.mean_steps
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
        self.sum_of_maxima = 0.0;
        self.mean_step = 0;
    }
    pub fn threshold(&self) -> f32 {
        self.threshold
    }
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }
    pub fn reset(&mut self) {
        self.previous_value_was_above_threshold = false;
    }
    pub fn process(&mut self, data: &[f32]) -> ImpulseReading {
        let max_amplitude = data.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        let above = max_amplitude > self.threshold;
        let impulse = above && !self.previous_value_was_above_threshold;
        self.previous_value_was_above_threshold = above;
        if impulse {
            self.impulse_amplitude = max_amplitude;
        }
        self.sum_of_maxima += f64::from(max_amplitude);
        self.mean_step += 1;
        let mean_max_amplitude = if self.mean_step >= self.mean_steps {
            let mean = (self.sum_of_maxima / self.mean_steps as f64) as f32;
            self.reset_mean();
            Some(mean)
        } else {
            None
        };
        ImpulseReading {
            max_amplitude,
            impulse,
            mean_max_amplitude,
        }
    }
}
