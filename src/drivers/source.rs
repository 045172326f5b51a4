use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use crate::drivers::SenseError;
/// Fixed stream parameters negotiated when a driver starts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamFormat {
    pub sample_rate: f64,
    pub number_of_frames: usize,
}
impl StreamFormat {
    /// Wall-clock duration of one buffer.
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.number_of_frames as f64 / self.sample_rate)
    }
}
/// Called once per buffer on the audio thread with the captured mono input
/// and the left/right output slices to fill. All three hold
/// `number_of_frames` samples.
pub type RenderCallback = Box<dyn FnMut(&[f32], &mut [f32], &mut [f32]) + Send + 'static>;
/// Something that can run a duplex audio stream.
pub trait AudioDriver: Send {
    fn start(&mut self, format: StreamFormat, render: RenderCallback) -> Result<(), SenseError>;
    /// Halt the stream. Once this returns the render callback is not running
    /// and will not be called again.
    fn stop(&mut self);
    fn is_running(&self) -> bool;
}
/// One rendered stereo buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct StereoBuffer {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}
impl StereoBuffer {
    pub fn peak(samples: &[f32]) -> f32 {
        samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}
struct ManualState {
    render: Option<RenderCallback>,
    format: Option<StreamFormat>,
    available: bool,
    starts: usize,
}
/// In-memory driver useful for tests and deterministic playback: the caller
/// pumps each buffer explicitly. Clones share the same stream.
#[derive(Clone)]
pub struct ManualDriver {
    shared: Arc<Mutex<ManualState>>,
}
impl ManualDriver {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(ManualState {
                render: None,
                format: None,
                available: true,
                starts: 0,
            })),
        }
    }
    /// A driver whose audio route cannot be opened.
    pub fn unavailable() -> Self {
        let driver = Self::new();
        driver.set_available(false);
        driver
    }
    pub fn set_available(&self, available: bool) {
        self.state().available = available;
    }
    pub fn start_count(&self) -> usize {
        self.state().starts
    }
    /// Run one callback with `input` as the captured buffer. Returns `None`
    /// when the stream is stopped.
    pub fn pump(&self, input: &[f32]) -> Option<StereoBuffer> {
        let mut state = self.state();
        let frames = state.format?.number_of_frames;
        let render = state.render.as_mut()?;
        let mut captured = input.to_vec();
        captured.resize(frames, 0.0);
        let mut left = vec![0.0f32; frames];
        let mut right = vec![0.0f32; frames];
        render(&captured, &mut left, &mut right);
        Some(StereoBuffer { left, right })
    }
    pub fn pump_silence(&self) -> Option<StereoBuffer> {
        self.pump(&[])
    }
    fn state(&self) -> MutexGuard<'_, ManualState> {
        self.shared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
impl Default for ManualDriver {
    fn default() -> Self {
        Self::new()
    }
}
impl AudioDriver for ManualDriver {
    fn start(&mut self, format: StreamFormat, render: RenderCallback) -> Result<(), SenseError> {
        let mut state = self.state();
        if !state.available {
            return Err(SenseError::hardware("manual driver is marked unavailable"));
        }
        state.format = Some(format);
        state.render = Some(render);
        state.starts += 1;
        Ok(())
    }
    fn stop(&mut self) {
        let mut state = self.state();
        state.render = None;
        state.format = None;
    }
    fn is_running(&self) -> bool {
        self.state().render.is_some()
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn format() -> StreamFormat {
        StreamFormat {
            sample_rate: 8_000.0,
            number_of_frames: 8,
        }
    }
    #[test]
    fn manual_driver_runs_callback_until_stopped() {
        let mut driver = ManualDriver::new();
        let handle = driver.clone();
        assert!(handle.pump_silence().is_none());
        driver
            .start(
                format(),
                Box::new(|input: &[f32], left: &mut [f32], right: &mut [f32]| {
                    left.copy_from_slice(input);
                    right.fill(1.0);
                }),
            )
            .unwrap();
        assert!(driver.is_running());
        let out = handle.pump(&[0.5; 8]).unwrap();
        assert_eq!(out.left, vec![0.5; 8]);
        assert_eq!(StereoBuffer::peak(&out.right), 1.0);
        driver.stop();
        assert!(handle.pump_silence().is_none());
        assert_eq!(handle.start_count(), 1);
    }
    #[test]
    fn unavailable_driver_refuses_to_start() {
        let mut driver = ManualDriver::unavailable();
        let err = driver.start(format(), Box::new(|_: &[f32], _: &mut [f32], _: &mut [f32]| {})).unwrap_err();
        assert!(matches!(err, SenseError::HardwareUnavailable(_)));
        assert!(!driver.is_running());
    }
    #[test]
    fn period_matches_buffer_length() {
        assert_eq!(format().period(), Duration::from_millis(1));
    }
}
