// src/drivers/mod.rs
// Signal-path building blocks shared by the engine and the identification protocol
pub mod error;
pub mod fft;
pub mod impulse;
pub mod loopback;
pub mod source;
pub mod waveform;
// Re-export the types callers need without reaching into submodules
pub use error::SenseError;
pub use fft::{DemodOutput, DemodResult, FftDemodulator, NoiseBaseline, SignalMax};
pub use impulse::{ImpulseDetector, ImpulseReading};
pub use loopback::{LoopbackDriver, SensorModel};
pub use source::{AudioDriver, ManualDriver, RenderCallback, StereoBuffer, StreamFormat};
pub use waveform::{
    buffers_for_delay, optimize_frequency, Channel, ChannelConfig, ScheduledChange, WaveType,
};
