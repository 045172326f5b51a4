// src/lib.rs
//! Audio-jack sensor engine: tone generation, single-bin demodulation,
//! impulse detection and sensor identification.
pub mod config;
pub mod drivers;
pub mod engine;
pub mod identification;
pub mod session;
pub mod types;

pub use config::{EngineConfig, IdentificationConfig, ReferenceFingerprint, SenseConfig};
pub use drivers::SenseError;
pub use engine::{SignalEngine, SignalEngineDelegate};
pub use identification::{
    AbortHandle, IdentificationOutcome, IdentificationState, Identificator, IdentificatorDelegate,
};
pub use session::{AudioSession, StaticAudioSession};
pub use types::{ProbeTrial, SensorFingerprint, SensorType};
