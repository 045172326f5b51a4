use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::drivers::{SenseError, WaveType};
use crate::types::{SensorFingerprint, SensorType};
/// Audio stream and signal-path settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: f64,
    /// Samples per callback. Must be a power of two.
    pub number_of_frames: usize,
    pub frequency: f64,
    pub amplitude: f64,
    pub wave_type: WaveType,
    /// Buffers averaged into one mean-amplitude update.
    pub mean_steps: usize,
    pub impulse_threshold: f32,
    pub analyzer_enabled: bool,
    pub impulse_detector_enabled: bool,
    /// Events the audio thread can queue before new ones are dropped.
    pub event_capacity: usize,
}
impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            number_of_frames: 1024,
            frequency: 1_000.0,
            amplitude: 0.0,
            wave_type: WaveType::Sine,
            mean_steps: 10,
            impulse_threshold: 0.5,
            analyzer_enabled: true,
            impulse_detector_enabled: true,
            event_capacity: 4096,
        }
    }
}
impl EngineConfig {
    pub fn validate(&self) -> Result<(), SenseError> {
        if self.number_of_frames < 2 || !self.number_of_frames.is_power_of_two() {
            return Err(SenseError::config(format!(
                "number_of_frames must be a power of two, got {}",
                self.number_of_frames
            )));
        }
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(SenseError::config(format!(
                "sample_rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if self.mean_steps == 0 {
            return Err(SenseError::config("mean_steps must be at least one"));
        }
        if self.event_capacity == 0 {
            return Err(SenseError::config("event_capacity must be at least one"));
        }
        self.check_frequency(self.frequency)
    }
    /// Frequencies the demodulator can lock onto: their bin lies below Nyquist.
    pub fn check_frequency(&self, frequency: f64) -> Result<(), SenseError> {
        let bin = (frequency * self.number_of_frames as f64 / self.sample_rate).round();
        if frequency.is_finite() && frequency >= 0.0 && bin < (self.number_of_frames / 2) as f64 {
            Ok(())
        } else {
            Err(SenseError::config(format!(
                "frequency {frequency} Hz must lie in 0..{} Hz",
                self.sample_rate / 2.0
            )))
        }
    }
}
/// Known response of one sensor type to the probe sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFingerprint {
    pub sensor: SensorType,
    pub fingerprint: SensorFingerprint,
}
impl ReferenceFingerprint {
    pub fn new(sensor: SensorType, amplitudes: [f64; 4]) -> Self {
        Self {
            sensor,
            fingerprint: SensorFingerprint::from_array(amplitudes),
        }
    }
}
/// Identification protocol tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentificationConfig {
    /// Maximum fingerprint distance still counted as a match.
    pub identification_threshold: f64,
    /// Output volume below this level means the route is region-limited.
    pub device_volume_limit_threshold: f32,
    pub probe_frequency: f64,
    /// Buffers skipped after each drive change while the probe settles.
    pub settle_buffers: usize,
    /// Buffers averaged into one trial amplitude.
    pub sample_buffers: usize,
    /// Give up if the stream delivers nothing for this long.
    pub buffer_timeout_ms: u64,
    pub references: Vec<ReferenceFingerprint>,
}
impl Default for IdentificationConfig {
    fn default() -> Self {
        Self {
            identification_threshold: 0.08,
            device_volume_limit_threshold: 0.15,
            probe_frequency: 1_000.0,
            settle_buffers: 8,
            sample_buffers: 4,
            buffer_timeout_ms: 1_000,
            references: default_references(),
        }
    }
}
impl IdentificationConfig {
    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }
    pub fn validate(&self) -> Result<(), SenseError> {
        if self.identification_threshold.is_nan() || self.identification_threshold < 0.0 {
            return Err(SenseError::config(
                "identification_threshold must not be negative",
            ));
        }
        if self.sample_buffers == 0 {
            return Err(SenseError::config("sample_buffers must be at least one"));
        }
        if let Some(bad) = self
            .references
            .iter()
            .find(|r| r.sensor == SensorType::Unknown)
        {
            return Err(SenseError::config(format!(
                "reference fingerprint {:?} cannot be assigned to {}",
                bad.fingerprint.to_array(),
                bad.sensor
            )));
        }
        Ok(())
    }
}
// Responses of the production probes at the standard drive levels.
fn default_references() -> Vec<ReferenceFingerprint> {
    vec![
        ReferenceFingerprint::new(SensorType::Nitrates, [0.06, 0.16, 0.30, 0.40]),
        ReferenceFingerprint::new(SensorType::Fields, [0.02, 0.52, 0.10, 0.60]),
        ReferenceFingerprint::new(SensorType::Radiation, [0.12, 0.12, 0.60, 0.60]),
        ReferenceFingerprint::new(SensorType::Humidity, [0.09, 0.44, 0.45, 0.80]),
    ]
}
/// Top-level settings file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenseConfig {
    pub engine: EngineConfig,
    pub identification: IdentificationConfig,
}
impl SenseConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SenseError> {
        let config: SenseConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SenseError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
    pub fn validate(&self) -> Result<(), SenseError> {
        self.engine.validate()?;
        self.identification.validate()
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn defaults_are_valid() {
        let config = SenseConfig::default();
        config.validate().unwrap();
        assert_eq!(config.identification.identification_threshold, 0.08);
        assert_eq!(config.identification.device_volume_limit_threshold, 0.15);
        assert_eq!(config.identification.references.len(), 4);
    }
    #[test]
    fn partial_json_keeps_defaults() {
        let config = SenseConfig::from_json_str(
            r#"{ "engine": { "number_of_frames": 512, "wave_type": "square" },
                 "identification": { "settle_buffers": 3 } }"#,
        )
        .unwrap();
        assert_eq!(config.engine.number_of_frames, 512);
        assert_eq!(config.engine.wave_type, WaveType::Square);
        assert_eq!(config.engine.sample_rate, 44_100.0);
        assert_eq!(config.identification.settle_buffers, 3);
        assert_eq!(config.identification.sample_buffers, 4);
    }
    #[test]
    fn rejects_non_power_of_two_frames() {
        let err = SenseConfig::from_json_str(r#"{ "engine": { "number_of_frames": 1000 } }"#)
            .unwrap_err();
        assert!(matches!(err, SenseError::InvalidConfiguration(_)));
    }
    #[test]
    fn rejects_bad_sample_rate_and_frequency() {
        let mut engine = EngineConfig {
            sample_rate: 0.0,
            ..EngineConfig::default()
        };
        assert!(engine.validate().is_err());
        engine.sample_rate = 8_000.0;
        engine.frequency = 4_000.0;
        assert!(engine.validate().is_err());
        engine.frequency = 1_000.0;
        engine.event_capacity = 0;
        assert!(engine.validate().is_err());
    }
    #[test]
    fn rejects_reference_for_unknown() {
        let mut identification = IdentificationConfig::default();
        identification
            .references
            .push(ReferenceFingerprint::new(SensorType::Unknown, [0.0; 4]));
        assert!(identification.validate().is_err());
    }
    #[test]
    fn malformed_json_is_a_config_error() {
        let err = SenseConfig::from_json_str("{ engine: ").unwrap_err();
        assert!(matches!(err, SenseError::Config(_)));
    }
}
