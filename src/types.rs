// src/types.rs
use std::fmt;
use serde::{Deserialize, Serialize};
use crate::drivers::{Channel, DemodResult, NoiseBaseline, ScheduledChange, SignalMax, WaveType};

// Which output channels a command touches
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Left,
    Right,
    Both,
}
impl Target {
    pub fn includes(self, channel: Channel) -> bool {
        match self {
            Target::Both => true,
            Target::Left => channel == Channel::Left,
            Target::Right => channel == Channel::Right,
        }
    }
}
impl From<Channel> for Target {
    fn from(channel: Channel) -> Self {
        match channel {
            Channel::Left => Target::Left,
            Channel::Right => Target::Right,
        }
    }
}

// Commands sent from the control thread to the audio thread
#[derive(Clone, Debug, PartialEq)]
pub enum EngineCommand {
    SetFrequency(Target, f64),
    SetAmplitude(Target, f64),
    SetWaveType(Target, WaveType),
    SetAnalyzerFrequency(f64),
    // both channels and the analyzer in one step
    Retune(f64),
    SetAntiphase(bool),
    Schedule(ScheduledChange),
    SetAnalyzerEnabled(bool),
    SetImpulseDetectorEnabled(bool),
    SetImpulseThreshold(f32),
    SetMeanSteps(usize),
    ResetMean,
    CaptureNoise,
    SetNoise(Option<NoiseBaseline>),
    CaptureSignalMax,
    SetSignalMax(Option<SignalMax>),
    // echoed back as EngineEvent::Marker once drained
    Mark(u64),
}

// Results published by the audio thread, in buffer order
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    Marker(u64),
    ScheduledChangeApplied(Channel, f64),
    NoiseCaptured(NoiseBaseline),
    SignalMaxCaptured(SignalMax),
    Amplitude(DemodResult),
    MeanAmplitude(f32),
    MaxAmplitude(f32),
    MeanMaxAmplitude(f32),
    Impulse(f32),
}

/// Sensor families that can be recognized on the jack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorType {
    #[default]
    Unknown,
    Nitrates,
    Fields,
    Radiation,
    Humidity,
}
impl SensorType {
    pub const ALL: [SensorType; 5] = [
        SensorType::Unknown,
        SensorType::Nitrates,
        SensorType::Fields,
        SensorType::Radiation,
        SensorType::Humidity,
    ];
    /// Stable display name.
    pub fn name(self) -> &'static str {
        match self {
            SensorType::Unknown => "Unknown",
            SensorType::Nitrates => "Nitrates",
            SensorType::Fields => "Fields",
            SensorType::Radiation => "Radiation",
            SensorType::Humidity => "Humidity",
        }
    }
}
impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One probe step of the identification sequence.
///
/// The first digit is the left-channel bit, the second the right-channel bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProbeTrial {
    Bits00,
    Bits01,
    Bits10,
    Bits11,
}
impl ProbeTrial {
    /// Fixed execution order of the probe sequence.
    pub const SEQUENCE: [ProbeTrial; 4] = [
        ProbeTrial::Bits00,
        ProbeTrial::Bits01,
        ProbeTrial::Bits10,
        ProbeTrial::Bits11,
    ];
    pub fn index(self) -> usize {
        match self {
            ProbeTrial::Bits00 => 0,
            ProbeTrial::Bits01 => 1,
            ProbeTrial::Bits10 => 2,
            ProbeTrial::Bits11 => 3,
        }
    }
    pub fn left_bit(self) -> bool {
        matches!(self, ProbeTrial::Bits10 | ProbeTrial::Bits11)
    }
    pub fn right_bit(self) -> bool {
        matches!(self, ProbeTrial::Bits01 | ProbeTrial::Bits11)
    }
}

/// Demodulated response amplitudes for the four probe trials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFingerprint {
    pub amplitude00: f64,
    pub amplitude01: f64,
    pub amplitude10: f64,
    pub amplitude11: f64,
}
impl SensorFingerprint {
    pub fn from_array(values: [f64; 4]) -> Self {
        Self {
            amplitude00: values[0],
            amplitude01: values[1],
            amplitude10: values[2],
            amplitude11: values[3],
        }
    }
    pub fn to_array(&self) -> [f64; 4] {
        [
            self.amplitude00,
            self.amplitude01,
            self.amplitude10,
            self.amplitude11,
        ]
    }
    pub fn amplitude(&self, trial: ProbeTrial) -> f64 {
        self.to_array()[trial.index()]
    }
    /// Euclidean distance between two fingerprints.
    pub fn distance(&self, other: &SensorFingerprint) -> f64 {
        self.to_array()
            .iter()
            .zip(other.to_array())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }
}
