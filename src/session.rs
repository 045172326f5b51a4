//! Interface to the platform audio session.
//!
//! Session activation, route selection and the physical volume belong to the
//! host; the engine only reads the output level and route, and asks for the
//! European volume ceiling when the user allows it.

/// Highest output volume allowed on devices with the default region limit.
pub const DEFAULT_REGION_MAX_VOLUME: f32 = 0.83;
/// Highest output volume once switched to the European profile.
pub const EUROPEAN_REGION_MAX_VOLUME: f32 = 1.0;

pub trait AudioSession {
    /// Current hardware output level in `0.0..=1.0`.
    fn hardware_output_volume(&self) -> f32;
    /// True when both the headset output and microphone input go through the jack.
    fn audio_route_is_headset_in_out(&self) -> bool;
    /// Raise the output to the European region maximum.
    fn switch_to_european_volume(&mut self);
}

/// Session with fixed, caller-controlled values.
#[derive(Clone, Debug, PartialEq)]
pub struct StaticAudioSession {
    pub hardware_output_volume: f32,
    pub audio_route_is_headset_in_out: bool,
}
impl StaticAudioSession {
    pub fn new(hardware_output_volume: f32) -> Self {
        Self {
            hardware_output_volume,
            audio_route_is_headset_in_out: true,
        }
    }
}
impl Default for StaticAudioSession {
    fn default() -> Self {
        Self::new(DEFAULT_REGION_MAX_VOLUME)
    }
}
impl AudioSession for StaticAudioSession {
    fn hardware_output_volume(&self) -> f32 {
        self.hardware_output_volume
    }
    fn audio_route_is_headset_in_out(&self) -> bool {
        self.audio_route_is_headset_in_out
    }
    fn switch_to_european_volume(&mut self) {
        self.hardware_output_volume = EUROPEAN_REGION_MAX_VOLUME;
    }
}
