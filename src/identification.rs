// src/identification.rs
//! Sensor identification over the audio jack.
//!
//! The probe sequence drives the two output channels at four amplitude
//! combinations and measures the demodulated response to each. The four
//! averages form a fingerprint that is matched against known references.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use log::{debug, info, warn};
use crate::config::{IdentificationConfig, ReferenceFingerprint};
use crate::drivers::{Channel, SenseError, WaveType};
use crate::engine::SignalEngine;
use crate::session::AudioSession;
use crate::types::{EngineEvent, ProbeTrial, SensorFingerprint, SensorType};

pub const LEFT_BIT_ONE_AMPLITUDE: f64 = 1.0;
pub const LEFT_BIT_ZERO_AMPLITUDE: f64 = 0.2;
pub const RIGHT_BIT_ONE_AMPLITUDE: f64 = 1.0;
pub const RIGHT_BIT_ZERO_AMPLITUDE: f64 = 0.0;

/// Drive levels `(left, right)` for one trial.
pub fn probe_amplitudes(trial: ProbeTrial) -> (f64, f64) {
    let left = if trial.left_bit() {
        LEFT_BIT_ONE_AMPLITUDE
    } else {
        LEFT_BIT_ZERO_AMPLITUDE
    };
    let right = if trial.right_bit() {
        RIGHT_BIT_ONE_AMPLITUDE
    } else {
        RIGHT_BIT_ZERO_AMPLITUDE
    };
    (left, right)
}

/// Nearest reference within `threshold`, or `Unknown`.
pub fn classify(
    fingerprint: &SensorFingerprint,
    references: &[ReferenceFingerprint],
    threshold: f64,
) -> SensorType {
    references
        .iter()
        .map(|r| (r.sensor, fingerprint.distance(&r.fingerprint)))
        .filter(|(_, distance)| *distance <= threshold)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(sensor, _)| sensor)
        .unwrap_or(SensorType::Unknown)
}

/// Receiver of identification progress. Only `did_recognize_sensor` is required.
pub trait IdentificatorDelegate {
    fn did_recognize_sensor(&mut self, sensor: SensorType);
    fn did_obtain_trial_amplitude(&mut self, _trial: ProbeTrial, _amplitude: f64) {}
    fn did_obtain_fingerprint(&mut self, _fingerprint: &SensorFingerprint) {}
    /// `true` when the output is held below the level the probes need.
    fn did_recognize_device_volume_limit_state(&mut self, _limited: bool) {}
    fn did_recognize_device_microphone_level(&mut self, _level: f32) {}
    /// Answer with `user_granted_permission_to_switch_to_eu` or
    /// `user_prohibited_permission_to_switch_to_eu`.
    fn ask_to_grant_permission_to_switch_to_eu(&mut self) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentificationState {
    Idle,
    Probing(ProbeTrial),
    AwaitingPermission(ProbeTrial),
    Classifying,
}

/// How a call into the protocol returned control to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentificationOutcome {
    Recognized(SensorType),
    /// Suspended until the user answers the volume permission request.
    PermissionRequired,
    /// The user refused the volume switch; no classification was made.
    Declined,
    Aborted,
}

/// Cancels an attempt from any thread.
///
/// Every delegate call runs behind the same gate, so once `abort()` returns
/// no further callback of the attempt will fire. Aborting from inside a
/// callback is allowed; later callbacks are suppressed.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    inner: Arc<AbortState>,
}
#[derive(Debug, Default)]
struct AbortState {
    aborted: AtomicBool,
    gate: Mutex<()>,
    // thread currently inside a delegate call
    reporter: Mutex<Option<ThreadId>>,
}
impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        if *lock(&self.inner.reporter) == Some(thread::current().id()) {
            return;
        }
        // Wait out a callback that is already running on another thread.
        drop(lock(&self.inner.gate));
    }
    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }
    fn reset(&self) {
        self.inner.aborted.store(false, Ordering::SeqCst);
    }
    /// Run `report` behind the gate unless aborted.
    fn report_unless_aborted<R>(&self, report: impl FnOnce() -> R) -> Option<R> {
        let _gate = lock(&self.inner.gate);
        if self.is_aborted() {
            return None;
        }
        *lock(&self.inner.reporter) = Some(thread::current().id());
        let result = report();
        *lock(&self.inner.reporter) = None;
        Some(result)
    }
}
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Settle-then-sample accumulator for one trial. Each buffer brings an
/// amplitude followed by its max amplitude.
struct TrialWindow {
    settle: usize,
    samples: usize,
    skipped: usize,
    // whether the current buffer's amplitude went into the average
    sampling: bool,
    sum: f64,
    count: usize,
    peak: f32,
}
impl TrialWindow {
    fn new(settle: usize, samples: usize) -> Self {
        Self {
            settle,
            samples,
            skipped: 0,
            sampling: false,
            sum: 0.0,
            count: 0,
            peak: 0.0,
        }
    }
    fn amplitude(&mut self, amplitude: f32) {
        self.sampling = self.skipped >= self.settle;
        if self.sampling {
            self.sum += f64::from(amplitude);
            self.count += 1;
        } else {
            self.skipped += 1;
        }
    }
    /// Closes the buffer. Returns the mean amplitude and peak once the
    /// window is full.
    fn max_amplitude(&mut self, max: f32) -> Option<(f64, f32)> {
        if !self.sampling {
            return None;
        }
        self.peak = self.peak.max(max);
        (self.count == self.samples).then(|| (self.sum / self.count as f64, self.peak))
    }
}

/// Runs the probe sequence against a borrowed engine and session.
pub struct Identificator<'a> {
    engine: &'a mut SignalEngine,
    session: &'a mut dyn AudioSession,
    delegate: &'a mut dyn IdentificatorDelegate,
    config: IdentificationConfig,
    state: IdentificationState,
    abort: AbortHandle,
    amplitudes: [f64; 4],
    permission_granted: bool,
    reported_volume_limit: Option<bool>,
    microphone_level: f32,
}
impl<'a> Identificator<'a> {
    pub fn new(
        engine: &'a mut SignalEngine,
        session: &'a mut dyn AudioSession,
        delegate: &'a mut dyn IdentificatorDelegate,
        config: IdentificationConfig,
    ) -> Self {
        Self {
            engine,
            session,
            delegate,
            config,
            state: IdentificationState::Idle,
            abort: AbortHandle::new(),
            amplitudes: [0.0; 4],
            permission_granted: false,
            reported_volume_limit: None,
            microphone_level: 0.0,
        }
    }
    /// Share an abort handle created before the delegate was borrowed.
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }
    pub fn state(&self) -> IdentificationState {
        self.state
    }
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }
    pub fn config(&self) -> &IdentificationConfig {
        &self.config
    }

    /// Start a new attempt and run it as far as it can go without the user.
    pub fn identificate(&mut self) -> Result<IdentificationOutcome, SenseError> {
        if self.state != IdentificationState::Idle {
            return Err(SenseError::InvalidState(format!(
                "identification already in progress ({:?})",
                self.state
            )));
        }
        self.config.validate()?;
        self.abort.reset();
        self.amplitudes = [0.0; 4];
        self.permission_granted = false;
        self.reported_volume_limit = None;
        self.microphone_level = 0.0;
        info!("identification started");

        if !self.session.audio_route_is_headset_in_out() {
            info!("audio route is not a headset in/out route; nothing to probe");
            return Ok(self.report(SensorType::Unknown));
        }
        let frequency = self.engine.optimize_frequency(self.config.probe_frequency);
        self.engine.set_wave_type(WaveType::Sine);
        self.engine.set_antiphase(false);
        self.engine.set_frequency(frequency)?;
        self.engine.set_analyzer_enabled(true);
        self.engine.set_impulse_detector_enabled(true);
        let stale = self.engine.discard_events();
        debug!("probing at {frequency} Hz ({stale} stale events dropped)");
        self.run_from(0)
    }

    /// Switch the session to the European volume ceiling and resume the
    /// suspended trial.
    pub fn user_granted_permission_to_switch_to_eu(
        &mut self,
    ) -> Result<IdentificationOutcome, SenseError> {
        let trial = self.pending_trial()?;
        info!("permission granted; switching to the European volume profile");
        self.session.switch_to_european_volume();
        self.permission_granted = true;
        self.volume_limited();
        self.run_from(trial.index())
    }

    /// Give up the suspended attempt without a classification.
    pub fn user_prohibited_permission_to_switch_to_eu(
        &mut self,
    ) -> Result<IdentificationOutcome, SenseError> {
        self.pending_trial()?;
        info!("permission to raise the volume was refused; identification stopped");
        self.halt();
        Ok(IdentificationOutcome::Declined)
    }

    /// Stop the attempt. Safe in any state.
    pub fn abort_identification(&mut self) {
        self.abort.abort();
        if self.state != IdentificationState::Idle {
            info!("identification aborted in state {:?}", self.state);
            self.halt();
        }
    }

    fn pending_trial(&self) -> Result<ProbeTrial, SenseError> {
        match self.state {
            IdentificationState::AwaitingPermission(trial) => Ok(trial),
            state => Err(SenseError::InvalidState(format!(
                "no permission request is pending ({state:?})"
            ))),
        }
    }

    fn run_from(&mut self, first: usize) -> Result<IdentificationOutcome, SenseError> {
        for trial in ProbeTrial::SEQUENCE.into_iter().skip(first) {
            if self.abort.is_aborted() {
                return Ok(self.finish_aborted());
            }
            if !self.permission_granted && self.volume_limited() {
                // Nothing plays while the user decides.
                self.engine.stop();
                self.state = IdentificationState::AwaitingPermission(trial);
                if !self.notify(|d| d.ask_to_grant_permission_to_switch_to_eu()) {
                    return Ok(self.finish_aborted());
                }
                return Ok(IdentificationOutcome::PermissionRequired);
            }
            self.state = IdentificationState::Probing(trial);
            if let Err(e) = self.engine.start() {
                self.halt();
                return Err(e);
            }
            let amplitude = match self.probe(trial) {
                Ok(Some(amplitude)) => amplitude,
                Ok(None) => return Ok(self.finish_aborted()),
                Err(e) => {
                    warn!("identification failed during trial {trial:?}: {e}");
                    self.halt();
                    return Err(e);
                }
            };
            debug!("trial {trial:?}: amplitude {amplitude:.4}");
            self.amplitudes[trial.index()] = amplitude;
            if !self.notify(|d| d.did_obtain_trial_amplitude(trial, amplitude)) {
                return Ok(self.finish_aborted());
            }
        }

        self.state = IdentificationState::Classifying;
        self.engine.stop();
        let fingerprint = SensorFingerprint::from_array(self.amplitudes);
        let microphone_level = self.microphone_level;
        let delivered = self.notify(|d| d.did_obtain_fingerprint(&fingerprint))
            && self.notify(|d| d.did_recognize_device_microphone_level(microphone_level));
        if !delivered {
            return Ok(self.finish_aborted());
        }
        let sensor = classify(
            &fingerprint,
            &self.config.references,
            self.config.identification_threshold,
        );
        info!(
            "fingerprint {:?} recognized as {sensor}",
            fingerprint.to_array()
        );
        Ok(self.report(sensor))
    }

    /// Checks the output level and reports changes of the limit state.
    fn volume_limited(&mut self) -> bool {
        let volume = self.session.hardware_output_volume();
        let limited = volume < self.config.device_volume_limit_threshold;
        if self.reported_volume_limit != Some(limited) {
            debug!("output volume {volume:.2}, limited: {limited}");
            self.reported_volume_limit = Some(limited);
            self.notify(|d| d.did_recognize_device_volume_limit_state(limited));
        }
        limited
    }

    /// Drive one trial and average its settled response. `None` when aborted.
    fn probe(&mut self, trial: ProbeTrial) -> Result<Option<f64>, SenseError> {
        let (left, right) = probe_amplitudes(trial);
        self.engine.set_channel_amplitude(Channel::Left, left)?;
        self.engine.set_channel_amplitude(Channel::Right, right)?;
        let marker = self.engine.mark();
        let timeout = self.config.buffer_timeout();

        let mut started = false;
        let mut window = TrialWindow::new(self.config.settle_buffers, self.config.sample_buffers);
        loop {
            if self.abort.is_aborted() {
                return Ok(None);
            }
            let event = self.engine.next_event(timeout)?.ok_or_else(|| {
                SenseError::hardware(format!(
                    "no audio buffer within {} ms",
                    self.config.buffer_timeout_ms
                ))
            })?;
            match event {
                EngineEvent::Marker(id) if id == marker => started = true,
                EngineEvent::Amplitude(result) if started => window.amplitude(result.amplitude),
                EngineEvent::MaxAmplitude(max) if started => {
                    if let Some((mean, peak)) = window.max_amplitude(max) {
                        if trial == ProbeTrial::Bits11 {
                            self.microphone_level = peak;
                        }
                        return Ok(Some(mean));
                    }
                }
                _ => {}
            }
        }
    }

    /// Deliver one delegate call unless the attempt was aborted.
    fn notify(&mut self, call: impl FnOnce(&mut (dyn IdentificatorDelegate + 'a))) -> bool {
        let delegate = &mut *self.delegate;
        self.abort
            .report_unless_aborted(|| call(delegate))
            .is_some()
    }

    fn report(&mut self, sensor: SensorType) -> IdentificationOutcome {
        let reported = self.notify(|d| d.did_recognize_sensor(sensor));
        self.state = IdentificationState::Idle;
        if reported {
            IdentificationOutcome::Recognized(sensor)
        } else {
            IdentificationOutcome::Aborted
        }
    }

    fn finish_aborted(&mut self) -> IdentificationOutcome {
        info!("identification aborted");
        self.halt();
        IdentificationOutcome::Aborted
    }

    fn halt(&mut self) {
        self.engine.stop();
        self.state = IdentificationState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::drivers::{LoopbackDriver, ManualDriver, SensorModel};
    use crate::session::StaticAudioSession;
    use std::time::Duration;

    #[derive(Default)]
    struct Observer {
        sensors: Vec<SensorType>,
        trials: Vec<(ProbeTrial, f64)>,
        fingerprint: Option<SensorFingerprint>,
        volume_states: Vec<bool>,
        permission_requests: usize,
        microphone_level: Option<f32>,
        abort_after_trials: Option<(usize, AbortHandle)>,
        abort_returned: Option<Arc<AtomicBool>>,
        calls_after_abort: usize,
    }
    impl Observer {
        fn check_late(&mut self) {
            if let Some(returned) = &self.abort_returned {
                if returned.load(Ordering::SeqCst) {
                    self.calls_after_abort += 1;
                }
            }
        }
    }
    impl IdentificatorDelegate for Observer {
        fn did_recognize_sensor(&mut self, sensor: SensorType) {
            self.check_late();
            self.sensors.push(sensor);
        }
        fn did_obtain_trial_amplitude(&mut self, trial: ProbeTrial, amplitude: f64) {
            self.check_late();
            self.trials.push((trial, amplitude));
            if let Some((after, handle)) = &self.abort_after_trials {
                if self.trials.len() == *after {
                    handle.abort();
                }
            }
        }
        fn did_obtain_fingerprint(&mut self, fingerprint: &SensorFingerprint) {
            self.check_late();
            self.fingerprint = Some(*fingerprint);
        }
        fn did_recognize_device_volume_limit_state(&mut self, limited: bool) {
            self.check_late();
            self.volume_states.push(limited);
        }
        fn did_recognize_device_microphone_level(&mut self, level: f32) {
            self.check_late();
            self.microphone_level = Some(level);
        }
        fn ask_to_grant_permission_to_switch_to_eu(&mut self) {
            self.check_late();
            self.permission_requests += 1;
        }
    }

    fn engine_for(model: SensorModel) -> SignalEngine {
        let driver = LoopbackDriver::new(model).paced(false);
        SignalEngine::new(EngineConfig::default(), Box::new(driver)).unwrap()
    }

    fn quick_config() -> IdentificationConfig {
        IdentificationConfig {
            settle_buffers: 2,
            sample_buffers: 3,
            ..IdentificationConfig::default()
        }
    }

    #[test]
    fn probe_levels_follow_trial_bits() {
        assert_eq!(probe_amplitudes(ProbeTrial::Bits00), (0.2, 0.0));
        assert_eq!(probe_amplitudes(ProbeTrial::Bits01), (0.2, 1.0));
        assert_eq!(probe_amplitudes(ProbeTrial::Bits10), (1.0, 0.0));
        assert_eq!(probe_amplitudes(ProbeTrial::Bits11), (1.0, 1.0));
    }

    #[test]
    fn classify_matches_reference_exactly() {
        let references = IdentificationConfig::default().references;
        for reference in &references {
            assert_eq!(
                classify(&reference.fingerprint, &references, 0.08),
                reference.sensor
            );
        }
    }

    #[test]
    fn classify_rejects_far_fingerprint() {
        let references = IdentificationConfig::default().references;
        let far = SensorFingerprint::from_array([0.9, 0.9, 0.9, 0.9]);
        assert_eq!(classify(&far, &references, 0.08), SensorType::Unknown);
        let silent = SensorFingerprint::default();
        assert_eq!(classify(&silent, &references, 0.08), SensorType::Unknown);
    }

    #[test]
    fn classify_picks_nearest_within_threshold() {
        let references = vec![
            ReferenceFingerprint::new(SensorType::Nitrates, [0.10, 0.10, 0.10, 0.10]),
            ReferenceFingerprint::new(SensorType::Fields, [0.14, 0.10, 0.10, 0.10]),
        ];
        let measured = SensorFingerprint::from_array([0.13, 0.10, 0.10, 0.10]);
        assert_eq!(classify(&measured, &references, 0.08), SensorType::Fields);
        assert_eq!(classify(&measured, &references, 0.005), SensorType::Unknown);
    }

    #[test]
    fn identifies_every_preset_sensor() {
        for sensor in [
            SensorType::Nitrates,
            SensorType::Fields,
            SensorType::Radiation,
            SensorType::Humidity,
        ] {
            let mut engine = engine_for(SensorModel::preset(sensor));
            let mut session = StaticAudioSession::default();
            let mut observer = Observer::default();
            let outcome = Identificator::new(&mut engine, &mut session, &mut observer, quick_config())
                .identificate()
                .unwrap();
            assert_eq!(outcome, IdentificationOutcome::Recognized(sensor));
            assert_eq!(observer.sensors, vec![sensor]);
            let order: Vec<ProbeTrial> = observer.trials.iter().map(|t| t.0).collect();
            assert_eq!(order, ProbeTrial::SEQUENCE.to_vec());
            assert!(observer.fingerprint.is_some());
            assert_eq!(observer.volume_states, vec![false]);
            assert!(!engine.is_running());
        }
    }

    #[test]
    fn microphone_peak_covers_only_sampled_buffers() {
        let mut window = TrialWindow::new(2, 3);
        // settling buffers carry a loud transient
        for _ in 0..2 {
            window.amplitude(0.9);
            assert_eq!(window.max_amplitude(0.95), None);
        }
        window.amplitude(0.4);
        assert_eq!(window.max_amplitude(0.5), None);
        window.amplitude(0.4);
        assert_eq!(window.max_amplitude(0.6), None);
        window.amplitude(0.4);
        let (mean, peak) = window.max_amplitude(0.55).unwrap();
        assert!((mean - 0.4).abs() < 1e-6);
        assert_eq!(peak, 0.6);
    }

    #[test]
    fn fingerprint_tracks_channel_gains() {
        let mut engine = engine_for(SensorModel::preset(SensorType::Humidity));
        let mut session = StaticAudioSession::default();
        let mut observer = Observer::default();
        Identificator::new(&mut engine, &mut session, &mut observer, quick_config())
            .identificate()
            .unwrap();
        let measured = observer.fingerprint.unwrap().to_array();
        for (got, want) in measured.iter().zip([0.09, 0.44, 0.45, 0.80]) {
            assert!((got - want).abs() < 0.01, "{got} vs {want}");
        }
        let level = observer.microphone_level.unwrap();
        assert!(level > 0.75 && level < 0.85, "microphone level {level}");
    }

    #[test]
    fn open_jack_is_unknown() {
        let mut engine = engine_for(SensorModel::open_jack());
        let mut session = StaticAudioSession::default();
        let mut observer = Observer::default();
        let outcome = Identificator::new(&mut engine, &mut session, &mut observer, quick_config())
            .identificate()
            .unwrap();
        assert_eq!(outcome, IdentificationOutcome::Recognized(SensorType::Unknown));
        assert_eq!(observer.sensors, vec![SensorType::Unknown]);
    }

    #[test]
    fn non_headset_route_is_unknown_without_probing() {
        let mut engine = engine_for(SensorModel::preset(SensorType::Fields));
        let mut session = StaticAudioSession {
            audio_route_is_headset_in_out: false,
            ..StaticAudioSession::default()
        };
        let mut observer = Observer::default();
        let outcome = Identificator::new(&mut engine, &mut session, &mut observer, quick_config())
            .identificate()
            .unwrap();
        assert_eq!(outcome, IdentificationOutcome::Recognized(SensorType::Unknown));
        assert!(observer.trials.is_empty());
        assert!(!engine.is_running());
    }

    #[test]
    fn abort_after_second_trial_suppresses_classification() {
        let mut engine = engine_for(SensorModel::preset(SensorType::Nitrates));
        let mut session = StaticAudioSession::default();
        let handle = AbortHandle::new();
        let mut observer = Observer {
            abort_after_trials: Some((2, handle.clone())),
            ..Observer::default()
        };
        let mut identificator =
            Identificator::new(&mut engine, &mut session, &mut observer, quick_config())
                .with_abort_handle(handle);
        let outcome = identificator.identificate().unwrap();
        assert_eq!(outcome, IdentificationOutcome::Aborted);
        assert_eq!(identificator.state(), IdentificationState::Idle);
        drop(identificator);
        assert_eq!(observer.trials.len(), 2);
        assert!(observer.sensors.is_empty());
        assert!(observer.fingerprint.is_none());
        assert!(!engine.is_running());
    }

    #[test]
    fn abort_during_last_trial_suppresses_remaining_callbacks() {
        let mut engine = engine_for(SensorModel::preset(SensorType::Fields));
        let mut session = StaticAudioSession::default();
        let handle = AbortHandle::new();
        let mut observer = Observer {
            abort_after_trials: Some((4, handle.clone())),
            ..Observer::default()
        };
        let outcome = Identificator::new(&mut engine, &mut session, &mut observer, quick_config())
            .with_abort_handle(handle)
            .identificate()
            .unwrap();
        assert_eq!(outcome, IdentificationOutcome::Aborted);
        assert_eq!(observer.trials.len(), 4);
        assert!(observer.fingerprint.is_none());
        assert!(observer.microphone_level.is_none());
        assert!(observer.sensors.is_empty());
        assert!(!engine.is_running());
    }

    #[test]
    fn abort_from_another_thread_stops_all_callbacks() {
        let driver = LoopbackDriver::new(SensorModel::preset(SensorType::Humidity));
        let mut engine = SignalEngine::new(EngineConfig::default(), Box::new(driver)).unwrap();
        let mut session = StaticAudioSession::default();
        let handle = AbortHandle::new();
        let returned = Arc::new(AtomicBool::new(false));
        let mut observer = Observer {
            abort_returned: Some(Arc::clone(&returned)),
            ..Observer::default()
        };
        let aborter = {
            let handle = handle.clone();
            let returned = Arc::clone(&returned);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(150));
                handle.abort();
                returned.store(true, Ordering::SeqCst);
            })
        };
        let outcome = Identificator::new(
            &mut engine,
            &mut session,
            &mut observer,
            IdentificationConfig::default(),
        )
        .with_abort_handle(handle)
        .identificate()
        .unwrap();
        aborter.join().unwrap();
        assert_eq!(outcome, IdentificationOutcome::Aborted);
        assert_eq!(observer.calls_after_abort, 0);
        assert!(observer.sensors.is_empty());
        assert!(observer.trials.len() < 4);
        assert!(!engine.is_running());
    }

    #[test]
    fn abort_from_inside_a_callback_does_not_block() {
        let handle = AbortHandle::new();
        let inner = handle.clone();
        let delivered = handle.report_unless_aborted(|| {
            inner.abort();
            inner.is_aborted()
        });
        assert_eq!(delivered, Some(true));
        assert_eq!(handle.report_unless_aborted(|| ()), None);
    }

    #[test]
    fn limited_volume_waits_for_permission_then_resumes() {
        let mut engine = engine_for(SensorModel::preset(SensorType::Radiation));
        let mut session = StaticAudioSession::new(0.1);
        let mut observer = Observer::default();
        let mut identificator =
            Identificator::new(&mut engine, &mut session, &mut observer, quick_config());
        assert_eq!(
            identificator.identificate().unwrap(),
            IdentificationOutcome::PermissionRequired
        );
        assert_eq!(
            identificator.state(),
            IdentificationState::AwaitingPermission(ProbeTrial::Bits00)
        );
        assert!(identificator.identificate().is_err());
        assert_eq!(
            identificator.user_granted_permission_to_switch_to_eu().unwrap(),
            IdentificationOutcome::Recognized(SensorType::Radiation)
        );
        drop(identificator);
        assert_eq!(session.hardware_output_volume, 1.0);
        assert_eq!(observer.volume_states, vec![true, false]);
        assert_eq!(observer.permission_requests, 1);
        assert_eq!(observer.sensors, vec![SensorType::Radiation]);
    }

    #[test]
    fn refused_permission_ends_without_classification() {
        let mut engine = engine_for(SensorModel::preset(SensorType::Fields));
        let mut session = StaticAudioSession::new(0.05);
        let mut observer = Observer::default();
        let mut identificator =
            Identificator::new(&mut engine, &mut session, &mut observer, quick_config());
        identificator.identificate().unwrap();
        assert_eq!(
            identificator.user_prohibited_permission_to_switch_to_eu().unwrap(),
            IdentificationOutcome::Declined
        );
        assert_eq!(identificator.state(), IdentificationState::Idle);
        assert!(identificator.user_granted_permission_to_switch_to_eu().is_err());
        drop(identificator);
        assert!(observer.sensors.is_empty());
        assert!(!engine.is_running());
        assert_eq!(session.hardware_output_volume, 0.05);
    }

    #[test]
    fn abort_while_awaiting_permission_returns_to_idle() {
        let mut engine = engine_for(SensorModel::preset(SensorType::Fields));
        let mut session = StaticAudioSession::new(0.0);
        let mut observer = Observer::default();
        let mut identificator =
            Identificator::new(&mut engine, &mut session, &mut observer, quick_config());
        identificator.identificate().unwrap();
        identificator.abort_identification();
        assert_eq!(identificator.state(), IdentificationState::Idle);
        assert!(identificator.abort_handle().is_aborted());
        assert!(identificator.user_granted_permission_to_switch_to_eu().is_err());
    }

    #[test]
    fn stalled_stream_is_a_hardware_error() {
        // A manual driver nobody pumps never delivers a buffer.
        let driver = ManualDriver::new();
        let mut engine = SignalEngine::new(EngineConfig::default(), Box::new(driver)).unwrap();
        let mut session = StaticAudioSession::default();
        let mut observer = Observer::default();
        let config = IdentificationConfig {
            buffer_timeout_ms: 20,
            ..quick_config()
        };
        let mut identificator = Identificator::new(&mut engine, &mut session, &mut observer, config);
        let err = identificator.identificate().unwrap_err();
        assert!(matches!(err, SenseError::HardwareUnavailable(_)));
        assert_eq!(identificator.state(), IdentificationState::Idle);
        drop(identificator);
        assert!(!engine.is_running());
        assert!(observer.sensors.is_empty());
    }
}
