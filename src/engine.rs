// src/engine.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use log::{debug, info, warn};
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use crate::config::EngineConfig;
use crate::drivers::{
    optimize_frequency, AudioDriver, Channel, ChannelConfig, DemodResult, FftDemodulator,
    ImpulseDetector, NoiseBaseline, ScheduledChange, SenseError, SignalMax, StreamFormat,
    WaveType,
};
use crate::types::{EngineCommand, EngineEvent, Target};

// How often a blocked `next_event` looks at the ring again.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Receiver of engine results. Every method is optional.
///
/// Events are delivered on the control thread by
/// [`SignalEngine::dispatch_events`], in buffer order: amplitude, mean
/// amplitude (every `mean_steps` buffers), max amplitude, mean max amplitude
/// (every `mean_steps` buffers), impulse.
pub trait SignalEngineDelegate {
    /// Demodulated value of the analyzer bin for one buffer.
    fn did_update_amplitude(&mut self, _result: &DemodResult) {}
    /// Average amplitude over the last `mean_steps` buffers.
    fn did_update_mean_amplitude(&mut self, _mean_amplitude: f32) {}
    /// Peak absolute sample of one buffer.
    fn did_update_max_amplitude(&mut self, _max_amplitude: f32) {}
    /// Average peak over the last `mean_steps` buffers.
    fn did_update_mean_max_amplitude(&mut self, _mean_max_amplitude: f32) {}
    /// Peak crossed the impulse threshold on a rising edge.
    fn did_recognize_impulse(&mut self, _amplitude: f32) {}
}

/// Forward one event to a delegate. Bookkeeping events are not delivered.
pub fn deliver(event: &EngineEvent, delegate: &mut dyn SignalEngineDelegate) {
    match event {
        EngineEvent::Amplitude(result) => delegate.did_update_amplitude(result),
        EngineEvent::MeanAmplitude(mean) => delegate.did_update_mean_amplitude(*mean),
        EngineEvent::MaxAmplitude(max) => delegate.did_update_max_amplitude(*max),
        EngineEvent::MeanMaxAmplitude(mean) => delegate.did_update_mean_max_amplitude(*mean),
        EngineEvent::Impulse(amplitude) => delegate.did_recognize_impulse(*amplitude),
        EngineEvent::Marker(_)
        | EngineEvent::ScheduledChangeApplied(..)
        | EngineEvent::NoiseCaptured(_)
        | EngineEvent::SignalMaxCaptured(_) => {}
    }
}

// A delayed change and the audio clock value it counts from.
#[derive(Clone, Copy, Debug, PartialEq)]
struct PendingChange {
    change: ScheduledChange,
    issued_at: u64,
}

/// Control-side view of everything the audio thread is configured with.
///
/// Used to seed a fresh renderer on every start.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub left: ChannelConfig,
    pub right: ChannelConfig,
    pub antiphase: bool,
    pub analyzer_frequency: f64,
    pub analyzer_enabled: bool,
    pub impulse_detector_enabled: bool,
    pub impulse_threshold: f32,
    pub mean_steps: usize,
    pub noise: Option<NoiseBaseline>,
    pub signal_max: Option<SignalMax>,
    pending: [Option<PendingChange>; 2],
}
impl EngineSettings {
    fn from_config(config: &EngineConfig) -> Self {
        let channel = ChannelConfig::new(config.frequency, config.amplitude, config.wave_type);
        Self {
            left: channel.clone(),
            right: channel,
            antiphase: false,
            analyzer_frequency: config.frequency,
            analyzer_enabled: config.analyzer_enabled,
            impulse_detector_enabled: config.impulse_detector_enabled,
            impulse_threshold: config.impulse_threshold,
            mean_steps: config.mean_steps,
            noise: None,
            signal_max: None,
            pending: [None, None],
        }
    }
    pub fn channel(&self, channel: Channel) -> &ChannelConfig {
        match channel {
            Channel::Left => &self.left,
            Channel::Right => &self.right,
        }
    }
    /// Delayed change not yet applied to `channel`. While stopped the
    /// countdown shows the buffers still to play after the next start.
    pub fn pending_change(&self, channel: Channel) -> Option<ScheduledChange> {
        self.pending[channel.index()].map(|pending| pending.change)
    }
    fn channels_mut(&mut self, target: Target) -> impl Iterator<Item = &mut ChannelConfig> {
        [(Channel::Left, &mut self.left), (Channel::Right, &mut self.right)]
            .into_iter()
            .filter(move |(channel, _)| target.includes(*channel))
            .map(|(_, config)| config)
    }
    fn set_channel_amplitude(&mut self, channel: Channel, amplitude: f64) {
        for config in self.channels_mut(channel.into()) {
            config.amplitude = amplitude;
        }
    }
    // Keep the mirror in step with changes that originate on the audio thread
    fn observe(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::ScheduledChangeApplied(channel, amplitude) => {
                self.set_channel_amplitude(*channel, *amplitude);
                let slot = &mut self.pending[channel.index()];
                if slot.map_or(false, |p| p.change.amplitude == *amplitude) {
                    *slot = None;
                }
            }
            EngineEvent::NoiseCaptured(noise) => self.noise = Some(*noise),
            EngineEvent::SignalMaxCaptured(max) => self.signal_max = Some(*max),
            _ => {}
        }
    }
    // Carry pending changes over a stop: count off the buffers already
    // played and fold in the ones that came due.
    fn settle_pending(&mut self, clock: u64) {
        for index in 0..self.pending.len() {
            let Some(mut pending) = self.pending[index] else {
                continue;
            };
            let played = clock.saturating_sub(pending.issued_at);
            if played >= pending.change.remaining_buffers {
                self.set_channel_amplitude(pending.change.channel, pending.change.amplitude);
                self.pending[index] = None;
            } else {
                pending.change.remaining_buffers -= played;
                pending.issued_at = 0;
                self.pending[index] = Some(pending);
            }
        }
    }
}

struct RenderLink {
    commands: Sender<EngineCommand>,
    events: HeapConsumer<EngineEvent>,
}

/// Drives the jack: synthesizes the stereo excitation and analyses the
/// captured response through the demodulator and the impulse detector.
///
/// The engine itself lives on the control thread. Each `start` builds a
/// renderer that is moved into the driver's audio callback; the two sides
/// talk only through a command queue and a fixed-size event ring. When the
/// ring is full new events are dropped and counted, see
/// [`SignalEngine::dropped_events`].
pub struct SignalEngine {
    config: EngineConfig,
    driver: Box<dyn AudioDriver>,
    demodulator: FftDemodulator,
    detector: ImpulseDetector,
    settings: EngineSettings,
    link: Option<RenderLink>,
    clock: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
    reported_drops: u64,
    next_marker: u64,
}
impl SignalEngine {
    pub fn new(config: EngineConfig, driver: Box<dyn AudioDriver>) -> Result<Self, SenseError> {
        config.validate()?;
        let mut demodulator = FftDemodulator::new(config.number_of_frames, config.sample_rate)?;
        demodulator.set_frequency(config.frequency)?;
        demodulator.set_mean_steps(config.mean_steps)?;
        let mut detector = ImpulseDetector::new(config.impulse_threshold);
        detector.set_mean_steps(config.mean_steps)?;
        let settings = EngineSettings::from_config(&config);
        Ok(Self {
            config,
            driver,
            demodulator,
            detector,
            settings,
            link: None,
            clock: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
            reported_drops: 0,
            next_marker: 0,
        })
    }
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
    pub fn format(&self) -> StreamFormat {
        StreamFormat {
            sample_rate: self.config.sample_rate,
            number_of_frames: self.config.number_of_frames,
        }
    }
    pub fn is_running(&self) -> bool {
        self.link.is_some()
    }
    /// Buffers rendered since the last start.
    pub fn buffers_rendered(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }
    /// Events lost to a full ring since the last start.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
    pub fn start(&mut self) -> Result<(), SenseError> {
        if self.link.is_some() {
            return Ok(());
        }
        let (command_tx, command_rx) = channel();
        let (event_tx, event_rx) = HeapRb::<EngineEvent>::new(self.config.event_capacity).split();
        let mut demodulator = self.demodulator.clone();
        demodulator.set_frequency(self.settings.analyzer_frequency)?;
        demodulator.set_mean_steps(self.settings.mean_steps)?;
        demodulator.set_noise(self.settings.noise);
        demodulator.set_signal_max(self.settings.signal_max);
        let mut detector = self.detector.clone();
        detector.set_threshold(self.settings.impulse_threshold);
        detector.set_mean_steps(self.settings.mean_steps)?;
        self.clock.store(0, Ordering::Release);
        self.dropped.store(0, Ordering::Relaxed);
        self.reported_drops = 0;
        let mut scheduled = [None, None];
        for (slot, pending) in scheduled.iter_mut().zip(self.settings.pending.iter_mut()) {
            if let Some(pending) = pending {
                pending.issued_at = 0;
                *slot = Some(pending.change);
            }
        }
        let mut renderer = Renderer {
            sample_rate: self.config.sample_rate,
            left: ChannelConfig::new(
                self.settings.left.frequency,
                self.settings.left.amplitude,
                self.settings.left.wave_type,
            ),
            right: ChannelConfig::new(
                self.settings.right.frequency,
                self.settings.right.amplitude,
                self.settings.right.wave_type,
            ),
            antiphase: self.settings.antiphase,
            scheduled,
            analyzer_enabled: self.settings.analyzer_enabled,
            impulse_detector_enabled: self.settings.impulse_detector_enabled,
            demodulator,
            detector,
            commands: command_rx,
            events: event_tx,
            dropped: Arc::clone(&self.dropped),
            clock: Arc::clone(&self.clock),
        };
        let format = self.format();
        self.driver
            .start(
                format,
                Box::new(move |input: &[f32], left: &mut [f32], right: &mut [f32]| {
                    renderer.render(input, left, right)
                }),
            )
            .map_err(|e| {
                warn!("signal engine failed to start: {e}");
                e
            })?;
        self.link = Some(RenderLink {
            commands: command_tx,
            events: event_rx,
        });
        info!(
            "signal engine started ({} Hz, {} frames per buffer)",
            format.sample_rate, format.number_of_frames
        );
        Ok(())
    }
    /// Halt the stream. Events still queued are dropped, so no delegate call
    /// can happen for buffers rendered before this returned. Delayed changes
    /// that have not come due yet resume on the next start.
    pub fn stop(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        self.driver.stop();
        let mut discarded = 0usize;
        while let Some(event) = link.events.pop() {
            self.settings.observe(&event);
            discarded += 1;
        }
        self.settings
            .settle_pending(self.clock.load(Ordering::Acquire));
        info!("signal engine stopped ({discarded} pending events discarded)");
    }
    pub fn reboot(&mut self) -> Result<(), SenseError> {
        info!("rebooting signal engine");
        self.stop();
        self.start()
    }
    /// Nearest frequency with a whole number of cycles per buffer.
    pub fn optimize_frequency(&self, frequency: f64) -> f64 {
        optimize_frequency(
            frequency,
            self.config.sample_rate,
            self.config.number_of_frames,
        )
    }
    /// Set both channels and the analyzer to `frequency`.
    pub fn set_frequency(&mut self, frequency: f64) -> Result<(), SenseError> {
        self.config.check_frequency(frequency)?;
        for config in self.settings.channels_mut(Target::Both) {
            config.frequency = frequency;
        }
        self.settings.analyzer_frequency = frequency;
        debug!("retuned to {frequency} Hz");
        self.send(EngineCommand::Retune(frequency));
        Ok(())
    }
    pub fn set_amplitude(&mut self, amplitude: f64) -> Result<(), SenseError> {
        self.update_amplitude(Target::Both, amplitude)
    }
    pub fn set_wave_type(&mut self, wave_type: WaveType) {
        self.update_wave_type(Target::Both, wave_type);
    }
    pub fn set_channel_frequency(&mut self, channel: Channel, frequency: f64) -> Result<(), SenseError> {
        check_finite("frequency", frequency)?;
        if frequency < 0.0 {
            return Err(SenseError::config(format!(
                "frequency must not be negative, got {frequency}"
            )));
        }
        for config in self.settings.channels_mut(channel.into()) {
            config.frequency = frequency;
        }
        self.send(EngineCommand::SetFrequency(channel.into(), frequency));
        Ok(())
    }
    pub fn set_channel_amplitude(&mut self, channel: Channel, amplitude: f64) -> Result<(), SenseError> {
        self.update_amplitude(channel.into(), amplitude)
    }
    pub fn set_channel_wave_type(&mut self, channel: Channel, wave_type: WaveType) {
        self.update_wave_type(channel.into(), wave_type);
    }
    /// Retarget only the demodulator.
    pub fn set_analyzer_frequency(&mut self, frequency: f64) -> Result<(), SenseError> {
        self.config.check_frequency(frequency)?;
        self.settings.analyzer_frequency = frequency;
        self.send(EngineCommand::SetAnalyzerFrequency(frequency));
        Ok(())
    }
    pub fn set_antiphase(&mut self, antiphase: bool) {
        self.settings.antiphase = antiphase;
        self.send(EngineCommand::SetAntiphase(antiphase));
    }
    /// Change one channel's amplitude once `delay` worth of audio has played.
    ///
    /// The delay is converted to a buffer count on the audio clock, so the
    /// change lands on the first buffer that starts at or after `delay`.
    /// While stopped the count starts with the first buffer of the next
    /// start. A newer request for the same channel replaces a pending one.
    pub fn set_amplitude_after_delay(
        &mut self,
        channel: Channel,
        amplitude: f64,
        delay: Duration,
    ) -> Result<(), SenseError> {
        check_finite("amplitude", amplitude)?;
        let change = ScheduledChange::after_delay(
            channel,
            amplitude,
            delay,
            self.config.sample_rate,
            self.config.number_of_frames,
        );
        debug!(
            "{channel:?} amplitude {amplitude} scheduled in {} buffers",
            change.remaining_buffers
        );
        let slot = &mut self.settings.pending[channel.index()];
        if self.link.is_none() && change.remaining_buffers == 0 {
            *slot = None;
            self.settings.set_channel_amplitude(channel, amplitude);
            return Ok(());
        }
        *slot = Some(PendingChange {
            change,
            issued_at: self.clock.load(Ordering::Acquire),
        });
        self.send(EngineCommand::Schedule(change));
        Ok(())
    }
    pub fn set_analyzer_enabled(&mut self, enabled: bool) {
        self.settings.analyzer_enabled = enabled;
        self.send(EngineCommand::SetAnalyzerEnabled(enabled));
    }
    pub fn set_impulse_detector_enabled(&mut self, enabled: bool) {
        self.settings.impulse_detector_enabled = enabled;
        self.send(EngineCommand::SetImpulseDetectorEnabled(enabled));
    }
    pub fn set_impulse_threshold(&mut self, threshold: f32) {
        self.settings.impulse_threshold = threshold;
        self.send(EngineCommand::SetImpulseThreshold(threshold));
    }
    /// Buffers averaged into one mean amplitude and one mean max amplitude.
    pub fn set_mean_steps(&mut self, mean_steps: usize) -> Result<(), SenseError> {
        if mean_steps == 0 {
            return Err(SenseError::config("mean steps must be at least one"));
        }
        self.settings.mean_steps = mean_steps;
        self.send(EngineCommand::SetMeanSteps(mean_steps));
        Ok(())
    }
    pub fn reset_mean(&mut self) {
        self.send(EngineCommand::ResetMean);
    }
    /// Store the analyzer bin of the latest buffer as the noise baseline.
    /// The captured value shows up in `settings()` once its event is consumed.
    pub fn capture_noise_baseline(&mut self) {
        self.send(EngineCommand::CaptureNoise);
    }
    pub fn set_noise_baseline(&mut self, noise: NoiseBaseline) {
        self.settings.noise = Some(noise);
        self.send(EngineCommand::SetNoise(Some(noise)));
    }
    pub fn clear_noise_baseline(&mut self) {
        self.settings.noise = None;
        self.send(EngineCommand::SetNoise(None));
    }
    /// Store the analyzer bin of the latest buffer as the full-response
    /// reference used for `DemodResult::relative_amplitude`.
    pub fn capture_signal_max(&mut self) {
        self.send(EngineCommand::CaptureSignalMax);
    }
    pub fn set_signal_max(&mut self, signal_max: SignalMax) {
        self.settings.signal_max = Some(signal_max);
        self.send(EngineCommand::SetSignalMax(Some(signal_max)));
    }
    pub fn clear_signal_max(&mut self) {
        self.settings.signal_max = None;
        self.send(EngineCommand::SetSignalMax(None));
    }
    /// Queue a marker; `EngineEvent::Marker(id)` is published at the start of
    /// the first buffer rendered after every command sent before it.
    pub fn mark(&mut self) -> u64 {
        self.next_marker += 1;
        let id = self.next_marker;
        self.send(EngineCommand::Mark(id));
        id
    }
    /// Wait up to `timeout` for the next event. `Ok(None)` on timeout.
    pub fn next_event(&mut self, timeout: Duration) -> Result<Option<EngineEvent>, SenseError> {
        let deadline = Instant::now() + timeout;
        loop {
            let Some(link) = self.link.as_mut() else {
                return Err(SenseError::hardware("signal engine is not running"));
            };
            if let Some(event) = link.events.pop() {
                self.settings.observe(&event);
                return Ok(Some(event));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(EVENT_POLL_INTERVAL.min(deadline - now));
        }
    }
    /// Deliver every queued event to `delegate`. Returns how many were consumed.
    pub fn dispatch_events(&mut self, delegate: &mut dyn SignalEngineDelegate) -> usize {
        let mut count = 0;
        while let Some(event) = self.link.as_mut().and_then(|link| link.events.pop()) {
            self.settings.observe(&event);
            deliver(&event, delegate);
            count += 1;
        }
        let dropped = self.dropped_events();
        if dropped > self.reported_drops {
            warn!(
                "{} engine events dropped on a full queue; dispatch more often",
                dropped - self.reported_drops
            );
            self.reported_drops = dropped;
        }
        count
    }
    /// Throw away every queued event without delivering it.
    pub fn discard_events(&mut self) -> usize {
        let mut count = 0;
        while let Some(event) = self.link.as_mut().and_then(|link| link.events.pop()) {
            self.settings.observe(&event);
            count += 1;
        }
        count
    }
    fn update_amplitude(&mut self, target: Target, amplitude: f64) -> Result<(), SenseError> {
        check_finite("amplitude", amplitude)?;
        for config in self.settings.channels_mut(target) {
            config.amplitude = amplitude;
        }
        self.send(EngineCommand::SetAmplitude(target, amplitude));
        Ok(())
    }
    fn update_wave_type(&mut self, target: Target, wave_type: WaveType) {
        for config in self.settings.channels_mut(target) {
            config.wave_type = wave_type;
        }
        self.send(EngineCommand::SetWaveType(target, wave_type));
    }
    fn send(&self, command: EngineCommand) {
        if let Some(link) = &self.link {
            if link.commands.send(command).is_err() {
                warn!("audio thread is gone; command dropped");
            }
        }
    }
}
impl Drop for SignalEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
fn check_finite(name: &str, value: f64) -> Result<(), SenseError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SenseError::config(format!("{name} must be finite, got {value}")))
    }
}

// Audio-thread half of the engine. Never blocks, never logs and never
// allocates for events.
struct Renderer {
    sample_rate: f64,
    left: ChannelConfig,
    right: ChannelConfig,
    antiphase: bool,
    scheduled: [Option<ScheduledChange>; 2],
    analyzer_enabled: bool,
    impulse_detector_enabled: bool,
    demodulator: FftDemodulator,
    detector: ImpulseDetector,
    commands: Receiver<EngineCommand>,
    events: HeapProducer<EngineEvent>,
    dropped: Arc<AtomicU64>,
    clock: Arc<AtomicU64>,
}
impl Renderer {
    fn render(&mut self, input: &[f32], left: &mut [f32], right: &mut [f32]) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
        self.left.render(self.sample_rate, left);
        self.right.render(self.sample_rate, right);
        if self.antiphase {
            for sample in right.iter_mut() {
                *sample = -*sample;
            }
        }
        self.advance_schedule();
        self.clock.fetch_add(1, Ordering::AcqRel);
        if self.analyzer_enabled {
            let output = self.demodulator.process(input);
            self.emit(EngineEvent::Amplitude(output.result));
            if let Some(mean) = output.mean {
                self.emit(EngineEvent::MeanAmplitude(mean));
            }
        }
        if self.impulse_detector_enabled {
            let reading = self.detector.process(input);
            self.emit(EngineEvent::MaxAmplitude(reading.max_amplitude));
            if let Some(mean) = reading.mean_max_amplitude {
                self.emit(EngineEvent::MeanMaxAmplitude(mean));
            }
            if reading.impulse {
                self.emit(EngineEvent::Impulse(reading.max_amplitude));
            }
        }
    }
    fn apply(&mut self, command: EngineCommand) {
        // Values were validated on the control side before being queued.
        match command {
            EngineCommand::SetFrequency(target, frequency) => {
                self.for_each_channel(target, |c| c.frequency = frequency)
            }
            EngineCommand::SetAmplitude(target, amplitude) => {
                self.for_each_channel(target, |c| c.amplitude = amplitude)
            }
            EngineCommand::SetWaveType(target, wave_type) => {
                self.for_each_channel(target, |c| c.wave_type = wave_type)
            }
            EngineCommand::SetAnalyzerFrequency(frequency) => {
                let _ = self.demodulator.set_frequency(frequency);
            }
            EngineCommand::Retune(frequency) => {
                self.for_each_channel(Target::Both, |c| c.frequency = frequency);
                let _ = self.demodulator.set_frequency(frequency);
            }
            EngineCommand::SetAntiphase(antiphase) => self.antiphase = antiphase,
            EngineCommand::Schedule(change) => {
                if change.remaining_buffers == 0 {
                    self.apply_change(change);
                    self.scheduled[change.channel.index()] = None;
                } else {
                    self.scheduled[change.channel.index()] = Some(change);
                }
            }
            EngineCommand::SetAnalyzerEnabled(enabled) => {
                if enabled && !self.analyzer_enabled {
                    self.demodulator.reset_mean();
                }
                self.analyzer_enabled = enabled;
            }
            EngineCommand::SetImpulseDetectorEnabled(enabled) => {
                if enabled && !self.impulse_detector_enabled {
                    self.detector.reset();
                    self.detector.reset_mean();
                }
                self.impulse_detector_enabled = enabled;
            }
            EngineCommand::SetImpulseThreshold(threshold) => self.detector.set_threshold(threshold),
            EngineCommand::SetMeanSteps(mean_steps) => {
                let _ = self.demodulator.set_mean_steps(mean_steps);
                let _ = self.detector.set_mean_steps(mean_steps);
            }
            EngineCommand::ResetMean => {
                self.demodulator.reset_mean();
                self.detector.reset_mean();
            }
            EngineCommand::CaptureNoise => {
                self.demodulator.capture_noise();
                if let Some(noise) = self.demodulator.noise() {
                    self.emit(EngineEvent::NoiseCaptured(noise));
                }
            }
            EngineCommand::SetNoise(noise) => self.demodulator.set_noise(noise),
            EngineCommand::CaptureSignalMax => {
                self.demodulator.capture_signal_max();
                if let Some(max) = self.demodulator.signal_max() {
                    self.emit(EngineEvent::SignalMaxCaptured(max));
                }
            }
            EngineCommand::SetSignalMax(max) => self.demodulator.set_signal_max(max),
            EngineCommand::Mark(id) => self.emit(EngineEvent::Marker(id)),
        }
    }
    fn advance_schedule(&mut self) {
        for index in 0..self.scheduled.len() {
            let due = match self.scheduled[index].as_mut() {
                Some(change) => change.tick(),
                None => false,
            };
            if due {
                if let Some(change) = self.scheduled[index].take() {
                    self.apply_change(change);
                }
            }
        }
    }
    fn apply_change(&mut self, change: ScheduledChange) {
        self.for_each_channel(change.channel.into(), |c| c.amplitude = change.amplitude);
        self.emit(EngineEvent::ScheduledChangeApplied(
            change.channel,
            change.amplitude,
        ));
    }
    fn for_each_channel(&mut self, target: Target, mut update: impl FnMut(&mut ChannelConfig)) {
        if target.includes(Channel::Left) {
            update(&mut self.left);
        }
        if target.includes(Channel::Right) {
            update(&mut self.right);
        }
    }
    fn emit(&mut self, event: EngineEvent) {
        if self.events.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
