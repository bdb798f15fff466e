use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use beatlock_analyzer::TempoAnalysis;
use beatlock_audio::{
    AudioDecoder, AudioEngine, AudioError, PlaybackClock, PlaybackSource, TimeSource, ToneSpec,
};
use beatlock_domain::{MetronomeConfig, TempoEstimate, Tick, TransportState, WaveformBuffer};

use crate::error::MetronomeError;
use crate::progress::ProgressReporter;
use crate::scheduler::BeatScheduler;
use crate::sink::{MetronomeSink, StartControl, Status};

/// Why a start command was refused.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Misuse {
    NoBuffer,
    UndeterminedTempo,
    AlreadyRunning,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StartOutcome {
    /// Playback and the beat schedule begin at `start_time` on the engine clock.
    Started { start_time: f64 },
    Rejected(Misuse),
}

/// Owns one metronome session: the loaded buffer, its tempo, the active
/// playback source and the scheduler driving clicks against it.
pub struct TransportController<E: AudioEngine> {
    engine: E,
    config: MetronomeConfig,
    sink: Box<dyn MetronomeSink>,
    analysis: TempoAnalysis,
    scheduler: BeatScheduler,
    progress: ProgressReporter,
    clock: PlaybackClock,
    state: TransportState,
    buffer: Option<Arc<WaveformBuffer>>,
    estimate: TempoEstimate,
    source: Option<Box<dyn PlaybackSource>>,
}

impl<E: AudioEngine> TransportController<E> {
    pub fn new(engine: E, config: MetronomeConfig, sink: Box<dyn MetronomeSink>) -> Self {
        let clock = PlaybackClock::new(engine.clock());
        Self::with_clock(engine, config, sink, clock)
    }

    /// Uses `wall` instead of the host stopwatch for wall-clock progress.
    pub fn with_wall_clock(
        engine: E,
        config: MetronomeConfig,
        sink: Box<dyn MetronomeSink>,
        wall: Arc<dyn TimeSource>,
    ) -> Self {
        let clock = PlaybackClock::with_wall(engine.clock(), wall);
        Self::with_clock(engine, config, sink, clock)
    }

    fn with_clock(
        engine: E,
        config: MetronomeConfig,
        sink: Box<dyn MetronomeSink>,
        clock: PlaybackClock,
    ) -> Self {
        let mut controller = Self {
            analysis: TempoAnalysis::new(config.analysis.clone()),
            scheduler: BeatScheduler::new(config.scheduler.clone()),
            progress: ProgressReporter,
            engine,
            config,
            sink,
            clock,
            state: TransportState::Idle,
            buffer: None,
            estimate: TempoEstimate::Undetermined,
            source: None,
        };
        controller.sink.on_start_control(StartControl::start(false));
        controller
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn estimate(&self) -> TempoEstimate {
        self.estimate
    }

    pub fn scheduler(&self) -> &BeatScheduler {
        &self.scheduler
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &MetronomeConfig {
        &self.config
    }

    pub fn buffer(&self) -> Option<&WaveformBuffer> {
        self.buffer.as_deref()
    }

    /// Replaces the session buffer and estimates its tempo. A running
    /// transport is stopped first. Without a tempo the transport stays Idle
    /// and the start control is disabled.
    #[instrument(skip(self, buffer), fields(frames = buffer.frames()))]
    pub fn load(&mut self, name: &str, buffer: WaveformBuffer) -> TempoEstimate {
        self.stop();
        let report = self.analysis.analyze(&buffer);
        self.sink.on_status(&Status::Loaded {
            name: name.to_string(),
            duration_seconds: buffer.duration_seconds(),
        });
        self.buffer = Some(Arc::new(buffer));
        self.estimate = report.estimate;
        self.sink.on_bpm_determined(report.estimate);

        if report.estimate.is_determined() {
            self.set_state(TransportState::Loaded);
            self.sink.on_start_control(StartControl::start(true));
        } else {
            self.sink.on_status(&Status::TempoUndetermined);
            self.set_state(TransportState::Idle);
            self.sink.on_start_control(StartControl::start(false));
        }
        report.estimate
    }

    /// Decodes encoded audio and loads it. On failure the previous session
    /// is left untouched.
    pub fn load_bytes(
        &mut self,
        name: &str,
        bytes: Vec<u8>,
        extension: Option<&str>,
    ) -> Result<TempoEstimate, MetronomeError> {
        self.sink.on_status(&Status::Loading {
            name: name.to_string(),
        });
        let decoded = AudioDecoder::decode_bytes(bytes, extension);
        self.finish_decode(name, decoded)
    }

    pub fn load_path<P: AsRef<Path>>(&mut self, path: P) -> Result<TempoEstimate, MetronomeError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.sink.on_status(&Status::Loading { name: name.clone() });
        let decoded = AudioDecoder::open(path);
        self.finish_decode(&name, decoded)
    }

    fn finish_decode(
        &mut self,
        name: &str,
        decoded: Result<WaveformBuffer, AudioError>,
    ) -> Result<TempoEstimate, MetronomeError> {
        match decoded {
            Ok(buffer) => Ok(self.load(name, buffer)),
            Err(err) => {
                warn!(name, %err, "decode failed");
                self.sink.on_status(&Status::DecodeFailed(err.to_string()));
                Err(MetronomeError::Decode(err))
            }
        }
    }

    /// Starts playback a short offset ahead of the engine clock and anchors
    /// the beat schedule to the same instant.
    pub fn start(&mut self) -> Result<StartOutcome, MetronomeError> {
        if !self.state.can_start() {
            let misuse = match (self.state, &self.buffer) {
                (TransportState::Running, _) => Misuse::AlreadyRunning,
                (_, None) => Misuse::NoBuffer,
                _ => Misuse::UndeterminedTempo,
            };
            return Ok(StartOutcome::Rejected(misuse));
        }
        let Some(buffer) = self.buffer.clone() else {
            return Ok(StartOutcome::Rejected(Misuse::NoBuffer));
        };
        let Some(bpm) = self.estimate.bpm() else {
            return Ok(StartOutcome::Rejected(Misuse::UndeterminedTempo));
        };

        self.teardown_source();
        let start_time = self.engine.now() + self.config.transport.start_offset_seconds;
        let mut source = self
            .engine
            .create_playback_source(buffer)
            .map_err(MetronomeError::Engine)?;
        if let Err(err) = source.start(start_time) {
            source.disconnect();
            return Err(MetronomeError::Engine(err));
        }
        self.source = Some(source);
        self.clock.start(start_time);
        if !self.scheduler.start(bpm, start_time) {
            self.halt();
            return Ok(StartOutcome::Rejected(Misuse::UndeterminedTempo));
        }

        info!(bpm, start_time, "transport started");
        self.set_state(TransportState::Running);
        self.sink.on_start_control(StartControl::stop());
        Ok(StartOutcome::Started { start_time })
    }

    /// Halts playback and the schedule. Does nothing unless running.
    pub fn stop(&mut self) {
        if self.state != TransportState::Running {
            return;
        }
        self.halt();
        info!("transport stopped");
        self.set_state(TransportState::Stopped);
        self.sink.on_start_control(StartControl::start(true));
    }

    /// Single start/stop control. Returns the resulting state.
    pub fn toggle(&mut self) -> Result<TransportState, MetronomeError> {
        if self.state == TransportState::Running {
            self.stop();
        } else if let StartOutcome::Rejected(misuse) = self.start()? {
            debug!(?misuse, "start ignored");
        }
        Ok(self.state)
    }

    /// One scheduling pass: fires at most one due tick (every due tick with
    /// catch-up) and then reports progress. Returns whether the host should
    /// schedule another pass.
    pub fn pass(&mut self) -> bool {
        if self.state != TransportState::Running || !self.scheduler.is_running() {
            return false;
        }

        for tick in self.scheduler.poll(&self.clock) {
            if let Err(err) = self.click(&tick) {
                self.fault(err);
                return false;
            }
            self.sink.on_tick(&tick);
        }

        let total = self
            .buffer
            .as_ref()
            .map_or(0.0, |buffer| buffer.duration_seconds());
        let elapsed = self
            .clock
            .elapsed_since_start(self.config.transport.progress_clock)
            .unwrap_or(0.0);
        let progress = self.progress.report(elapsed, total);
        self.sink.on_progress(&progress);

        if progress.fraction >= 1.0 {
            debug!(elapsed, total, "end of track");
            self.stop();
            return false;
        }
        true
    }

    fn click(&self, tick: &Tick) -> Result<(), AudioError> {
        let click = &self.config.click;
        let tone = ToneSpec::new(click.frequency_for(tick.is_downbeat), click.gain);
        self.engine
            .create_tone(&tone, tick.fired_at, tick.fired_at + click.duration_seconds)
    }

    fn fault(&mut self, err: AudioError) {
        error!(%err, "click failed, stopping transport");
        self.halt();
        self.set_state(TransportState::Stopped);
        self.sink.on_status(&Status::Fault(err.to_string()));
        self.sink.on_start_control(StartControl::start(true));
    }

    fn halt(&mut self) {
        self.scheduler.stop();
        self.scheduler.reset();
        self.clock.stop();
        self.teardown_source();
    }

    fn teardown_source(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        match source.stop() {
            Ok(()) => {}
            Err(AudioError::SourceStopped) => debug!("playback source already stopped"),
            Err(err) => warn!(%err, "failed to stop playback source"),
        }
        source.disconnect();
    }

    fn set_state(&mut self, state: TransportState) {
        if self.state != state {
            self.state = state;
            self.sink.on_transport_state_changed(state);
        }
    }
}

impl<E: AudioEngine> Drop for TransportController<E> {
    fn drop(&mut self) {
        self.teardown_source();
    }
}
