use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use beatlock_domain::WaveformBuffer;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{ManualClock, TimeSource};
use crate::dsp::ToneSpec;
use crate::AudioError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            buffer_size: 512,
        }
    }
}

/// One-shot playback of a decoded buffer.
pub trait PlaybackSource {
    /// Schedules playback to begin at `at` on the engine clock.
    fn start(&mut self, at: f64) -> Result<(), AudioError>;
    /// Fails with [`AudioError::SourceStopped`] when nothing is playing.
    fn stop(&mut self) -> Result<(), AudioError>;
    /// Detaches the source from the output. Always safe to call.
    fn disconnect(&mut self);
}

pub trait AudioEngine {
    /// The engine's own monotonic clock, running while the engine is alive.
    fn clock(&self) -> Arc<dyn TimeSource>;

    fn now(&self) -> f64 {
        self.clock().now()
    }

    /// Emits `tone` between `start` and `stop` on the engine clock.
    fn create_tone(&self, tone: &ToneSpec, start: f64, stop: f64) -> Result<(), AudioError>;

    fn create_playback_source(
        &self,
        buffer: Arc<WaveformBuffer>,
    ) -> Result<Box<dyn PlaybackSource>, AudioError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScheduledTone {
    pub tone: ToneSpec,
    pub start: f64,
    pub stop: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SourceEvent {
    Created { id: usize },
    Started { id: usize, at: f64 },
    Stopped { id: usize },
    StopRejected { id: usize },
    Disconnected { id: usize },
}

#[derive(Debug, Default)]
struct EngineLog {
    tones: Vec<ScheduledTone>,
    sources: Vec<SourceEvent>,
    next_source: usize,
}

/// Engine without an output device. Time is driven by a [`ManualClock`];
/// every request is recorded. Clones share clock and log.
#[derive(Clone, Debug, Default)]
pub struct NullEngine {
    clock: ManualClock,
    log: Arc<Mutex<EngineLog>>,
    reject_tones: Arc<AtomicBool>,
}

impl NullEngine {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            ..Default::default()
        }
    }

    pub fn manual_clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn tones(&self) -> Vec<ScheduledTone> {
        self.lock().tones.clone()
    }

    pub fn source_events(&self) -> Vec<SourceEvent> {
        self.lock().sources.clone()
    }

    /// Makes subsequent `create_tone` calls fail, as a lost device would.
    pub fn reject_tones(&self, reject: bool) {
        self.reject_tones.store(reject, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, EngineLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioEngine for NullEngine {
    fn clock(&self) -> Arc<dyn TimeSource> {
        Arc::new(self.clock.clone())
    }

    fn create_tone(&self, tone: &ToneSpec, start: f64, stop: f64) -> Result<(), AudioError> {
        if self.reject_tones.load(Ordering::Acquire) {
            return Err(AudioError::Device("output device unavailable".into()));
        }
        debug!(frequency = tone.frequency_hz, start, stop, "null tone");
        self.lock().tones.push(ScheduledTone {
            tone: *tone,
            start,
            stop,
        });
        Ok(())
    }

    fn create_playback_source(
        &self,
        buffer: Arc<WaveformBuffer>,
    ) -> Result<Box<dyn PlaybackSource>, AudioError> {
        let id = {
            let mut log = self.lock();
            let id = log.next_source;
            log.next_source += 1;
            log.sources.push(SourceEvent::Created { id });
            id
        };
        Ok(Box::new(NullSource {
            id,
            duration: buffer.duration_seconds(),
            engine: self.clone(),
            started_at: None,
            stopped: false,
        }))
    }
}

struct NullSource {
    id: usize,
    duration: f64,
    engine: NullEngine,
    started_at: Option<f64>,
    stopped: bool,
}

impl PlaybackSource for NullSource {
    fn start(&mut self, at: f64) -> Result<(), AudioError> {
        self.started_at = Some(at);
        self.engine
            .lock()
            .sources
            .push(SourceEvent::Started { id: self.id, at });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), AudioError> {
        let finished = self
            .started_at
            .map_or(true, |at| self.engine.clock.now() >= at + self.duration);
        if self.stopped || finished {
            self.engine
                .lock()
                .sources
                .push(SourceEvent::StopRejected { id: self.id });
            return Err(AudioError::SourceStopped);
        }
        self.stopped = true;
        self.engine
            .lock()
            .sources
            .push(SourceEvent::Stopped { id: self.id });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.engine
            .lock()
            .sources
            .push(SourceEvent::Disconnected { id: self.id });
    }
}
