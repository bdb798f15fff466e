use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use beatlock_domain::{Progress, TempoEstimate, Tick, TransportState};

/// User-facing status line.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Status {
    Loading { name: String },
    Loaded { name: String, duration_seconds: f64 },
    DecodeFailed(String),
    TempoUndetermined,
    Fault(String),
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Loading { name } => write!(f, "Loading: {name}"),
            Status::Loaded {
                name,
                duration_seconds,
            } => write!(f, "Loaded: {name} ({duration_seconds:.2}s)"),
            Status::DecodeFailed(reason) => f.write_str(reason),
            Status::TempoUndetermined => f.write_str("BPM: Not enough beats detected"),
            Status::Fault(reason) => write!(f, "Metronome stopped: {reason}"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
}

impl ControlAction {
    pub fn label(&self) -> &'static str {
        match self {
            ControlAction::Start => "Start Metronome",
            ControlAction::Stop => "Stop Metronome",
        }
    }
}

/// State of the single start/stop control.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartControl {
    pub enabled: bool,
    pub action: ControlAction,
}

impl StartControl {
    pub fn start(enabled: bool) -> Self {
        Self {
            enabled,
            action: ControlAction::Start,
        }
    }

    pub fn stop() -> Self {
        Self {
            enabled: true,
            action: ControlAction::Stop,
        }
    }
}

/// Receives everything the transport wants rendered. Called synchronously
/// from the scheduling pass; implementations must not block.
pub trait MetronomeSink {
    fn on_tick(&mut self, _tick: &Tick) {}
    fn on_progress(&mut self, _progress: &Progress) {}
    fn on_bpm_determined(&mut self, _estimate: TempoEstimate) {}
    fn on_transport_state_changed(&mut self, _state: TransportState) {}
    fn on_status(&mut self, _status: &Status) {}
    fn on_start_control(&mut self, _control: StartControl) {}
}

#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    Tick(Tick),
    Progress(Progress),
    Bpm(TempoEstimate),
    State(TransportState),
    Status(Status),
    Control(StartControl),
}

/// Captures every call in order. Clones share the same log.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().clone()
    }

    pub fn ticks(&self) -> Vec<Tick> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Tick(tick) => Some(*tick),
                _ => None,
            })
            .collect()
    }

    pub fn progress(&self) -> Vec<Progress> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Progress(progress) => Some(progress.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<TransportState> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::State(state) => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<Status> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Status(status) => Some(status.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_control(&self) -> Option<StartControl> {
        self.lock().iter().rev().find_map(|event| match event {
            SinkEvent::Control(control) => Some(*control),
            _ => None,
        })
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn push(&self, event: SinkEvent) {
        self.lock().push(event);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SinkEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MetronomeSink for RecordingSink {
    fn on_tick(&mut self, tick: &Tick) {
        self.push(SinkEvent::Tick(*tick));
    }

    fn on_progress(&mut self, progress: &Progress) {
        self.push(SinkEvent::Progress(progress.clone()));
    }

    fn on_bpm_determined(&mut self, estimate: TempoEstimate) {
        self.push(SinkEvent::Bpm(estimate));
    }

    fn on_transport_state_changed(&mut self, state: TransportState) {
        self.push(SinkEvent::State(state));
    }

    fn on_status(&mut self, status: &Status) {
        self.push(SinkEvent::Status(status.clone()));
    }

    fn on_start_control(&mut self, control: StartControl) {
        self.push(SinkEvent::Control(control));
    }
}

/// Logs sink traffic through `tracing`; progress goes to `debug`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl MetronomeSink for TracingSink {
    fn on_tick(&mut self, tick: &Tick) {
        info!(
            beat = tick.beat_in_measure + 1,
            downbeat = tick.is_downbeat,
            at = tick.fired_at,
            "tick"
        );
    }

    fn on_progress(&mut self, progress: &Progress) {
        debug!(fraction = progress.fraction, display = %progress.display, "progress");
    }

    fn on_bpm_determined(&mut self, estimate: TempoEstimate) {
        info!(%estimate, "tempo");
    }

    fn on_transport_state_changed(&mut self, state: TransportState) {
        info!(?state, "transport");
    }

    fn on_status(&mut self, status: &Status) {
        match status {
            Status::DecodeFailed(_) | Status::Fault(_) | Status::TempoUndetermined => {
                warn!(%status, "status")
            }
            _ => info!(%status, "status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines_match_ui_copy() {
        assert_eq!(
            Status::Loaded {
                name: "song.wav".into(),
                duration_seconds: 12.345
            }
            .to_string(),
            "Loaded: song.wav (12.35s)"
        );
        assert_eq!(
            Status::TempoUndetermined.to_string(),
            "BPM: Not enough beats detected"
        );
        assert_eq!(ControlAction::Stop.label(), "Stop Metronome");
    }

    #[test]
    fn recording_sink_clones_share_log() {
        let sink = RecordingSink::new();
        let mut handle: Box<dyn MetronomeSink> = Box::new(sink.clone());
        handle.on_transport_state_changed(TransportState::Loaded);
        handle.on_start_control(StartControl::start(true));
        handle.on_start_control(StartControl::stop());
        assert_eq!(sink.states(), vec![TransportState::Loaded]);
        assert_eq!(sink.last_control(), Some(StartControl::stop()));
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
