pub mod config;
pub mod error;
pub mod events;
pub mod tempo;
pub mod waveform;

pub use crate::config::{
    AnalysisConfig, ClickConfig, ElapsedStrategy, MetronomeConfig, SchedulerConfig,
    TransportConfig,
};
pub use crate::error::DomainError;
pub use crate::events::{Progress, Tick, TransportState};
pub use crate::tempo::{seconds_per_beat, OnsetEvent, TempoEstimate};
pub use crate::waveform::WaveformBuffer;
