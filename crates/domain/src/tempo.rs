use std::fmt;

use serde::{Deserialize, Serialize};

/// A detected beat onset, in seconds from the start of the buffer.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, PartialOrd)]
pub struct OnsetEvent {
    pub time: f64,
}

impl OnsetEvent {
    pub fn new(time: f64) -> Self {
        Self { time }
    }
}

/// Tempo derived once per loaded buffer.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TempoEstimate {
    Determined(u32),
    #[default]
    Undetermined,
}

impl TempoEstimate {
    pub fn bpm(&self) -> Option<u32> {
        match self {
            TempoEstimate::Determined(bpm) => Some(*bpm),
            TempoEstimate::Undetermined => None,
        }
    }

    pub fn is_determined(&self) -> bool {
        matches!(self, TempoEstimate::Determined(_))
    }

    pub fn beat_period_seconds(&self) -> Option<f64> {
        self.bpm().map(seconds_per_beat)
    }
}

impl fmt::Display for TempoEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TempoEstimate::Determined(bpm) => write!(f, "{bpm} BPM"),
            TempoEstimate::Undetermined => f.write_str("not enough beats detected"),
        }
    }
}

pub fn seconds_per_beat(bpm: u32) -> f64 {
    60.0 / bpm as f64
}
