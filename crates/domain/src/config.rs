use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::DomainError;

/// Which clock progress display measures elapsed time against.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ElapsedStrategy {
    /// `now - origin` on the audio engine clock. Only valid while the engine runs.
    AudioClock,
    /// Monotonic host stopwatch started when playback begins.
    #[default]
    WallClock,
}

/// Parameters for onset scanning and tempo estimation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub window_samples: usize,
    /// Mean absolute amplitude a window must exceed to count as an onset.
    pub energy_threshold: f32,
    pub min_gap_seconds: f64,
    pub max_onsets: usize,
    /// Only this much audio from the start of the track is scanned.
    pub analysis_window_seconds: f64,
    /// Fewer onsets than this yield an undetermined tempo.
    pub min_onsets: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_samples: 512,
            energy_threshold: 0.15,
            min_gap_seconds: 0.1,
            max_onsets: 4,
            analysis_window_seconds: 10.0,
            min_onsets: 4,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub beats_per_measure: u8,
    /// Fire every overdue beat in a single pass instead of at most one.
    pub catch_up: bool,
    pub flash_seconds: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            beats_per_measure: 4,
            catch_up: false,
            flash_seconds: 0.1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClickConfig {
    pub frequency_hz: f32,
    pub accent_frequency_hz: f32,
    pub gain: f32,
    pub duration_seconds: f64,
    /// Use `accent_frequency_hz` on the first beat of each measure.
    pub accent_downbeat: bool,
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 800.0,
            accent_frequency_hz: 1000.0,
            gain: 0.1,
            duration_seconds: 0.05,
            accent_downbeat: true,
        }
    }
}

impl ClickConfig {
    pub fn frequency_for(&self, is_downbeat: bool) -> f32 {
        if is_downbeat && self.accent_downbeat {
            self.accent_frequency_hz
        } else {
            self.frequency_hz
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    /// Lead time between a start command and the first beat, so the engine
    /// can schedule playback precisely.
    pub start_offset_seconds: f64,
    pub progress_clock: ElapsedStrategy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            start_offset_seconds: 0.1,
            progress_clock: ElapsedStrategy::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetronomeConfig {
    pub analysis: AnalysisConfig,
    pub scheduler: SchedulerConfig,
    pub click: ClickConfig,
    pub transport: TransportConfig,
}

impl MetronomeConfig {
    /// Reads a YAML or JSON config, chosen by file extension (YAML otherwise).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DomainError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            DomainError::config(format!("cannot read {}: {err}", path.display()))
        })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(&text)?
        } else {
            Self::from_yaml_str(&text)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, DomainError> {
        serde_yaml::from_str(text).map_err(|err| DomainError::Serialization(err.to_string()))
    }

    pub fn from_json_str(text: &str) -> Result<Self, DomainError> {
        serde_json::from_str(text).map_err(|err| DomainError::Serialization(err.to_string()))
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let analysis = &self.analysis;
        if analysis.window_samples == 0 {
            return Err(DomainError::config("analysis.window_samples must be positive"));
        }
        if !(analysis.energy_threshold > 0.0 && analysis.energy_threshold <= 1.0) {
            return Err(DomainError::config(
                "analysis.energy_threshold must be in (0, 1]",
            ));
        }
        if analysis.min_gap_seconds < 0.0 {
            return Err(DomainError::config(
                "analysis.min_gap_seconds cannot be negative",
            ));
        }
        if analysis.min_onsets < 2 {
            return Err(DomainError::config("analysis.min_onsets must be at least 2"));
        }
        if analysis.max_onsets < analysis.min_onsets {
            return Err(DomainError::config(
                "analysis.max_onsets must not be below analysis.min_onsets",
            ));
        }
        if analysis.analysis_window_seconds <= 0.0 {
            return Err(DomainError::config(
                "analysis.analysis_window_seconds must be positive",
            ));
        }
        if self.scheduler.beats_per_measure == 0 {
            return Err(DomainError::config(
                "scheduler.beats_per_measure must be positive",
            ));
        }
        if self.click.duration_seconds <= 0.0 || self.click.gain < 0.0 {
            return Err(DomainError::config(
                "click duration must be positive and gain non-negative",
            ));
        }
        if self.transport.start_offset_seconds < 0.0 {
            return Err(DomainError::config(
                "transport.start_offset_seconds cannot be negative",
            ));
        }
        Ok(())
    }
}
