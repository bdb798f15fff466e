use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use beatlock_audio::{AudioDecoder, AudioError, EnergyScanner};
use beatlock_domain::{AnalysisConfig, OnsetEvent, TempoEstimate, WaveformBuffer};

use crate::tempo::TempoEstimator;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisReport {
    pub sample_rate: u32,
    pub duration_seconds: f64,
    pub onsets: Vec<OnsetEvent>,
    pub estimate: TempoEstimate,
}

/// Onset scan followed by tempo estimation, run once per loaded buffer.
#[derive(Debug, Clone, Default)]
pub struct TempoAnalysis {
    scanner: EnergyScanner,
    estimator: TempoEstimator,
}

impl TempoAnalysis {
    pub fn new(config: AnalysisConfig) -> Self {
        let estimator = TempoEstimator::new(config.min_onsets);
        Self {
            scanner: EnergyScanner::new(config),
            estimator,
        }
    }

    #[instrument(skip_all, fields(frames = buffer.frames(), sample_rate = buffer.sample_rate()))]
    pub fn analyze(&self, buffer: &WaveformBuffer) -> AnalysisReport {
        let onsets: Vec<OnsetEvent> = self.scanner.scan(buffer).collect();
        let estimate = self.estimator.estimate(&onsets);
        match estimate {
            TempoEstimate::Determined(bpm) => info!(bpm, onsets = onsets.len(), "tempo determined"),
            TempoEstimate::Undetermined => warn!(
                onsets = onsets.len(),
                required = self.estimator.min_onsets(),
                "tempo undetermined"
            ),
        }
        AnalysisReport {
            sample_rate: buffer.sample_rate(),
            duration_seconds: buffer.duration_seconds(),
            onsets,
            estimate,
        }
    }

    pub fn analyze_file<P: AsRef<Path>>(&self, path: P) -> Result<AnalysisReport, AudioError> {
        let buffer = AudioDecoder::open(path)?;
        Ok(self.analyze(&buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn click_track(rate: u32, seconds: f64, period: f64) -> WaveformBuffer {
        let mut samples = vec![0.0f32; (seconds * rate as f64) as usize];
        let mut beat = 0.0;
        while beat < seconds {
            let start = (beat * rate as f64) as usize;
            let end = (start + 512).min(samples.len());
            samples[start..end].iter_mut().for_each(|s| *s = 0.9);
            beat += period;
        }
        WaveformBuffer::mono(rate, samples).unwrap()
    }

    #[test]
    fn analyzes_steady_pulse() {
        let analysis = TempoAnalysis::default();
        let report = analysis.analyze(&click_track(2_048, 4.0, 0.5));
        assert_eq!(report.onsets.len(), 4);
        assert_eq!(report.estimate, TempoEstimate::Determined(120));
        assert_eq!(report.duration_seconds, 4.0);
    }

    #[test]
    fn lenient_minimum_accepts_two_onsets() {
        let buffer = click_track(2_048, 0.75, 0.5);
        assert_eq!(
            TempoAnalysis::default().analyze(&buffer).estimate,
            TempoEstimate::Undetermined
        );
        let lenient = TempoAnalysis::new(AnalysisConfig {
            min_onsets: 2,
            ..AnalysisConfig::default()
        });
        assert_eq!(lenient.analyze(&buffer).estimate, TempoEstimate::Determined(120));
    }

    #[test]
    fn pipeline_handles_missing_audio() {
        let result = TempoAnalysis::default().analyze_file("missing.wav");
        assert!(result.is_err());
    }
}
