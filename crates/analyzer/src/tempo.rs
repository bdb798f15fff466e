use tracing::debug;

use beatlock_domain::{OnsetEvent, TempoEstimate};

/// Converts onset spacing into a whole-number BPM.
#[derive(Clone, Copy, Debug)]
pub struct TempoEstimator {
    min_onsets: usize,
}

impl TempoEstimator {
    /// `min_onsets` below 2 is raised to 2, the fewest that yield an interval.
    pub fn new(min_onsets: usize) -> Self {
        Self {
            min_onsets: min_onsets.max(2),
        }
    }

    pub fn min_onsets(&self) -> usize {
        self.min_onsets
    }

    /// Averages consecutive inter-onset gaps; BPM is `60 / gap` rounded half
    /// away from zero.
    pub fn estimate(&self, onsets: &[OnsetEvent]) -> TempoEstimate {
        if onsets.len() < self.min_onsets {
            debug!(
                found = onsets.len(),
                required = self.min_onsets,
                "too few onsets"
            );
            return TempoEstimate::Undetermined;
        }
        let total: f64 = onsets
            .windows(2)
            .map(|pair| pair[1].time - pair[0].time)
            .sum();
        let average_gap = total / (onsets.len() - 1) as f64;
        if !average_gap.is_finite() || average_gap <= 0.0 {
            return TempoEstimate::Undetermined;
        }
        let bpm = (60.0 / average_gap).round();
        if bpm < 1.0 || bpm > u32::MAX as f64 {
            return TempoEstimate::Undetermined;
        }
        debug!(average_gap, bpm, "tempo estimated");
        TempoEstimate::Determined(bpm as u32)
    }
}

impl Default for TempoEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}
