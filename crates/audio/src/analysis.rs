use beatlock_domain::{AnalysisConfig, OnsetEvent, WaveformBuffer};
use tracing::debug;

use crate::dsp::mean_abs_energy;

/// Finds beat onsets by thresholding windowed energy on channel 0.
#[derive(Clone, Debug, Default)]
pub struct EnergyScanner {
    config: AnalysisConfig,
}

impl EnergyScanner {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Starts a fresh scan. Every call is independent of any earlier one.
    pub fn scan<'a>(&self, buffer: &'a WaveformBuffer) -> Onsets<'a> {
        let channel = buffer.channel0();
        let sample_rate = buffer.sample_rate() as f64;
        let limit = (self.config.analysis_window_seconds.max(0.0) * sample_rate) as usize;
        Onsets {
            samples: &channel[..channel.len().min(limit)],
            sample_rate,
            window: self.config.window_samples.max(1),
            threshold: self.config.energy_threshold,
            min_gap: self.config.min_gap_seconds,
            remaining: self.config.max_onsets,
            cursor: 0,
            last: None,
        }
    }
}

/// Lazy onset sequence produced by [`EnergyScanner::scan`], in increasing time order.
#[derive(Clone, Debug)]
pub struct Onsets<'a> {
    samples: &'a [f32],
    sample_rate: f64,
    window: usize,
    threshold: f32,
    min_gap: f64,
    remaining: usize,
    cursor: usize,
    last: Option<f64>,
}

impl Iterator for Onsets<'_> {
    type Item = OnsetEvent;

    fn next(&mut self) -> Option<OnsetEvent> {
        if self.remaining == 0 {
            return None;
        }
        while self.cursor < self.samples.len() {
            let start = self.cursor;
            let end = (start + self.window).min(self.samples.len());
            self.cursor = end;

            let energy = mean_abs_energy(&self.samples[start..end], self.window);
            if energy <= self.threshold {
                continue;
            }
            let time = start as f64 / self.sample_rate;
            if self.last.is_some_and(|last| time - last <= self.min_gap) {
                continue;
            }
            self.last = Some(time);
            self.remaining -= 1;
            debug!(time, energy, "onset detected");
            return Some(OnsetEvent::new(time));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 2_048;

    /// Silence with a 512-sample burst at each of `pulse_times`.
    fn pulses(seconds: f64, pulse_times: &[f64], amplitude: f32) -> WaveformBuffer {
        let mut samples = vec![0.0; (seconds * RATE as f64) as usize];
        for time in pulse_times {
            let start = (time * RATE as f64) as usize;
            for (offset, sample) in samples[start..start + 512].iter_mut().enumerate() {
                *sample = if offset % 2 == 0 { amplitude } else { -amplitude };
            }
        }
        WaveformBuffer::mono(RATE, samples).unwrap()
    }

    fn times(onsets: Onsets<'_>) -> Vec<f64> {
        onsets.map(|onset| onset.time).collect()
    }

    #[test]
    fn finds_regular_pulses() {
        let buffer = pulses(4.0, &[0.0, 0.5, 1.0, 1.5], 0.8);
        let scanner = EnergyScanner::default();
        assert_eq!(times(scanner.scan(&buffer)), vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn stops_at_max_onsets() {
        let buffer = pulses(4.0, &[0.0, 0.5, 1.0, 1.5, 2.0, 2.5], 0.8);
        let scanner = EnergyScanner::default();
        assert_eq!(scanner.scan(&buffer).count(), 4);

        let scanner = EnergyScanner::new(AnalysisConfig {
            max_onsets: 2,
            ..AnalysisConfig::default()
        });
        assert_eq!(times(scanner.scan(&buffer)), vec![0.0, 0.5]);
    }

    #[test]
    fn respects_minimum_gap() {
        // Contiguous loud audio: every window is above threshold.
        let buffer = WaveformBuffer::mono(RATE, vec![0.9; RATE as usize * 2]).unwrap();
        let scanner = EnergyScanner::new(AnalysisConfig {
            max_onsets: 16,
            min_gap_seconds: 0.3,
            ..AnalysisConfig::default()
        });
        let found = times(scanner.scan(&buffer));
        assert!(found.len() > 1);
        for pair in found.windows(2) {
            assert!(pair[1] - pair[0] >= 0.3);
        }
    }

    #[test]
    fn gap_equal_to_minimum_is_rejected() {
        // Windows are exactly 0.25s apart, so the 0.25s gap sits on the boundary.
        let buffer = WaveformBuffer::mono(RATE, vec![0.9; RATE as usize * 2]).unwrap();
        let scanner = EnergyScanner::new(AnalysisConfig {
            min_gap_seconds: 0.25,
            ..AnalysisConfig::default()
        });
        assert_eq!(times(scanner.scan(&buffer)), vec![0.0, 0.5, 1.0, 1.5]);
    }

    #[test]
    fn quiet_or_empty_audio_has_no_onsets() {
        let scanner = EnergyScanner::default();
        let quiet = pulses(2.0, &[0.0, 0.5, 1.0], 0.1);
        assert_eq!(scanner.scan(&quiet).count(), 0);
        let empty = WaveformBuffer::mono(RATE, Vec::new()).unwrap();
        assert_eq!(scanner.scan(&empty).count(), 0);
    }

    #[test]
    fn analysis_is_bounded_to_window() {
        let buffer = pulses(12.0, &[10.5, 11.0], 0.8);
        let scanner = EnergyScanner::default();
        assert_eq!(scanner.scan(&buffer).count(), 0);
    }

    #[test]
    fn scans_are_restartable() {
        let buffer = pulses(3.0, &[0.25, 0.75, 1.25, 1.75], 0.8);
        let scanner = EnergyScanner::default();
        let first = times(scanner.scan(&buffer));
        let second = times(scanner.scan(&buffer));
        assert_eq!(first, second);
        assert_eq!(first, vec![0.25, 0.75, 1.25, 1.75]);
    }
}
