use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

/// Mean absolute amplitude of `window`, normalised by `nominal_len` so a
/// short trailing window reads as quieter than a full one.
pub fn mean_abs_energy(window: &[f32], nominal_len: usize) -> f32 {
    let sum: f32 = window.iter().map(|sample| sample.abs()).sum();
    sum / nominal_len.max(1) as f32
}

/// A sine click with a linear fade at each end.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToneSpec {
    pub frequency_hz: f32,
    pub gain: f32,
    pub fade_seconds: f32,
}

impl ToneSpec {
    pub fn new(frequency_hz: f32, gain: f32) -> Self {
        Self {
            frequency_hz,
            gain,
            fade_seconds: 0.002,
        }
    }
}

pub fn render_tone(tone: &ToneSpec, duration_seconds: f64, sample_rate: u32) -> Vec<f32> {
    let sample_rate_f = sample_rate.max(1) as f32;
    let total = (duration_seconds.max(0.0) * sample_rate as f64).round() as usize;
    let fade = ((tone.fade_seconds.max(0.0) * sample_rate_f) as usize).min(total / 2);
    let gain = tone.gain.clamp(0.0, 1.0);
    (0..total)
        .map(|n| {
            let envelope = if fade == 0 {
                1.0
            } else if n < fade {
                n as f32 / fade as f32
            } else if n >= total - fade {
                (total - n) as f32 / fade as f32
            } else {
                1.0
            };
            (2.0 * PI * tone.frequency_hz * n as f32 / sample_rate_f).sin() * gain * envelope
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn energy_is_normalised_by_nominal_length() {
        assert_abs_diff_eq!(mean_abs_energy(&[0.5, -0.5, 0.5, -0.5], 4), 0.5);
        assert_abs_diff_eq!(mean_abs_energy(&[0.5, -0.5], 4), 0.25);
        assert_eq!(mean_abs_energy(&[], 0), 0.0);
    }

    #[test]
    fn tone_length_and_peak_follow_request() {
        let tone = ToneSpec::new(1_000.0, 0.1);
        let samples = render_tone(&tone, 0.05, 48_000);
        assert_eq!(samples.len(), 2_400);
        assert_eq!(samples[0], 0.0);
        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!(peak <= 0.1 + 1e-6);
        assert!(peak > 0.09);
    }
}
