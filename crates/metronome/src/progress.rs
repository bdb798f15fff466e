use beatlock_domain::Progress;

/// Turns playback position into the progress bar fraction and time readout.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProgressReporter;

impl ProgressReporter {
    /// The fraction is clamped to `[0, 1]`; the elapsed readout is not
    /// clamped to the total.
    pub fn report(&self, elapsed_seconds: f64, total_seconds: f64) -> Progress {
        let elapsed = sanitize(elapsed_seconds);
        let total = sanitize(total_seconds);
        let fraction = if total > 0.0 {
            (elapsed / total).min(1.0)
        } else {
            1.0
        };
        Progress {
            fraction,
            display: format!("{} / {}", format_time(elapsed), format_time(total)),
        }
    }
}

/// `mm:ss`, both fields floored and zero-padded to two digits.
pub fn format_time(seconds: f64) -> String {
    let seconds = sanitize(seconds);
    let minutes = (seconds / 60.0).floor() as u64;
    let secs = (seconds % 60.0).floor() as u64;
    format!("{minutes:02}:{secs:02}")
}

fn sanitize(seconds: f64) -> f64 {
    if seconds.is_finite() {
        seconds.max(0.0)
    } else {
        0.0
    }
}
