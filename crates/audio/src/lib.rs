pub mod analysis;
pub mod backend;
pub mod clock;
pub mod dsp;
pub mod error;
pub mod io;
pub mod output;

pub use analysis::{EnergyScanner, Onsets};
pub use backend::{
    AudioEngine, NullEngine, PlaybackSource, ScheduledTone, SourceEvent, StreamConfig,
};
pub use clock::{ClockOrigin, ManualClock, PlaybackClock, SystemClock, TimeSource};
pub use dsp::{mean_abs_energy, render_tone, ToneSpec};
pub use error::AudioError;
pub use io::AudioDecoder;
pub use output::CpalEngine;
