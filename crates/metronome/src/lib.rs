pub mod error;
pub mod progress;
pub mod scheduler;
pub mod sink;
pub mod transport;

pub use error::MetronomeError;
pub use progress::{format_time, ProgressReporter};
pub use scheduler::{BeatScheduler, SchedulerState};
pub use sink::{
    ControlAction, MetronomeSink, RecordingSink, SinkEvent, StartControl, Status, TracingSink,
};
pub use transport::{Misuse, StartOutcome, TransportController};
