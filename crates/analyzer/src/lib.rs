pub mod pipeline;
pub mod tempo;

pub use pipeline::{AnalysisReport, TempoAnalysis};
pub use tempo::TempoEstimator;
