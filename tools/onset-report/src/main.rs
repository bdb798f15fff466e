use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Result;
use beatlock_analyzer::TempoEstimator;
use beatlock_domain::OnsetEvent;
use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Estimate tempo from annotated onset times")]
struct Args {
    /// Path to a JSON array of `{ "time": seconds }` records
    input: PathBuf,
    /// Onsets required before a tempo is reported
    #[arg(long, default_value_t = 4)]
    min_onsets: usize,
}

/// Extra annotation fields are ignored.
#[derive(Debug, Deserialize)]
struct AnnotationRecord {
    time: f64,
}

fn onsets(records: Vec<AnnotationRecord>) -> Vec<OnsetEvent> {
    let mut onsets: Vec<OnsetEvent> = records
        .into_iter()
        .filter(|record| record.time.is_finite())
        .map(|record| OnsetEvent::new(record.time))
        .collect();
    onsets.sort_by(|a, b| a.time.total_cmp(&b.time));
    onsets
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let file = File::open(&args.input)?;
    let reader = BufReader::new(file);
    let records: Vec<AnnotationRecord> = serde_json::from_reader(reader)?;
    let total = records.len();
    let onsets = onsets(records);
    if onsets.len() < total {
        warn!(dropped = total - onsets.len(), "skipped non-finite onset times");
    }
    info!(count = onsets.len(), "loaded annotations");

    let estimate = TempoEstimator::new(args.min_onsets).estimate(&onsets);
    println!("{} onsets: {}", onsets.len(), estimate);
    Ok(())
}
