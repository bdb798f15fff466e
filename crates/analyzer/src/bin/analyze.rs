use beatlock_analyzer::TempoAnalysis;
use beatlock_domain::MetronomeConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect the tempo of an audio file", long_about = None)]
struct Cli {
    /// Path to the audio file to analyse
    input: String,
    /// YAML or JSON config file
    #[arg(short, long)]
    config: Option<String>,
    /// Mean absolute amplitude a window must exceed to count as a beat
    #[arg(short, long)]
    threshold: Option<f32>,
    /// Onsets required before a tempo is reported
    #[arg(long)]
    min_onsets: Option<usize>,
    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => MetronomeConfig::load(path)?,
        None => MetronomeConfig::default(),
    };
    if let Some(threshold) = cli.threshold {
        config.analysis.energy_threshold = threshold;
    }
    if let Some(min_onsets) = cli.min_onsets {
        config.analysis.min_onsets = min_onsets;
        config.analysis.max_onsets = config.analysis.max_onsets.max(min_onsets);
    }
    config.validate()?;

    let report = TempoAnalysis::new(config.analysis).analyze_file(&cli.input)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for onset in &report.onsets {
        println!("beat at {:.3}s", onset.time);
    }
    println!("{}: {}", cli.input, report.estimate);
    Ok(())
}
