use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use beatlock_audio::{AudioDecoder, AudioEngine, CpalEngine, TimeSource};
use beatlock_domain::{MetronomeConfig, Progress, TempoEstimate, Tick, TransportState};
use beatlock_metronome::{
    MetronomeSink, StartControl, StartOutcome, Status, TracingSink, TransportController,
};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Play an audio file with a click track locked to its beat",
    long_about = None
)]
struct Cli {
    /// Audio file to play
    input: PathBuf,
    /// YAML or JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Mean absolute amplitude a window must exceed to count as a beat
    #[arg(short, long)]
    threshold: Option<f32>,
    /// Onsets required before a tempo is reported
    #[arg(long)]
    min_onsets: Option<usize>,
    /// Fire every overdue beat after a stall instead of one per pass
    #[arg(long)]
    catch_up: bool,
    /// Milliseconds between scheduling passes
    #[arg(long, default_value_t = 5)]
    frame_ms: u64,
}

/// A line typed on stdin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Input {
    /// Enter on its own, or anything other than `q`: press start/stop.
    Toggle,
    Quit,
}

impl Input {
    fn parse(line: &str) -> Self {
        if line.trim().eq_ignore_ascii_case("q") {
            Input::Quit
        } else {
            Input::Toggle
        }
    }
}

/// Forwards stdin lines until EOF, when the sender is dropped. Reads on a
/// detached thread so a pending read never holds up runtime shutdown.
fn spawn_input() -> mpsc::Receiver<Input> {
    let (tx, rx) = mpsc::channel(8);
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let input = Input::parse(&line);
            if tx.blocking_send(input).is_err() || input == Input::Quit {
                break;
            }
        }
    });
    rx
}

fn control_line(control: StartControl) -> String {
    if control.enabled {
        format!("[Enter] {}   [q] Quit", control.action.label())
    } else {
        format!("{} (unavailable)", control.action.label())
    }
}

/// Renders the flash indicator and progress line on one terminal row.
struct TerminalSink {
    clock: Arc<dyn TimeSource>,
    beats_per_measure: u8,
    beat: Option<u8>,
    flash_until: f64,
    inner: TracingSink,
}

impl TerminalSink {
    fn new(clock: Arc<dyn TimeSource>, beats_per_measure: u8) -> Self {
        Self {
            clock,
            beats_per_measure,
            beat: None,
            flash_until: 0.0,
            inner: TracingSink,
        }
    }

    /// Beat 1 lights as `[#]`, other beats as `[*]`.
    fn lamps(&self) -> String {
        let lit = self.beat.filter(|_| self.clock.now() < self.flash_until);
        (0..self.beats_per_measure)
            .map(|beat| match lit {
                Some(0) if beat == 0 => "[#]",
                Some(b) if b == beat => "[*]",
                _ => "[ ]",
            })
            .collect()
    }
}

impl MetronomeSink for TerminalSink {
    fn on_tick(&mut self, tick: &Tick) {
        self.beat = Some(tick.beat_in_measure);
        self.flash_until = tick.flash_until;
    }

    fn on_progress(&mut self, progress: &Progress) {
        const WIDTH: usize = 30;
        let filled = (progress.fraction * WIDTH as f64).round() as usize;
        let bar: String = (0..WIDTH).map(|i| if i < filled { '=' } else { ' ' }).collect();
        let mut out = io::stdout().lock();
        // Best effort; a closed stdout must not stop playback.
        let _ = write!(out, "\r{} |{bar}| {}", self.lamps(), progress.display);
        let _ = out.flush();
    }

    fn on_bpm_determined(&mut self, estimate: TempoEstimate) {
        println!("BPM: {}", estimate);
        self.inner.on_bpm_determined(estimate);
    }

    fn on_transport_state_changed(&mut self, state: TransportState) {
        if state == TransportState::Stopped {
            println!();
        }
        self.inner.on_transport_state_changed(state);
    }

    fn on_status(&mut self, status: &Status) {
        println!("{status}");
        self.inner.on_status(status);
    }

    fn on_start_control(&mut self, control: StartControl) {
        println!("\n{}", control_line(control));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
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
    config.scheduler.catch_up |= cli.catch_up;
    config.validate()?;

    let name = cli
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| cli.input.display().to_string());
    println!("Loading: {name}");
    let path = cli.input.clone();
    let buffer = tokio::task::spawn_blocking(move || AudioDecoder::open(path))
        .await
        .context("decoder task panicked")?
        .with_context(|| format!("cannot load {}", cli.input.display()))?;

    let engine = CpalEngine::open_default()?;
    info!(config = ?engine.config(), "output ready");
    let sink = TerminalSink::new(engine.clock(), config.scheduler.beats_per_measure);
    let mut transport = TransportController::new(engine, config, Box::new(sink));

    if !transport.load(&name, buffer).is_determined() {
        warn!("no tempo, nothing to play");
        return Ok(());
    }
    match transport.start()? {
        StartOutcome::Started { start_time } => info!(start_time, "playing"),
        StartOutcome::Rejected(misuse) => anyhow::bail!("cannot start: {misuse:?}"),
    }

    let mut input = spawn_input();
    let mut input_open = true;
    let mut interval = tokio::time::interval(Duration::from_millis(cli.frame_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let running = transport.pass();
                // Without stdin nobody can restart, so end with the track.
                if !running && !input_open {
                    break;
                }
            }
            received = input.recv(), if input_open => match received {
                Some(Input::Toggle) => {
                    let state = transport.toggle()?;
                    info!(?state, "start/stop pressed");
                }
                Some(Input::Quit) => break,
                None => input_open = false,
            },
        }
    }
    transport.stop();
    Ok(())
}
