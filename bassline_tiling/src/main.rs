// Bassline Tiling: CLI entry point.
//
// Tiles a chord chart with the built-in pattern library and prints the
// resulting layout, or the rendered notes as JSON.
//
// Usage:
//   cargo run -p bassline_tiling --bin tile -- --chords "Dm7 | G7 | Cmaj7 | %"
//     [--config engine.json] [--robustness N] [--strategy NAME]
//     [--beats N] [--no-fallback] [--json]
//
// Strategies: most-compatible-first, best-first, one-out-of-two,
//   one-out-of-N, max-coverage=F
//
// Log verbosity follows RUST_LOG (default "info").

use bassline_tiling::config::PrimaryStrategy;
use bassline_tiling::source::SourceOrigin;
use bassline_tiling::{ChordSequence, EngineConfig, PatternDatabase, TilingEngine};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tile", about = "Tile a chord chart with walking-bass patterns")]
struct Args {
    /// Chord chart: bars separated by '|', '%' repeats, '?' marks an unusable bar.
    #[arg(long)]
    chords: String,

    /// Beats per bar.
    #[arg(long, default_value_t = 4)]
    beats: u8,

    /// JSON engine configuration; missing fields take defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the iteration bound.
    #[arg(long)]
    robustness: Option<usize>,

    /// Override the primary strategy.
    #[arg(long)]
    strategy: Option<PrimaryStrategy>,

    /// Leave gaps silent instead of synthesizing lines.
    #[arg(long)]
    no_fallback: bool,

    /// Print the rendered notes as JSON instead of the layout.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> bassline_tiling::Result<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(robustness) = args.robustness {
        config.robustness = robustness;
    }
    if let Some(strategy) = &args.strategy {
        config.primary = strategy.clone();
    }
    if args.no_fallback {
        config.fallback_enabled = false;
    }

    let seq = ChordSequence::parse(&args.chords, args.beats)?;
    let engine = TilingEngine::new(Arc::new(PatternDatabase::with_default_library()), config)?;

    if !args.json {
        println!("=== Bassline Tiling ===");
        println!("Chart: {}", seq);
        println!(
            "Bars: {} ({} usable), {}/4",
            seq.len(),
            seq.usable_bar_count(),
            args.beats
        );
        println!("Library: {} patterns", engine.database().len());
        println!("Strategy: {}", engine.config().primary);
        println!();
    }

    let outcome = engine.generate(&seq)?;

    if args.json {
        let phrase = outcome.render();
        println!("{}", serde_json::to_string_pretty(&phrase)?);
        return Ok(());
    }

    println!("Status: {} after {} iteration(s)", outcome.status, outcome.iterations);
    for placement in outcome.tiling.placements() {
        let origin = match placement.source.origin {
            SourceOrigin::Synthesized => " (synthesized)",
            SourceOrigin::Recorded => "",
        };
        println!("  {}{}", placement, origin);
    }
    if !outcome.is_complete() {
        println!("  Silent bars: {:?}", outcome.uncovered);
    }
    let phrase = outcome.render();
    println!("Rendered {} notes.", phrase.len());
    Ok(())
}
