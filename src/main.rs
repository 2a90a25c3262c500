//! Offline replay: reads detector output as JSON lines, prints analysis results as JSON lines.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rom_tracker::config::Config;
use rom_tracker::replay::{self, ReplayOptions};

#[derive(Parser, Debug)]
#[command(version = env!("GIT_VERSION"), about = "Replay pose detections through the analysis pipeline")]
struct Cli {
    /// JSON lines, one FrameInput per line ("-" for stdin)
    #[arg(long)]
    input: PathBuf,

    /// ROM test to run (lower_back_flexion, hawkins)
    #[arg(long)]
    test: Option<String>,

    /// Config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Buffer the whole recording and smooth it forward and backward (no lag)
    #[arg(long)]
    zero_phase: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let reader: Box<dyn BufRead> = if cli.input.as_os_str() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&cli.input)
            .with_context(|| format!("failed to open {}", cli.input.display()))?;
        Box::new(BufReader::new(file))
    };
    let out = BufWriter::new(io::stdout().lock());

    let options = ReplayOptions {
        test: cli.test,
        zero_phase: cli.zero_phase,
    };
    let summary = replay::run(&config, &options, reader, out)?;

    tracing::info!(frames = summary.frames, rejected = summary.rejected, "replay finished");
    Ok(())
}
