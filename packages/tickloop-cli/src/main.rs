use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tickloop_scheduler::{Timing, TimingMode};
use tracing_subscriber::EnvFilter;

mod config;
mod demo;

use config::DemoConfig;

#[derive(Parser)]
#[command(name = "tickloop")]
#[command(about = "Tickloop main-loop demo runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a demo loop in real time
    Run {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the effective configuration as JSON
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[derive(clap::Args)]
struct Overrides {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Timing discipline
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Interval in ms (fixed-delay) or decimation factor (display-sync)
    #[arg(long)]
    value: Option<f64>,
    /// Frames per second; replaces --mode/--value
    #[arg(long, conflicts_with_all = ["mode", "value"])]
    fps: Option<f64>,
    /// Frames to run before exiting
    #[arg(long)]
    frames: Option<u32>,
    /// Counted blockers queued before the first frame
    #[arg(long)]
    blockers: Option<u32>,
    /// Uncounted blockers queued after the counted ones
    #[arg(long)]
    uncounted: Option<u32>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    FixedDelay,
    DisplaySync,
    Immediate,
}

impl From<ModeArg> for TimingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::FixedDelay => TimingMode::FixedDelay,
            ModeArg::DisplaySync => TimingMode::DisplaySync,
            ModeArg::Immediate => TimingMode::Immediate,
        }
    }
}

impl Overrides {
    fn resolve(&self) -> Result<DemoConfig> {
        let mut config = DemoConfig::load(self.config.as_deref())?;
        if let Some(fps) = self.fps {
            config.timing = Timing::from_fps(fps);
        }
        if let Some(mode) = self.mode {
            config.timing.mode = mode.into();
        }
        if let Some(value) = self.value {
            config.timing.value = value;
        }
        if let Some(frames) = self.frames {
            config.frames = frames;
        }
        if let Some(blockers) = self.blockers {
            config.blockers = blockers;
        }
        if let Some(uncounted) = self.uncounted {
            config.uncounted_blockers = uncounted;
        }
        config.timing.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { overrides } => {
            let config = overrides.resolve()?;
            let report = demo::run(&config)?;
            println!(
                "Ran {} frames and {} blockers in {:.1} ms",
                report.frames, report.blockers, report.elapsed_ms
            );
            if let Some(status) = report.last_status {
                println!("Final status: {}", status);
            }
        }
        Commands::Config { overrides } => {
            let config = overrides.resolve()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
