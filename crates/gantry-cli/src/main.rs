//! gantry: drive one shared actuator across a bank of stations.
//!
//! # Usage
//!
//! ```text
//! gantry run --experiment exp.toml --policy preemptive --timeout 2h
//! gantry validate --experiment exp.toml
//! gantry status --state-dir ./state
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gantry_core::{PolicyKind, parse_duration};

mod commands;

#[derive(Parser)]
#[command(
    name = "gantry",
    about = "Shared-actuator experiment runner",
    version,
    propagate_version = true
)]
struct Cli {
    /// Log as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an experiment on the simulated drivers.
    Run {
        /// Experiment file (TOML).
        #[arg(short, long)]
        experiment: PathBuf,

        /// Override the scheduling policy from the experiment file.
        #[arg(short, long)]
        policy: Option<PolicyKind>,

        /// Override the experiment timeout ("90s", "2h").
        #[arg(short, long, value_parser = duration_arg)]
        timeout: Option<Duration>,

        /// Directory for the snapshot store. Snapshots are not kept without it.
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Restore resource levels and actuator position from the latest
        /// snapshot in --state-dir.
        #[arg(long, requires = "state_dir")]
        resume: bool,

        /// Write the activity timeline as JSON.
        #[arg(long)]
        timeline: Option<PathBuf>,
    },
    /// Load an experiment and run the preparation checks without motion.
    Validate {
        #[arg(short, long)]
        experiment: PathBuf,
    },
    /// Print the latest snapshot and the recorded runs.
    Status {
        #[arg(long)]
        state_dir: PathBuf,

        /// How many runs to list, newest first.
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration {s:?}"))
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,gantry=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let code = match cli.command {
        Command::Run {
            experiment,
            policy,
            timeout,
            state_dir,
            resume,
            timeline,
        } => {
            commands::run::run(commands::run::RunArgs {
                experiment,
                policy,
                timeout,
                state_dir,
                resume,
                timeline,
            })
            .await?
        }
        Command::Validate { experiment } => commands::validate::validate(&experiment)?,
        Command::Status { state_dir, limit } => commands::status::status(&state_dir, limit)?,
    };

    std::process::exit(code);
}
