//! Chime: personal reminder engine
//!
//! Main binary with subcommands:
//! - `run`: Host the dispatch engine over a JSON task file
//! - `preview`: Print upcoming occurrences for each task in a file

use std::path::PathBuf;
use std::time::Duration;

use chime_scheduler::EngineConfig;
use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod daemon;
mod preview;
mod task_file;

#[derive(Parser)]
#[command(name = "chime")]
#[command(about = "Personal reminder engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine until interrupted, logging each reminder as it fires
    Run {
        /// JSON file holding an array of tasks
        #[arg(long, env = "CHIME_TASKS")]
        tasks: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Show the next occurrences of every task without running the engine
    Preview {
        /// JSON file holding an array of tasks
        #[arg(long, env = "CHIME_TASKS")]
        tasks: PathBuf,

        /// Number of occurrences to show per task
        #[arg(long, default_value = "5")]
        count: usize,
    },
}

/// Engine tunables.
#[derive(Args, Debug, Clone)]
struct EngineArgs {
    /// Seconds to wait before reloading tasks when the queue is empty
    #[arg(long, env = "CHIME_FALLBACK_RELOAD_SECS", default_value = "60")]
    fallback_reload_secs: u64,

    /// Longest single timer in milliseconds; longer waits are re-armed
    #[arg(long, env = "CHIME_MAX_TIMER_DELAY_MS", default_value = "2147483647")]
    max_timer_delay_ms: u64,

    /// Consecutive failures before a task is marked failed
    #[arg(long, env = "CHIME_FAILURE_THRESHOLD", default_value = "3")]
    failure_threshold: u32,

    /// Capacity of the engine's request queue
    #[arg(long, env = "CHIME_COMMAND_BUFFER", default_value = "100")]
    command_buffer: usize,
}

impl From<EngineArgs> for EngineConfig {
    fn from(args: EngineArgs) -> Self {
        Self {
            fallback_reload_interval: Duration::from_secs(args.fallback_reload_secs),
            max_timer_delay: Duration::from_millis(args.max_timer_delay_ms),
            failure_threshold: args.failure_threshold,
            command_buffer: args.command_buffer,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "chime=info,chime_scheduler=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { tasks, engine } => daemon::run(&tasks, engine.into()).await,
        Commands::Preview { tasks, count } => preview::run(&tasks, count).await,
    }
}
