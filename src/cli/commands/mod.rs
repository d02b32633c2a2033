//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod capture;
mod helpers;
mod init;
mod maintain;
mod replay;
mod sessions;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "cbpool")]
#[command(about = "Callback-session pool for scrape replay")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the session database (overrides config)
    #[arg(long, global = true, env = "CBPOOL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the data directory and database
    Init,

    /// Capture sessions now, topping regions up to the configured target
    Capture {
        /// Region to capture for (repeatable; all configured regions if omitted)
        #[arg(short, long)]
        region: Vec<String>,
        /// Healthy sessions to aim for per region (overrides config)
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Run the maintenance loop: periodic cleanup and capture top-ups
    Maintain {
        /// Minutes between maintenance passes (overrides config)
        #[arg(short, long)]
        interval_mins: Option<u64>,
    },

    /// Replay one request through a pooled session and report the outcome
    Replay {
        /// Region to draw the session from (first configured region if omitted)
        #[arg(short, long)]
        region: Option<String>,
    },

    /// Show pool health per region
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage stored sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommands,
    },
}

#[derive(Subcommand)]
enum SessionsCommands {
    /// List stored sessions
    List {
        /// Filter by region
        #[arg(short, long)]
        region: Option<String>,
        /// Include retired sessions
        #[arg(short, long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Permanently retire a session by id
    Retire {
        /// Session id
        id: i64,
    },
    /// Retire active sessions that are no longer healthy
    Cleanup,
    /// Delete sessions older than the retention window
    Prune {
        /// Days of history to keep (overrides config)
        #[arg(short, long)]
        days: Option<i64>,
    },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    match cli.command {
        Commands::Init => init::cmd_init(&settings).await,
        Commands::Capture { region, count } => {
            capture::cmd_capture(&settings, &region, count).await
        }
        Commands::Maintain { interval_mins } => {
            maintain::cmd_maintain(&settings, interval_mins).await
        }
        Commands::Replay { region } => replay::cmd_replay(&settings, region.as_deref()).await,
        Commands::Status { json } => status::cmd_status(&settings, json).await,
        Commands::Sessions { command } => match command {
            SessionsCommands::List { region, all, json } => {
                sessions::cmd_sessions_list(&settings, region.as_deref(), all, json).await
            }
            SessionsCommands::Retire { id } => sessions::cmd_sessions_retire(&settings, id).await,
            SessionsCommands::Cleanup => sessions::cmd_sessions_cleanup(&settings).await,
            SessionsCommands::Prune { days } => sessions::cmd_sessions_prune(&settings, days).await,
        },
    }
}
