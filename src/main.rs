use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use corkboard::telemetry::{self, TelemetryConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "corkboard")]
#[command(version, about = "Collaborative Kanban board server")]
pub struct Cli {
    /// Debug-level logging when RUST_LOG is unset
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write logs to a daily-rotated file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .corkboard/corkboard.toml and the board database
    Init {
        /// Also create a board with this name
        #[arg(long)]
        board: Option<String>,
        /// Column names for the new board (default: Todo, Doing, Done)
        #[arg(long = "column", requires = "board")]
        columns: Vec<String>,
    },
    /// Run the board server
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        db_path: Option<PathBuf>,
        /// Bind on all interfaces and allow cross-origin requests
        #[arg(long)]
        dev: bool,
    },
    /// Print a board's columns and cards in display order
    Show {
        board: i64,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Respace positions to 1024, 2048, ... keeping their order
    Renumber {
        /// Column whose cards to renumber
        #[arg(long, required_unless_present = "columns_of", conflicts_with = "columns_of")]
        column: Option<i64>,
        /// Restrict to one swimlane of the column
        #[arg(long, requires = "column")]
        lane: Option<i64>,
        /// Renumber the columns of this board instead
        #[arg(long)]
        columns_of: Option<i64>,
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default corkboard.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = telemetry::init(&TelemetryConfig {
        verbose: cli.verbose,
        json: cli.log_json,
        log_dir: cli.log_dir.clone(),
    })?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init { board, columns } => {
            cmd::cmd_init(&project_dir, board.as_deref(), columns)?;
        }
        Commands::Serve { port, db_path, dev } => {
            cmd::cmd_serve(&project_dir, *port, db_path.clone(), *dev).await?;
        }
        Commands::Show {
            board,
            json,
            db_path,
        } => cmd::cmd_show(&project_dir, db_path.as_deref(), *board, *json)?,
        Commands::Renumber {
            column,
            lane,
            columns_of,
            db_path,
        } => cmd::cmd_renumber(&project_dir, db_path.as_deref(), *column, *lane, *columns_of)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
