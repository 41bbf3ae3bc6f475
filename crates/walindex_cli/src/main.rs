//! walindex CLI
//!
//! Command-line tools for running and debugging the CDC engine.
//!
//! # Commands
//!
//! - `check-slot` - Validate a replication slot and count its pending records
//! - `peek` - Print pending records without consuming them
//! - `decode` - Parse raw `test_decoding` lines offline
//! - `run` - Keep the search index in step with the slot

mod commands;
mod sink;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// walindex command-line tools.
#[derive(Parser)]
#[command(name = "walindex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a replication slot and count its pending records
    CheckSlot {
        /// Connection URL of the system-of-record
        #[arg(short, long, env = "WALINDEX_DATABASE_URL")]
        url: String,

        /// Name of the logical replication slot
        #[arg(short, long)]
        slot: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print pending records without consuming them
    Peek {
        /// Connection URL of the system-of-record
        #[arg(short, long, env = "WALINDEX_DATABASE_URL")]
        url: String,

        /// Name of the logical replication slot
        #[arg(short, long)]
        slot: String,

        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Parse raw decoded lines offline
    Decode {
        /// Schema catalog (JSON)
        #[arg(short, long)]
        catalog: PathBuf,

        /// File with one record per line (stdin if absent)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Keep the search index in step with the slot
    Run {
        /// Connection URL of the system-of-record
        #[arg(short, long, env = "WALINDEX_DATABASE_URL")]
        url: String,

        /// Name of the logical replication slot
        #[arg(short, long)]
        slot: String,

        /// Schema catalog (JSON)
        #[arg(short, long)]
        catalog: PathBuf,

        /// Run one cycle and exit
        #[arg(long)]
        once: bool,

        /// Pause between cycles in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Attempts per cycle on transient errors
        #[arg(long, default_value = "3")]
        max_attempts: u32,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::CheckSlot { url, slot, format } => {
            commands::check_slot::run(&url, &slot, &format)?;
        }
        Commands::Peek {
            url,
            slot,
            limit,
            format,
        } => {
            commands::peek::run(&url, &slot, limit, &format)?;
        }
        Commands::Decode {
            catalog,
            input,
            format,
        } => {
            commands::decode::run(&catalog, input.as_deref(), &format)?;
        }
        Commands::Run {
            url,
            slot,
            catalog,
            once,
            interval_ms,
            max_attempts,
        } => {
            let options = commands::run::RunOptions {
                once,
                interval_ms,
                max_attempts,
            };
            commands::run::run(&url, &slot, &catalog, &options)?;
        }
        Commands::Version => {
            println!("walindex CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("decoding plugin {}", walindex_protocol::DECODING_PLUGIN);
        }
    }

    Ok(())
}
