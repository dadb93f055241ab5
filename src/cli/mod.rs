//! Council CLI
//!
//! Commands:
//! - `council weekly` - Run the weekly pitch, review, decide and execute cycle
//! - `council pitch` - Regenerate one agent's pitch
//! - `council checkpoint` - Run an intraday checkpoint
//! - `council show` - Inspect the current cycle
//! - `council accounts` - List configured accounts
//! - `council schedule` - Show checkpoint times

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};

/// Multi-model trading council
#[derive(Parser, Debug)]
#[command(name = "council")]
#[command(author, version, about = "Multi-model trading council", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override dry run mode: `--dry-run` = true, `--dry-run=false` = false
    #[arg(short, long, num_args = 0..=1, default_missing_value = "true")]
    pub dry_run: Option<bool>,

    /// Config file path
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full weekly cycle
    Weekly {
        /// Research packet (JSON)
        #[arg(short, long)]
        research: String,
        /// Market snapshot (JSON); without it no indicators are frozen
        #[arg(short, long)]
        snapshot: Option<String>,
        /// Fixed seed for the peer review label shuffle
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Regenerate one agent's pitch for the current cycle
    Pitch {
        /// Agent id from the roster
        #[arg(short, long)]
        agent: String,
        #[arg(short, long)]
        research: String,
        #[arg(short, long)]
        snapshot: Option<String>,
    },

    /// Re-evaluate every account against the frozen indicators
    Checkpoint {
        /// Run even outside the scheduled times
        #[arg(long)]
        force: bool,
    },

    /// Inspect persisted state
    #[command(subcommand)]
    Show(ShowCommands),

    /// List configured accounts
    Accounts,

    /// Print the checkpoint schedule and the next run
    Schedule,
}

#[derive(Subcommand, Debug)]
pub enum ShowCommands {
    /// Current pitches, one per agent
    Pitches,
    /// Latest council decision
    Decision,
    /// Latest execution report
    Report,
}
