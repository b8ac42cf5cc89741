//! CLI module for Itinera.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Itinera - multi-agent travel planning
///
/// A coordinator routes each request between planner, location search,
/// calendar and share agents. Every step is recorded, so sessions can be
/// resumed and audited.
#[derive(Parser, Debug)]
#[command(name = "itinera")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan a trip from a single request
    Plan {
        /// The travel request, e.g. "plan a 3-night, 4-day Seoul trip"
        request: String,

        /// Confirm an irreversible tool up front (repeatable)
        #[arg(long = "confirm", value_name = "TOOL")]
        confirm: Vec<String>,

        /// Confirm every irreversible tool
        #[arg(long)]
        confirm_all: bool,

        /// Continue an existing session, or create one with this id
        #[arg(short, long)]
        session: Option<String>,

        /// Answer with scripted model outputs from a JSON file instead of a live model
        #[arg(long, value_name = "FILE")]
        script: Option<PathBuf>,

        /// Print the response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start an interactive planning session
    Chat {
        /// Resume an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// Answer with scripted model outputs from a JSON file instead of a live model
        #[arg(long, value_name = "FILE")]
        script: Option<PathBuf>,
    },

    /// Rebuild a session from its log and show the result
    Replay {
        /// Session id
        session: String,

        /// Print every history record
        #[arg(long)]
        history: bool,
    },

    /// List or delete stored sessions
    Sessions {
        #[command(subcommand)]
        action: Option<SessionsAction>,
    },

    /// List the registered tools and which agents may use them
    Tools,

    /// Start HTTP API server for integration with other systems
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// List stored sessions (default)
    List,

    /// Delete a session and its history
    Delete {
        /// Session id
        session: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
