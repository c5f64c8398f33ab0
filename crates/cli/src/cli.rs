use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(about = "Versioned SQL schema migrations", version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand. Anything set here wins over the
/// config file and the environment.
#[derive(Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Path to a TOML config file (defaults to ./stepwise.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database URL, e.g. postgres://user@localhost/app or sqlite://app.db
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Directory holding <id>_<name>.sql migration files
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Schema of the version log table
    #[arg(long, global = true)]
    pub schema: Option<String>,

    /// Name of the version log table
    #[arg(long, global = true)]
    pub table: Option<String>,

    /// Per-step timeout in seconds, 0 for none
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Do not take the database lock
    #[arg(long, global = true)]
    pub no_lock: bool,

    /// Run every step outside of a transaction
    #[arg(long, global = true)]
    pub disable_tx: bool,

    /// Unlock and retry once if the lock is held
    #[arg(long, global = true)]
    pub force: bool,

    /// Apply, revert and re-apply every migration on the way
    #[arg(long, global = true)]
    pub zig_zag: bool,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply pending migrations
    Up {
        /// Apply only this many migrations
        #[arg(long, short)]
        num: Option<usize>,
    },

    /// Revert applied migrations (one by default)
    Down {
        /// Revert this many migrations
        #[arg(long, short, conflicts_with = "all")]
        num: Option<usize>,

        /// Revert every applied migration
        #[arg(long)]
        all: bool,
    },

    /// Revert and re-apply the current migration
    Redo,

    /// Revert everything and drop the version log table
    Drop,

    /// Show the current version and pending migrations
    Status,

    /// Create a new migration file
    New {
        /// Migration name
        name: String,
    },
}
