use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "warden", version)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create the policy, assignment and activity tables.
    Migrate,
    /// Print every stored rule as a policy line.
    ExportPolicy,
    /// Replace the stored rule set with the rules of a policy file.
    ImportPolicy {
        #[arg(long)]
        file: PathBuf,
    },
    /// Print rule and assignment counts.
    Stats,
    /// Print a user's recent activity, or search it when a query is given.
    Activity {
        #[arg(long)]
        user: String,
        /// Defaults to `cache.recent_activity_limit`.
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        query: Option<String>,
    },
}
