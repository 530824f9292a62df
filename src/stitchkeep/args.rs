use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use stitchkeep::model::Collection;

#[derive(Parser, Debug)]
#[command(name = "stitchkeep", version)]
#[command(about = "Inventory data vault: sync, search and backups", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory (local store, config.json)
    #[arg(long, global = true, env = "STITCHKEEP_HOME")]
    pub home: Option<PathBuf>,

    /// Collection API base URL (overrides config)
    #[arg(long, global = true, env = "STITCHKEEP_API_URL")]
    pub api_url: Option<String>,

    /// Shared secret for the Collection API (overrides config)
    #[arg(long, global = true, env = "STITCHKEEP_API_SECRET", hide_env_values = true)]
    pub api_secret: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show remote health and collection counts
    Status,

    /// Load data and report where it came from
    Pull,

    /// Load data, then save it to both backends
    Push,

    /// Manage snapshots
    #[command(subcommand)]
    Backup(BackupAction),

    /// Export all data to a file
    Export {
        file: PathBuf,

        /// Gzip the output
        #[arg(long)]
        gzip: bool,
    },

    /// Replace all data with an exported file (a pre-import snapshot is taken)
    Import { file: PathBuf },

    /// Free-text search in one collection
    Search { collection: Collection, text: String },

    /// Structured filter over one collection
    Filter(FilterArgs),

    /// Saved searches
    #[command(subcommand)]
    Saved(SavedAction),

    /// Recent changes
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Stay running and keep in sync with other writers until Ctrl-C
    Watch,
}

#[derive(Subcommand, Debug)]
pub enum BackupAction {
    /// Take a manual snapshot
    Create,

    /// List snapshots, newest first
    #[command(alias = "ls")]
    List,

    /// Restore a snapshot (the current state is snapshotted first)
    Restore { id: String },

    /// Delete a snapshot
    #[command(alias = "rm")]
    Delete { id: String },

    /// Configure automatic snapshots
    Auto {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,

        #[arg(long)]
        disable: bool,

        /// Interval between automatic snapshots
        #[arg(long)]
        hours: Option<i64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SavedAction {
    /// List saved searches
    #[command(alias = "ls")]
    List,

    /// Run a saved search
    Run { id: String },

    /// Delete a saved search
    #[command(alias = "rm")]
    Delete { id: String },
}

#[derive(Args, Debug)]
pub struct FilterArgs {
    pub collection: Collection,

    /// Free text
    #[arg(long)]
    pub text: Option<String>,

    /// Status values, any of (comma-separated or repeated)
    #[arg(long, value_delimiter = ',')]
    pub status: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub priority: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub customer: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    pub location: Vec<String>,

    /// Earliest date (YYYY-MM-DD), inclusive
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Latest date (YYYY-MM-DD), inclusive
    #[arg(long)]
    pub to: Option<NaiveDate>,

    #[arg(long)]
    pub min_price: Option<f64>,

    #[arg(long)]
    pub max_price: Option<f64>,

    /// Comma-separated tags, any of
    #[arg(long)]
    pub tags: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub page: usize,

    /// Defaults to the configured page size
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Also store this filter as a saved search
    #[arg(long)]
    pub save_as: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn filter_flags_parse() {
        let cli = Cli::try_parse_from([
            "stitchkeep",
            "filter",
            "sales",
            "--status",
            "pending,completed",
            "--min-price",
            "10",
            "--from",
            "2024-01-01",
        ])
        .unwrap();
        match cli.command {
            Commands::Filter(f) => {
                assert_eq!(f.collection, Collection::Sales);
                assert_eq!(f.status, vec!["pending", "completed"]);
                assert_eq!(f.min_price, Some(10.0));
                assert_eq!(f.from, NaiveDate::from_ymd_opt(2024, 1, 1));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn unknown_collection_is_rejected() {
        assert!(Cli::try_parse_from(["stitchkeep", "search", "widgets", "x"]).is_err());
    }
}
