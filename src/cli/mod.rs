pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::Source;

#[derive(Parser)]
#[command(name = "tailburrow")]
#[command(about = "A local archive for e621 and FurAffinity favorites", long_about = None)]
pub struct Cli {
    /// Library root to use instead of the configured one
    #[arg(long, global = true)]
    pub library: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the library directory
    Library {
        #[command(subcommand)]
        action: LibraryAction,
    },
    /// Manage per-source credentials
    Creds {
        #[command(subcommand)]
        action: CredsAction,
    },
    /// Sync favorites from a source into the library
    Sync {
        /// Source to sync (e621 or furaffinity)
        source: Source,

        /// Stop after this many new items
        #[arg(long)]
        max: Option<u32>,

        /// Print status snapshots as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Look up FurAffinity exclusives on e621 again
    Recheck,
    /// List archived items, newest first
    List {
        #[arg(long, default_value_t = 50)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
    /// Replace the tags of an item
    Tags {
        /// Item id
        item: i64,

        /// New tags (replaces all existing ones)
        tags: Vec<String>,
    },
    /// Move an item to the trash
    Trash {
        /// Item id
        item: i64,
    },
    /// Restore a trashed item
    Restore {
        /// Item id
        item: i64,
    },
    /// Delete trashed items older than the retention window
    Purge,
    /// Show posts that could not be archived
    Unavailable {
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Saved e621 queries
    Feed {
        #[command(subcommand)]
        action: FeedAction,
    },
    /// e621 account helpers
    E621 {
        #[command(subcommand)]
        action: E621Action,
    },
}

#[derive(Subcommand)]
pub enum LibraryAction {
    /// Create the library layout and remember it in the config file
    Init {
        /// Library root directory
        path: PathBuf,
    },
    /// Show library statistics
    Stats,
}

#[derive(Subcommand)]
pub enum CredsAction {
    /// Show the stored username (never the secret)
    Show { source: Source },
    /// Store credentials; an omitted secret keeps the existing one
    Set {
        source: Source,

        /// e621 username, or FurAffinity cookie `a`
        username: String,

        /// e621 API key, or FurAffinity cookie `b`
        #[arg(long)]
        secret: Option<String>,
    },
    /// Remove stored credentials
    Clear { source: Source },
}

#[derive(Subcommand)]
pub enum FeedAction {
    /// Save a query under a name
    Add { name: String, query: String },
    /// List saved queries
    List,
    /// Remove a saved query
    Remove { name: String },
    /// Show the newest posts matching a saved query
    Browse { name: String },
}

#[derive(Subcommand)]
pub enum E621Action {
    /// Check that the stored credentials are accepted
    Test,
    /// Add a post to the remote favorites
    Favorite {
        /// Post id
        id: u64,
    },
}
