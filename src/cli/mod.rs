pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "orgrelay")]
#[command(about = "An Org Social relay: aggregates social.org feeds and tracks their interactions", long_about = None)]
pub struct Cli {
    /// Number of feeds fetched concurrently (overrides the config file)
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Alternative config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a feed after validating it
    Add {
        /// URL of the social.org file
        url: String,
    },
    /// Unregister a feed
    Remove {
        /// URL of the feed to remove
        url: String,
    },
    /// List registered feeds
    List,
    /// Run one sync cycle over every feed
    Sync,
    /// Remove feeds that have not been fetched successfully for too long
    Cleanup,
    /// Show the reply tree below a post
    Replies {
        /// Post reference, e.g. https://example.com/social.org#2025-01-01T10:00:00+0100
        post: String,
    },
    /// Show reactions, replies, boosts and parent chain of a post
    Interactions {
        /// Post reference
        post: String,
    },
    /// Show mentions, reactions and replies received by a feed
    Notifications {
        /// Feed URL
        feed: String,

        /// Only one type: mention, reaction or reply
        #[arg(short = 't', long = "type")]
        kind: Option<String>,
    },
    /// Show the polls of a feed with vote counts
    Polls {
        /// Feed URL
        feed: String,
    },
    /// Show the reply tree of every top-level post of a feed
    Threads {
        /// Feed URL
        feed: String,
    },
    /// Run the daemon and stream a feed's notifications as server-sent events
    Watch {
        /// Feed URL whose notifications are printed
        feed: String,

        /// Sync interval (e.g., "30s", "1m", "1h"); defaults to the config file
        #[arg(short, long)]
        interval: Option<String>,
    },
    /// Keep syncing in the foreground until interrupted
    Daemon {
        /// Sync interval (e.g., "30s", "1m", "1h"); defaults to the config file
        #[arg(short, long)]
        interval: Option<String>,

        /// Skip the initial sync on start
        #[arg(long)]
        no_initial_update: bool,
    },
}
