//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// articles2kindle: bundle read-later articles into EPUBs and mail them to Kindle
#[derive(Parser, Debug)]
#[command(name = "articles2kindle")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch new articles from the configured sources
    Fetch(FetchArgs),

    /// List stored articles, publications, authors or bundles
    List(ListArgs),

    /// Bundle unbundled articles of one publication or author into EPUBs
    Bundle(BundleArgs),

    /// Email bundles to the configured Kindle addresses
    Send(SendArgs),

    /// Fetch, bundle every publication in a folder, and send the results
    Run(RunArgs),

    /// List remote collections of a source
    Collections(CollectionsArgs),

    /// Validate configuration and source connections
    Doctor(DoctorArgs),

    /// Mark every article as unbundled again
    ResetBundled(ResetArgs),

    /// Configuration management
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Ignore the last successful fetch and fetch everything
    #[arg(long)]
    pub full: bool,

    /// Fetch only this source (feedly, substack)
    #[arg(long)]
    pub source: Option<String>,

    /// Stop after this many articles
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(subcommand)]
    pub command: ListCommands,
}

#[derive(Subcommand, Debug)]
pub enum ListCommands {
    /// List articles, newest first
    Articles {
        /// Filter by author name (substring)
        #[arg(long)]
        author: Option<String>,

        /// Include bundled articles
        #[arg(long)]
        all: bool,

        /// Limit number of results
        #[arg(long, default_value_t = 50)]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List publications with article counts
    Publications {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List authors with article counts
    Authors {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List bundles, newest first
    Bundles {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct BundleArgs {
    /// Bundle articles of this publication
    #[arg(
        long,
        conflicts_with_all = ["author", "all"],
        required_unless_present_any = ["author", "all"]
    )]
    pub publication: Option<String>,

    /// Bundle articles of this author
    #[arg(long, conflicts_with = "all")]
    pub author: Option<String>,

    /// Bundle every publication that has unbundled articles
    #[arg(long)]
    pub all: bool,

    /// Custom bundle title
    #[arg(long, conflicts_with = "all")]
    pub title: Option<String>,

    /// Download and embed images
    #[arg(long)]
    pub with_images: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Send this bundle instead of the latest unsent one
    #[arg(long, conflicts_with = "all")]
    pub bundle: Option<i64>,

    /// Send every unsent bundle, oldest first
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Folder (tag) whose publications are bundled
    #[arg(long)]
    pub folder: String,

    /// Ignore the last successful fetch and fetch everything
    #[arg(long)]
    pub full: bool,

    /// Download and embed images
    #[arg(long)]
    pub with_images: bool,
}

#[derive(Args, Debug)]
pub struct CollectionsArgs {
    /// Source to query (defaults to the first configured one)
    #[arg(long)]
    pub source: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Skip remote connection checks
    #[arg(long)]
    pub offline: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Confirm the reset
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate example configuration file
    Init {
        /// Path to write config file
        #[arg(long, default_value = "./config.toml")]
        path: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,
}
