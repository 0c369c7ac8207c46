use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fetch, cache and inspect remote images
#[derive(Parser, Debug)]
#[command(name = "lumenctl", version)]
pub struct Cli {
    /// TOML or JSON config file (overrides $LUMEN_CONFIG_PATH)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory of the persistent cache (overrides config and $LUMEN_CACHE_DIR)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load images through the memory, disk and network tiers
    Fetch {
        /// Image URLs; falls back to the configured sources when empty
        urls: Vec<String>,
        /// Newline separated URL list, `#` comments allowed
        #[arg(long)]
        file: Option<PathBuf>,
        /// Cancel whatever is still loading after this many milliseconds
        #[arg(long, value_name = "MS")]
        cancel_after: Option<u64>,
    },
    /// Empty the persistent cache directory
    Clear,
    /// Print the content address (sha256 hex) of a URL
    Address {
        /// Absolute http(s) URL
        url: String,
    },
    /// Print where a URL is stored on disk and whether it is cached
    Where {
        /// Absolute http(s) URL
        url: String,
    },
}
