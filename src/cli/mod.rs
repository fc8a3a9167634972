pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a file (a default location is used when no path is given)
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<Option<PathBuf>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a site and export its video graph
    Crawl(CrawlArgs),

    /// Manage configuration profiles
    Config {
        /// Profile name to show, or create if missing
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Options of the `crawl` command. Anything given here overrides the profile.
#[derive(Args, Debug, Default)]
pub struct CrawlArgs {
    /// URL to start crawling from
    #[arg(long, required = true)]
    pub url: String,

    /// Configuration profile to load instead of the default
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Directory for the graph exports
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Capture page screenshots into this directory
    #[arg(long)]
    pub screenshots_dir: Option<PathBuf>,

    /// Stop after this many videos were scraped
    #[arg(long)]
    pub max_videos: Option<usize>,

    /// Maximum hops from the start URL
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Pages followed per paginated listing, first page included
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Record categories without crawling into them
    #[arg(long)]
    pub skip_categories: bool,

    /// Maximum renders in flight
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Stop the whole crawl after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Base URL of the rendering service
    #[arg(long)]
    pub splash_url: Option<String>,
}

impl Cli {
    /// Log file requested on the command line, if any
    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_file
            .as_ref()
            .map(|path| path.clone().unwrap_or_else(crate::utils::default_log_file))
    }
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl(args) => {
            info!("Starting crawl on {}", args.url);
            commands::crawl(args).await
        },
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(&profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        },
    }
}
