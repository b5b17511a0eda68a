pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log file (defaults to the data directory)
    #[arg(long, global = true)]
    pub log_file: Option<String>,
}

/// Overrides shared by the crawl commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// Configuration profile to start from
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Directory for page captures and reports
    #[arg(short, long)]
    pub output_dir: Option<String>,

    /// Maximum number of pages crawled at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Log in before crawling
    #[arg(long)]
    pub login: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl every URL listed in a file
    Crawl {
        /// Newline-delimited URL list
        #[arg(short, long)]
        urls_file: Option<String>,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Crawl a site recursively from a base URL
    Scan {
        /// URL to start from
        #[arg(required = true)]
        base_url: String,

        /// Maximum link depth from the base URL
        #[arg(short, long)]
        depth: Option<u32>,

        /// Maximum number of pages to crawl
        #[arg(short, long)]
        limit: Option<u32>,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Rebuild analytics and summaries from an output directory
    Report {
        /// Output directory of a previous run
        #[arg(required = true)]
        output_dir: String,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl { urls_file, options } => {
            info!("Starting flat crawl");
            commands::crawl(urls_file, options).await
        }
        Commands::Scan {
            base_url,
            depth,
            limit,
            options,
        } => {
            info!("Starting recursive crawl from {}", base_url);
            commands::scan(base_url, depth, limit, options).await
        }
        Commands::Report { output_dir } => {
            info!("Rebuilding reports in {}", output_dir);
            commands::report(output_dir).await
        }
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        }
    }
}
