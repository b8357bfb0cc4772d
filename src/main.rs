//! `ByteWatch` CLI - resolve movies and episodes into stream URLs

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bytewatch")]
#[command(about = "Resolve movies and episodes into playable stream URLs")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/bytewatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query every source and print the streams found
    Streams {
        /// movie or series
        media_type: String,

        /// IMDb id; series use tt1234567:<season>:<episode>
        id: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show the registered sources and the page each would open
    Sources {
        /// movie or series
        #[arg(short = 't', long = "type", default_value = "movie")]
        media_type: String,

        /// Provider (TMDB) id to build URLs for
        #[arg(long)]
        id: Option<u64>,

        #[arg(short, long, default_value = "1")]
        season: u32,

        #[arg(short, long, default_value = "1")]
        episode: u32,
    },

    /// Classify a request URL the way a browsing session would
    Classify {
        url: String,

        /// Source whose rules apply (decoy exclusion)
        #[arg(short, long, default_value = "vidsrc")]
        source: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Commands::Streams {
            media_type,
            id,
            json,
        } => cmd::streams::cmd_streams(cli.config.as_deref(), &media_type, &id, json).await,
        Commands::Sources {
            media_type,
            id,
            season,
            episode,
        } => cmd::sources::cmd_sources(&media_type, id, season, episode),
        Commands::Classify { url, source } => {
            cmd::classify::cmd_classify(cli.config.as_deref(), &url, &source)
        }
    }
}
