//! splitdl CLI - Queue large downloads and deliver them in parts
//!
//! `serve` turns stdin lines into download requests and drops each part into
//! a per-sender outbox directory; `fetch` pulls a single URL in parts.

mod commands;
mod output;
mod progress;
mod sink;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// splitdl - Chunked download queue
#[derive(Parser)]
#[command(name = "splitdl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Data directory for splitdl
    #[arg(long, env = "SPLITDL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Read "<sender> <message>" lines from stdin and deliver parts
    Serve {
        /// Directory that receives one folder per sender
        #[arg(short, long, default_value = "outbox")]
        outbox: PathBuf,
    },

    /// Download a single URL in parts
    Fetch {
        /// URL to download
        url: String,

        /// Directory to write the parts into
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show/update settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,

        /// Config value
        value: String,
    },

    /// Show all config
    Show,

    /// Reset to defaults
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "splitdl=debug,splitdl_core=debug,info"
    } else {
        "splitdl=info,splitdl_core=info,warn"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Determine data directory
    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .map(|d| d.join("splitdl"))
            .unwrap_or_else(|| PathBuf::from(".splitdl"))
    });

    let storage = splitdl_core::Storage::new(data_dir).await?;

    // Execute command
    match cli.command {
        Commands::Serve { outbox } => commands::serve(&storage, outbox, cli.output).await?,

        Commands::Fetch { url, output } => {
            commands::fetch(&storage, &url, output, cli.output).await?
        }

        Commands::Config { action } => {
            commands::config_action(&storage, action, cli.output).await?
        }

        Commands::Completions { shell } => {
            use clap::CommandFactory;
            clap_complete::generate(shell, &mut Cli::command(), "splitdl", &mut std::io::stdout());
        }
    }

    Ok(())
}
