//! ragindex CLI: build, query and serve an incremental RAG index.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// ragindex: incremental retrieval-augmented-generation over your documents
#[derive(Parser, Debug)]
#[command(name = "ragindex", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (index, checkpoints and `.ragindex/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (replaces the user and workspace files)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum Commands {
    /// Index new documents, resuming from the last checkpoint
    Build(BuildArgs),
    /// Answer one question from the index
    Query {
        /// The question to answer
        question: String,
        /// Number of chunks to retrieve (defaults to query.top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Serve the HTTP query endpoint
    Serve {
        /// Bind address (defaults to server.host)
        #[arg(long)]
        host: Option<String>,
        /// Port (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show index size and the last checkpoint
    Status,
    /// Download every record of a paginated API into a JSONL file
    Fetch {
        /// API base URL
        url: String,
        /// Endpoint path under the base URL
        #[arg(short, long, default_value = "items")]
        endpoint: String,
        /// Output file (relative paths resolve against the workspace)
        #[arg(short, long, default_value = "data/documents.jsonl")]
        output: PathBuf,
        /// Bearer token sent with every request
        #[arg(long)]
        api_key: Option<String>,
        /// Stop after this many records
        #[arg(long)]
        total: Option<usize>,
    },
    /// List generation models available to the configured API key
    Models,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Where `build` reads documents from. Without a flag, `data/` in the
/// workspace is read as a directory of text files.
#[derive(clap::Args, Debug, Default)]
#[command(group(
    clap::ArgGroup::new("input").args(["jsonl", "api", "sqlite", "dir"])
))]
pub(crate) struct BuildArgs {
    /// Newline-delimited JSON file of documents
    #[arg(long)]
    jsonl: Option<PathBuf>,

    /// Base URL of a paginated REST API
    #[arg(long)]
    api: Option<String>,

    /// API endpoint path (with --api)
    #[arg(long, default_value = "items", requires = "api")]
    endpoint: String,

    /// Bearer token for the API (with --api)
    #[arg(long, requires = "api")]
    api_key: Option<String>,

    /// Stop after this many API records (with --api)
    #[arg(long, requires = "api")]
    total: Option<usize>,

    /// SQLite database with a `documents` table
    #[arg(long)]
    sqlite: Option<PathBuf>,

    /// Directory of .txt files
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Delete the index and checkpoint before building
    #[arg(long)]
    reset: bool,
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "ragindex", "ragindex")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "ragindex.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, cli.config.as_deref()).await
}
