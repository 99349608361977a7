//! CLI subcommand handlers.

use crate::BuildArgs;
use crate::Commands;
use crate::ConfigAction;
use ragindex_core::config::{self, RagConfig};
use ragindex_core::providers::{GeminiEmbedder, GeminiGenerator, list_models};
use ragindex_core::server::{self, require_index};
use ragindex_core::sources::text_dir::has_text_files;
use ragindex_core::{
    ApiSource, BuildError, BuildSettings, BuildStats, CheckpointStore, Chunker, DocumentSource,
    EmbeddingClient, IncrementalIndexBuilder, JsonlSource, QueryEngine, SqliteSource,
    TextDirSource, TiktokenTokenizer, VectorIndex,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Directory read by `build` when no input flag is given.
const DEFAULT_DATA_DIR: &str = "data";

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace, config_file),
        Commands::Build(args) => {
            let config = load(workspace, config_file)?;
            handle_build(args, workspace, &config).await
        }
        Commands::Query { question, top_k } => {
            let config = load(workspace, config_file)?;
            handle_query(&question, top_k, workspace, &config).await
        }
        Commands::Serve { host, port } => {
            let config = load(workspace, config_file)?;
            handle_serve(host, port, workspace, config).await
        }
        Commands::Status => handle_status(workspace, &load(workspace, config_file)?),
        Commands::Fetch {
            url,
            endpoint,
            output,
            api_key,
            total,
        } => {
            let config = load(workspace, config_file)?;
            handle_fetch(&url, &endpoint, &output, api_key, total, workspace, &config).await
        }
        Commands::Models => handle_models(&load(workspace, config_file)?).await,
    }
}

fn load(workspace: &Path, config_file: Option<&Path>) -> anyhow::Result<RagConfig> {
    match config_file {
        Some(path) => config::load_config_file(path),
        None => config::load_config(Some(workspace), None),
    }
    .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))
}

fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config_file: Option<&Path>,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = config::workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            let written = config::init_workspace_config(workspace)?;
            println!("Created default configuration at: {}", written.display());
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, config_file)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

fn open_index(workspace: &Path, config: &RagConfig) -> VectorIndex {
    VectorIndex::new(
        config.embedding.dimensions,
        config.index.paths(workspace),
    )
}

fn embedding_client(config: &RagConfig) -> anyhow::Result<EmbeddingClient> {
    let api_key = config::api_key_from_env(&config.embedding.api_key_env)?;
    let backend = GeminiEmbedder::new(&config.embedding, api_key)?;
    Ok(EmbeddingClient::from_config(
        Arc::new(backend),
        &config.embedding,
        &config.retry,
    ))
}

fn query_engine(config: &RagConfig) -> anyhow::Result<QueryEngine> {
    let api_key = config::api_key_from_env(&config.generation.api_key_env)?;
    let generator = GeminiGenerator::new(&config.generation, api_key)?;
    Ok(QueryEngine::new(
        embedding_client(config)?,
        Arc::new(generator),
        config.query.clone(),
        config.generation.clone(),
    ))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping");
            token.cancel();
        }
    });
}

/// The selected input, or `None` when it has nothing to read.
fn select_source(
    args: &BuildArgs,
    workspace: &Path,
    config: &RagConfig,
) -> anyhow::Result<Option<Box<dyn DocumentSource>>> {
    if let Some(url) = &args.api {
        let mut source = ApiSource::new(url.as_str(), args.endpoint.as_str(), &config.source)?;
        if let Some(key) = &args.api_key {
            source = source.with_api_key(key.as_str());
        }
        if let Some(total) = args.total {
            source = source.with_total_records(total);
        }
        return Ok(Some(Box::new(source)));
    }
    if let Some(path) = &args.jsonl {
        let path = resolve(workspace, path);
        if !path.is_file() {
            return Ok(None);
        }
        return Ok(Some(Box::new(JsonlSource::new(path))));
    }
    if let Some(path) = &args.sqlite {
        let path = resolve(workspace, path);
        if !path.is_file() {
            return Ok(None);
        }
        return Ok(Some(Box::new(SqliteSource::new(
            path,
            config.source.sqlite_page_size,
        ))));
    }

    let dir = match &args.dir {
        Some(dir) => resolve(workspace, dir),
        None => workspace.join(DEFAULT_DATA_DIR),
    };
    if !has_text_files(&dir) {
        return Ok(None);
    }
    Ok(Some(Box::new(TextDirSource::new(dir))))
}

fn describe_input(args: &BuildArgs, workspace: &Path) -> String {
    if let Some(url) = &args.api {
        return format!("{}/{}", url, args.endpoint);
    }
    let path = args
        .jsonl
        .as_ref()
        .or(args.sqlite.as_ref())
        .or(args.dir.as_ref())
        .map(|p| resolve(workspace, p))
        .unwrap_or_else(|| workspace.join(DEFAULT_DATA_DIR));
    path.display().to_string()
}

/// Remove the index artifacts and the checkpoint.
fn reset_workspace(workspace: &Path, config: &RagConfig) -> anyhow::Result<()> {
    let paths = config.index.paths(workspace);
    for path in [&paths.index, &paths.metadata] {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
    }
    CheckpointStore::new(config.checkpoint_dir(workspace)).clear()?;
    println!("Cleared index and checkpoint.");
    Ok(())
}

fn print_stats(stats: &BuildStats, total_chunks: usize) {
    println!("Indexing complete.");
    println!("  Documents processed: {}", stats.docs_processed);
    println!("  Documents skipped:   {}", stats.docs_skipped);
    if stats.docs_empty > 0 {
        println!("  Empty documents:     {}", stats.docs_empty);
    }
    if stats.docs_failed > 0 {
        println!("  Failed documents:    {}", stats.docs_failed);
    }
    println!("  New chunks:          {}", stats.chunks_indexed);
    println!("  Chunks in index:     {}", total_chunks);
}

/// Print the outcome of a finished run. Fails when the source yielded items
/// but none of them could be read.
fn report_build(stats: &BuildStats, source: &str, total_chunks: usize) -> anyhow::Result<()> {
    if stats.docs_seen == 0 {
        println!("No input documents found in {}", source);
        return Ok(());
    }
    if stats.docs_failed == stats.docs_seen {
        eprintln!(
            "Could not read any documents from {} ({} failed item(s), see the log)",
            source, stats.docs_failed
        );
        anyhow::bail!("Document source failure: {}", source);
    }
    print_stats(stats, total_chunks);
    Ok(())
}

async fn handle_build(
    args: BuildArgs,
    workspace: &Path,
    config: &RagConfig,
) -> anyhow::Result<()> {
    let Some(source) = select_source(&args, workspace, config)? else {
        println!("No input documents found in {}", describe_input(&args, workspace));
        println!("Add documents there, or pass --jsonl, --api, --sqlite or --dir.");
        return Ok(());
    };

    if args.reset {
        reset_workspace(workspace, config)?;
    }

    let mut index = open_index(workspace, config);
    index.load()?;

    let chunker = Chunker::new(Arc::new(TiktokenTokenizer::gpt2()?))
        .with_max_chunks(config.chunking.max_chunks_per_document);
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let mut builder = IncrementalIndexBuilder::new(
        BuildSettings::from_config(config),
        chunker,
        embedding_client(config)?,
        CheckpointStore::new(config.checkpoint_dir(workspace)),
    )?
    .with_cancellation(cancel);

    println!("Building index from {}", source.describe());
    match builder.process_documents(source.documents(), &mut index).await {
        Ok(stats) => report_build(&stats, &source.describe(), index.len()),
        Err(BuildError::Cancelled) => {
            println!("Build interrupted. Progress up to the last checkpoint is saved.");
            Ok(())
        }
        Err(e @ BuildError::Embedding(_)) => {
            eprintln!("{}", e);
            eprintln!("Possible issues:");
            eprintln!("  1. Check {} in your environment or .env file", config.embedding.api_key_env);
            eprintln!("  2. Check your internet connection");
            eprintln!("Rerun the same command to resume from the last checkpoint.");
            Err(e.into())
        }
        Err(e) => {
            eprintln!("Unexpected error while building the index: {:?}", e);
            Err(anyhow::Error::new(e).context("Unexpected error while building the index"))
        }
    }
}

async fn handle_query(
    question: &str,
    top_k: Option<usize>,
    workspace: &Path,
    config: &RagConfig,
) -> anyhow::Result<()> {
    let mut index = open_index(workspace, config);
    require_index(&mut index)?;
    let engine = query_engine(config)?;
    let top_k = top_k.unwrap_or(config.query.top_k);

    let response = engine.answer(&index, question, top_k).await?;
    println!("{}", response.answer);
    if !response.retrieved.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in response.retrieved.iter().enumerate() {
            println!("  [{}] {} (score {:.3})", i + 1, source.source, source.score);
        }
    }
    Ok(())
}

async fn handle_serve(
    host: Option<String>,
    port: Option<u16>,
    workspace: &Path,
    mut config: RagConfig,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let engine = query_engine(&config)?;
    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());
    server::serve(open_index(workspace, &config), engine, &config.server, shutdown).await?;
    Ok(())
}

fn handle_status(workspace: &Path, config: &RagConfig) -> anyhow::Result<()> {
    let mut index = open_index(workspace, config);
    if index.load()? {
        println!("Index: {} chunks, dimension {}", index.len(), index.dim());
        println!("  {}", index.paths().index.display());
        println!("  {}", index.paths().metadata.display());
    } else {
        println!("Index: not built yet");
    }

    let store = CheckpointStore::new(config.checkpoint_dir(workspace));
    match store.load_info()? {
        Some(info) => {
            println!("Last checkpoint: {}", info.timestamp.to_rfc3339());
            println!("  Documents processed: {}", info.docs_processed);
            println!("  Documents skipped:   {}", info.docs_skipped);
            println!("  Chunks:              {}", info.total_chunks);
            println!("  Processed ids:       {}", info.processed_ids_count);
        }
        None => println!("Checkpoint: none"),
    }
    Ok(())
}

async fn handle_fetch(
    url: &str,
    endpoint: &str,
    output: &Path,
    api_key: Option<String>,
    total: Option<usize>,
    workspace: &Path,
    config: &RagConfig,
) -> anyhow::Result<()> {
    let mut source = ApiSource::new(url, endpoint, &config.source)?;
    if let Some(key) = api_key {
        source = source.with_api_key(key);
    }
    if let Some(total) = total {
        source = source.with_total_records(total);
    }
    let output = resolve(workspace, output);
    let count = source.fetch_all(&output).await?;
    println!("Saved {} records to {}", count, output.display());
    Ok(())
}

async fn handle_models(config: &RagConfig) -> anyhow::Result<()> {
    let api_key = config::api_key_from_env(&config.generation.api_key_env)?;
    let models = list_models(config.generation.base_url.as_deref(), &api_key).await?;
    if models.is_empty() {
        println!("No models support generateContent for this key.");
        return Ok(());
    }
    println!("Models supporting generateContent ({}):", models.len());
    for model in &models {
        println!("  {} ({})", model.name, model.display_name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace, None).await.unwrap();

        let config_path = workspace.join(".ragindex").join("config.toml");
        assert!(config_path.exists());

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: RagConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.embedding.model, "text-embedding-004");
        assert_eq!(parsed.chunking.chunk_size, 300);
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace, None).await.unwrap();
        let config_path = workspace.join(".ragindex").join("config.toml");
        let content_first = std::fs::read_to_string(&config_path).unwrap();

        // Second init should not overwrite
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace, None).await.unwrap();
        let content_second = std::fs::read_to_string(&config_path).unwrap();
        assert_eq!(content_first, content_second);
    }

    #[tokio::test]
    async fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(command, dir.path(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_config_file_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let result = handle_command(Commands::Status, dir.path(), Some(&missing)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_status_on_empty_workspace() {
        let dir = TempDir::new().unwrap();
        assert!(handle_command(Commands::Status, dir.path(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_build_without_documents_reports_and_succeeds() {
        // No data/ directory, so no credentials are needed.
        let dir = TempDir::new().unwrap();
        let command = Commands::Build(BuildArgs::default());
        assert!(handle_command(command, dir.path(), None).await.is_ok());
        assert!(!dir.path().join("index.bin").exists());
    }

    #[test]
    fn test_select_source_defaults_to_data_dir() {
        let dir = TempDir::new().unwrap();
        let config = RagConfig::default();
        let args = BuildArgs::default();
        assert!(select_source(&args, dir.path(), &config).unwrap().is_none());

        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/a.txt"), "hello").unwrap();
        let source = select_source(&args, dir.path(), &config).unwrap().unwrap();
        assert!(source.describe().contains("data"));
    }

    #[test]
    fn test_missing_jsonl_has_no_source() {
        let dir = TempDir::new().unwrap();
        let args = BuildArgs {
            jsonl: Some(PathBuf::from("missing.jsonl")),
            ..BuildArgs::default()
        };
        let config = RagConfig::default();
        assert!(select_source(&args, dir.path(), &config).unwrap().is_none());
        assert!(describe_input(&args, dir.path()).ends_with("missing.jsonl"));
    }

    #[test]
    fn test_report_build_distinguishes_empty_and_failed_sources() {
        let empty = BuildStats::default();
        assert!(report_build(&empty, "data", 0).is_ok());

        let all_failed = BuildStats {
            docs_seen: 1,
            docs_failed: 1,
            ..BuildStats::default()
        };
        let err = report_build(&all_failed, "SQLite database db.sqlite", 0).unwrap_err();
        assert!(err.to_string().contains("Document source failure"));

        let partly_failed = BuildStats {
            docs_seen: 3,
            docs_failed: 1,
            docs_processed: 2,
            chunks_indexed: 2,
            ..BuildStats::default()
        };
        assert!(report_build(&partly_failed, "docs.jsonl", 2).is_ok());
    }

    #[test]
    fn test_reset_removes_artifacts() {
        let dir = TempDir::new().unwrap();
        let config = RagConfig::default();
        let paths = config.index.paths(dir.path());
        std::fs::write(&paths.index, b"x").unwrap();
        std::fs::write(&paths.metadata, b"[]").unwrap();
        let store = CheckpointStore::new(config.checkpoint_dir(dir.path()));
        let mut ids = ragindex_core::ProcessedIdSet::default();
        ids.insert("a");
        store.save_processed_ids(&ids).unwrap();

        reset_workspace(dir.path(), &config).unwrap();
        assert!(!paths.index.exists());
        assert!(!paths.metadata.exists());
        assert!(store.load_processed_ids().unwrap().is_empty());
    }
}
