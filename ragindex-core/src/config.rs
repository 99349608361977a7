//! Configuration system for ragindex.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Configuration is
//! loaded from `~/.config/ragindex/config.toml` and/or `.ragindex/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::index::IndexPaths;

/// Name of the workspace-local configuration directory.
pub const WORKSPACE_DIR: &str = ".ragindex";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub builder: BuilderConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

/// Remote embedding capability settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding model name, without the `models/` prefix.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Output dimension of the model; every vector is checked against it.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Override for the API base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Texts per sequential sub-batch.
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    /// Pause between consecutive single-text calls, in milliseconds.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
    /// Per-call timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            api_key_env: default_api_key_env(),
            base_url: None,
            batch_size: default_embedding_batch_size(),
            throttle_ms: default_throttle_ms(),
            timeout_secs: default_request_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }
}

fn default_embedding_model() -> String {
    "text-embedding-004".into()
}

fn default_dimensions() -> usize {
    768
}

fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".into()
}

fn default_embedding_batch_size() -> usize {
    50
}

fn default_throttle_ms() -> u64 {
    100
}

fn default_request_timeout() -> u64 {
    30
}

/// Remote answer-generation capability settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default)]
    pub temperature: f32,
    /// Hard timeout for one generation call, in seconds.
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            api_key_env: default_api_key_env(),
            base_url: None,
            max_output_tokens: default_max_output_tokens(),
            temperature: 0.0,
            timeout_secs: default_request_timeout(),
        }
    }
}

fn default_generation_model() -> String {
    "gemini-2.5-pro".into()
}

fn default_max_output_tokens() -> u32 {
    512
}

/// Retry policy for remote calls.
///
/// The delay after failed attempt `n` (zero-based) is
/// `initial_backoff_ms * backoff_multiplier^n`, capped at `max_backoff_ms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// A policy that retries immediately. Used by tests and local backends.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            backoff_multiplier: 1.0,
            max_backoff_ms: 0,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

/// Token-window chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Hard cap on chunks emitted for a single document.
    #[serde(default = "default_max_chunks")]
    pub max_chunks_per_document: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_chunks_per_document: default_max_chunks(),
        }
    }
}

fn default_chunk_size() -> usize {
    300
}

fn default_chunk_overlap() -> usize {
    50
}

fn default_max_chunks() -> usize {
    1000
}

/// Incremental builder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Buffered chunks that trigger an embed-and-add flush.
    #[serde(default = "default_builder_batch_size")]
    pub batch_size: usize,
    /// Persist a checkpoint after this many flushes.
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_builder_batch_size(),
            checkpoint_every: default_checkpoint_every(),
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

fn default_builder_batch_size() -> usize {
    100
}

fn default_checkpoint_every() -> usize {
    10
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

/// Locations of the two coupled index artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_metadata_path")]
    pub metadata_path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            metadata_path: default_metadata_path(),
        }
    }
}

impl IndexConfig {
    /// Resolve artifact paths against `base` (relative paths only).
    pub fn paths(&self, base: &Path) -> IndexPaths {
        IndexPaths {
            index: resolve(base, &self.index_path),
            metadata: resolve(base, &self.metadata_path),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("index.bin")
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("index_meta.json")
}

/// Query path settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Characters of each retrieved chunk placed in the prompt.
    #[serde(default = "default_prompt_snippet_chars")]
    pub prompt_snippet_chars: usize,
    /// Characters of each retrieved chunk returned to the caller.
    #[serde(default = "default_display_snippet_chars")]
    pub display_snippet_chars: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            prompt_snippet_chars: default_prompt_snippet_chars(),
            display_snippet_chars: default_display_snippet_chars(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

fn default_prompt_snippet_chars() -> usize {
    500
}

fn default_display_snippet_chars() -> usize {
    200
}

/// HTTP query endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

/// Document source settings shared by the REST and SQLite sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_api_page_size")]
    pub api_page_size: usize,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_sqlite_page_size")]
    pub sqlite_page_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            api_page_size: default_api_page_size(),
            rate_limit_per_second: default_rate_limit(),
            max_attempts: default_max_attempts(),
            timeout_secs: default_request_timeout(),
            sqlite_page_size: default_sqlite_page_size(),
        }
    }
}

fn default_api_page_size() -> usize {
    100
}

fn default_rate_limit() -> u32 {
    5
}

fn default_sqlite_page_size() -> usize {
    1000
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl RagConfig {
    /// Checkpoint directory resolved against `base`.
    pub fn checkpoint_dir(&self, base: &Path) -> PathBuf {
        resolve(base, &self.builder.checkpoint_dir)
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunking.chunk_size <= self.chunking.chunk_overlap {
            return Err(ConfigError::Invalid {
                message: format!(
                    "chunking.chunk_size ({}) must exceed chunking.chunk_overlap ({})",
                    self.chunking.chunk_size, self.chunking.chunk_overlap
                ),
            });
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid {
                message: "embedding.dimensions must be positive".into(),
            });
        }
        if self.builder.batch_size == 0 || self.builder.checkpoint_every == 0 {
            return Err(ConfigError::Invalid {
                message: "builder.batch_size and builder.checkpoint_every must be positive".into(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                message: "retry.max_attempts must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "ragindex", "ragindex")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Workspace-local configuration file path.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `RAGINDEX_`)
/// 3. Workspace-local config (`.ragindex/config.toml`)
/// 4. User config (`~/.config/ragindex/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&RagConfig>,
) -> Result<RagConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(RagConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // RAGINDEX_EMBEDDING__MODEL, RAGINDEX_BUILDER__BATCH_SIZE, ...
    figment = figment.merge(Env::prefixed("RAGINDEX_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: RagConfig = figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a single explicit TOML file layered over defaults.
pub fn load_config_file(path: &Path) -> Result<RagConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let config: RagConfig = Figment::from(Serialized::defaults(RagConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("RAGINDEX_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
    config.validate()?;
    Ok(config)
}

/// Check whether any configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

/// Write the default configuration to `.ragindex/config.toml`.
///
/// Refuses to overwrite an existing file. Returns the path written.
pub fn init_workspace_config(workspace: &Path) -> Result<PathBuf, ConfigError> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Err(ConfigError::Invalid {
            message: format!("{} already exists", path.display()),
        });
    }
    let rendered = toml::to_string_pretty(&RagConfig::default()).map_err(|e| {
        ConfigError::ParseError {
            message: e.to_string(),
        }
    })?;
    crate::persistence::atomic_write(&path, rendered.as_bytes()).map_err(|e| {
        ConfigError::Invalid {
            message: format!("failed to write {}: {}", path.display(), e),
        }
    })?;
    Ok(path)
}

/// Read an API key from the named environment variable.
pub fn api_key_from_env(var: &str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ConfigError::EnvVarMissing { var: var.into() }),
    }
}
