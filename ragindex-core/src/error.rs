//! Error types for the ragindex core library.
//!
//! Uses `thiserror` for public API error types with one enum per subsystem:
//! chunking, tokenization, remote providers, embedding, the vector index,
//! document sources, the incremental builder, the query path and configuration.

use std::path::PathBuf;

/// Top-level error type for the ragindex core library.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("Chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the chunker. Only precondition violations are errors; bad input
/// text produces an empty chunk set instead.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("Invalid chunk parameters: max_tokens ({max_tokens}) must exceed overlap ({overlap})")]
    InvalidParameters { max_tokens: usize, overlap: usize },
}

/// Errors from a pluggable tokenizer.
#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    #[error("Failed to initialize tokenizer: {message}")]
    Init { message: String },

    #[error("Failed to encode text: {message}")]
    Encode { message: String },

    #[error("Failed to decode tokens: {message}")]
    Decode { message: String },
}

/// Errors from a single call to a remote capability (embedding or generation).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

impl ProviderError {
    /// Whether another attempt could succeed. Authentication failures are permanent.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::AuthFailed { .. })
    }
}

/// Outcome of a retry loop that never succeeded.
#[derive(Debug, Clone, thiserror::Error)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last: ProviderError,
}

/// Errors from the embedding client.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding call failed after {attempts} attempt(s): {source}")]
    Provider {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding count mismatch: sent {expected} texts, received {actual} vectors")]
    CountMismatch { expected: usize, actual: usize },
}

impl From<RetryExhausted> for EmbeddingError {
    fn from(err: RetryExhausted) -> Self {
        EmbeddingError::Provider {
            attempts: err.attempts,
            source: err.last,
        }
    }
}

/// Errors from the vector index and its persisted artifacts.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Vector dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Length mismatch: {vectors} vectors but {metadatas} metadata records")]
    LengthMismatch { vectors: usize, metadatas: usize },

    #[error("Inconsistent index artifacts: {present} exists but {missing} is missing")]
    Inconsistent { present: PathBuf, missing: PathBuf },

    #[error("Index not found at {path}; build it first")]
    NotFound { path: PathBuf },

    #[error("Corrupt index artifact {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Index IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from document sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed record at {location}: {message}")]
    Parse { location: String, message: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Source request failed after {attempts} attempt(s): {message}")]
    Exhausted { attempts: u32, message: String },
}

/// Errors that abort an incremental build run.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Invalid builder configuration: {message}")]
    InvalidConfig { message: String },

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error("Embedding pipeline failure: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index write failed: {0}")]
    Index(#[from] IndexError),

    #[error("Checkpoint persistence failed: {0}")]
    Checkpoint(#[from] std::io::Error),

    #[error("Build was cancelled")]
    Cancelled,
}

/// Errors from the query path.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid query: {message}")]
    InvalidInput { message: String },

    #[error("Failed to embed question: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Failed to generate answer: {0}")]
    Generation(#[from] ProviderError),

    #[error("Index search failed: {0}")]
    Index(#[from] IndexError),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `RagError`.
pub type Result<T> = std::result::Result<T, RagError>;
