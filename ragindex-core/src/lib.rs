//! # ragindex Core
//!
//! Core library for ragindex, an incremental retrieval-augmented-generation
//! engine. Provides token-window chunking, a batching embedding client, a
//! persisted flat vector index, the checkpointed incremental builder,
//! document sources, the query path and its HTTP endpoint.

pub mod builder;
pub mod checkpoint;
pub mod chunker;
pub mod config;
pub mod document;
pub mod embeddings;
pub mod error;
pub mod generation;
pub mod index;
pub mod persistence;
pub mod providers;
pub mod query;
pub mod server;
pub mod sources;
pub mod tokenizer;

// Re-export commonly used types at the crate root.
pub use builder::{BuildSettings, BuildStats, IncrementalIndexBuilder};
pub use checkpoint::{CheckpointInfo, CheckpointStore, ProcessedIdSet};
pub use chunker::{Chunk, ChunkSet, Chunker};
pub use config::RagConfig;
pub use document::Document;
pub use embeddings::{EmbedIntent, EmbeddingBackend, EmbeddingClient, MockEmbeddingBackend};
pub use error::{
    BuildError, ChunkError, EmbeddingError, IndexError, ProviderError, QueryError, RagError,
    Result, SourceError,
};
pub use generation::{AnswerGenerator, GenerationRequest, MockAnswerGenerator};
pub use index::{ChunkMetadata, IndexPaths, SearchHit, VectorIndex};
pub use query::{QueryEngine, QueryResponse, RetrievedSource};
pub use sources::{
    ApiSource, DocumentSource, JsonlSource, MemorySource, SqliteSource, TextDirSource,
};
pub use tokenizer::{TiktokenTokenizer, Tokenizer, WhitespaceTokenizer};
