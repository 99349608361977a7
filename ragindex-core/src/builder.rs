//! Incremental, checkpointed index builder.
//!
//! Drives a document stream through chunking, batched embedding and the
//! vector index in one forward pass:
//!
//! 1. Documents whose id is already in the [`ProcessedIdSet`] are skipped.
//! 2. Blank documents are skipped and never marked processed, so they are
//!    retried on every run.
//! 3. Other documents are chunked, their chunks buffered, and the id marked
//!    processed in memory.
//! 4. A full buffer is flushed: embedded, then appended to the index.
//! 5. Every `checkpoint_every` flushes, and once at the end of the stream,
//!    the index, the id set and a progress snapshot are persisted in that
//!    order.
//!
//! Ids are only persisted together with the index that contains their
//! chunks. A crash or embedding failure between checkpoints loses the
//! in-memory marks as well, so a restart replays those documents.

use std::pin::pin;

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointInfo, CheckpointStore, ProcessedIdSet};
use crate::chunker::Chunker;
use crate::config::RagConfig;
use crate::document::Document;
use crate::embeddings::EmbeddingClient;
use crate::error::{BuildError, SourceError};
use crate::index::{ChunkMetadata, VectorIndex};

/// Tunables for one builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    /// Buffered chunks that trigger a flush.
    pub batch_size: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Flushes between checkpoints.
    pub checkpoint_every: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self::from_config(&RagConfig::default())
    }
}

impl BuildSettings {
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            batch_size: config.builder.batch_size,
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            checkpoint_every: config.builder.checkpoint_every,
        }
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.chunk_size <= self.chunk_overlap {
            return Err(BuildError::InvalidConfig {
                message: format!(
                    "chunk_size ({}) must exceed chunk_overlap ({})",
                    self.chunk_size, self.chunk_overlap
                ),
            });
        }
        if self.batch_size == 0 {
            return Err(BuildError::InvalidConfig {
                message: "batch_size must be positive".into(),
            });
        }
        if self.checkpoint_every == 0 {
            return Err(BuildError::InvalidConfig {
                message: "checkpoint_every must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Counters for one `process_documents` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Stream items pulled, including failed ones.
    pub docs_seen: usize,
    /// Documents chunked and queued.
    pub docs_processed: usize,
    /// Documents already in the processed set.
    pub docs_skipped: usize,
    /// Documents with blank text.
    pub docs_empty: usize,
    /// Source errors and documents that produced no chunks.
    pub docs_failed: usize,
    pub chunks_indexed: usize,
    pub flushes: usize,
    pub checkpoints: usize,
}

#[derive(Default)]
struct Batch {
    texts: Vec<String>,
    metadatas: Vec<ChunkMetadata>,
}

impl Batch {
    fn len(&self) -> usize {
        self.texts.len()
    }

    fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Builds a [`VectorIndex`] incrementally from a document stream.
pub struct IncrementalIndexBuilder {
    settings: BuildSettings,
    chunker: Chunker,
    embedder: EmbeddingClient,
    store: CheckpointStore,
    processed: ProcessedIdSet,
    cancel: CancellationToken,
}

impl IncrementalIndexBuilder {
    /// Validate `settings` and load the persisted processed-id set.
    pub fn new(
        settings: BuildSettings,
        chunker: Chunker,
        embedder: EmbeddingClient,
        store: CheckpointStore,
    ) -> Result<Self, BuildError> {
        settings.validate()?;
        let processed = store.load_processed_ids()?;
        info!(
            already_processed = processed.len(),
            checkpoint_dir = %store.dir().display(),
            "Builder initialized"
        );
        Ok(Self {
            settings,
            chunker,
            embedder,
            store,
            processed,
            cancel: CancellationToken::new(),
        })
    }

    /// Stop pulling documents when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn processed_ids(&self) -> &ProcessedIdSet {
        &self.processed
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Consume `documents` to exhaustion, adding new chunks to `index`.
    ///
    /// Source errors and unchunkable documents are counted and skipped.
    /// Embedding, index and checkpoint failures abort the run; state persisted
    /// at the last checkpoint stays consistent. Cancellation aborts without
    /// saving anything further.
    pub async fn process_documents<S>(
        &mut self,
        documents: S,
        index: &mut VectorIndex,
    ) -> Result<BuildStats, BuildError>
    where
        S: Stream<Item = Result<Document, SourceError>>,
    {
        if self.embedder.dim() != index.dim() {
            return Err(BuildError::InvalidConfig {
                message: format!(
                    "embedding dimension {} does not match index dimension {}",
                    self.embedder.dim(),
                    index.dim()
                ),
            });
        }
        if !self.processed.is_empty() && index.is_empty() {
            warn!(
                processed = self.processed.len(),
                "Checkpoint lists processed documents but the index is empty; \
                 they will be skipped until the checkpoint is cleared"
            );
        }

        info!(
            batch_size = self.settings.batch_size,
            already_processed = self.processed.len(),
            indexed_chunks = index.len(),
            "Starting incremental indexing"
        );

        let mut documents = pin!(documents);
        let mut batch = Batch::default();
        let mut stats = BuildStats::default();

        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(&stats)),
                item = documents.next() => item,
            };
            let Some(item) = item else { break };
            stats.docs_seen += 1;

            let doc = match item {
                Ok(doc) => doc,
                Err(e) => {
                    stats.docs_failed += 1;
                    warn!(error = %e, "Skipping unreadable document");
                    continue;
                }
            };

            if !self.enqueue(doc, &mut batch, &mut stats)? {
                continue;
            }

            if batch.len() >= self.settings.batch_size {
                self.flush_cancellable(&mut batch, index, &mut stats).await?;
                if stats.flushes % self.settings.checkpoint_every == 0 {
                    self.checkpoint(index, &mut stats)?;
                }
            }
        }

        if !batch.is_empty() {
            self.flush_cancellable(&mut batch, index, &mut stats).await?;
        }
        self.checkpoint(index, &mut stats)?;

        info!(
            docs_processed = stats.docs_processed,
            docs_skipped = stats.docs_skipped,
            docs_empty = stats.docs_empty,
            docs_failed = stats.docs_failed,
            chunks_indexed = stats.chunks_indexed,
            total_chunks = index.len(),
            "Indexing complete"
        );
        Ok(stats)
    }

    /// Chunk one document into `batch`. Returns whether anything was queued.
    fn enqueue(
        &mut self,
        doc: Document,
        batch: &mut Batch,
        stats: &mut BuildStats,
    ) -> Result<bool, BuildError> {
        let doc_id = doc.doc_id();

        if self.processed.contains(&doc_id) {
            stats.docs_skipped += 1;
            if stats.docs_skipped % 100 == 0 {
                info!(skipped = stats.docs_skipped, "Skipping already-processed documents");
            }
            return Ok(false);
        }

        if doc.is_blank() {
            stats.docs_empty += 1;
            debug!(doc_id = %doc_id, "Skipping blank document");
            return Ok(false);
        }

        let set = self.chunker.chunk_text(
            &doc.text,
            self.settings.chunk_size,
            self.settings.chunk_overlap,
        )?;
        if set.is_empty() {
            stats.docs_failed += 1;
            warn!(doc_id = %doc_id, "Document produced no chunks");
            return Ok(false);
        }
        debug!(
            doc_id = %doc_id,
            chunks = set.len(),
            tokens = set.total_tokens,
            truncated = set.truncated,
            "Document chunked"
        );

        for chunk in set.chunks {
            batch.metadatas.push(ChunkMetadata {
                doc_id: doc_id.clone(),
                chunk_id: chunk.id(),
                text: chunk.text.clone(),
                source: doc.source().to_string(),
                title: doc.title().to_string(),
                created_at: doc.created_at().to_string(),
            });
            batch.texts.push(chunk.text);
        }

        stats.docs_processed += 1;
        self.processed.insert(doc_id);
        Ok(true)
    }

    /// Flush unless cancellation wins first. A cancelled flush leaves the
    /// index untouched.
    async fn flush_cancellable(
        &self,
        batch: &mut Batch,
        index: &mut VectorIndex,
        stats: &mut BuildStats,
    ) -> Result<(), BuildError> {
        let flushed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            res = self.flush(batch, index, stats) => Some(res),
        };
        match flushed {
            Some(res) => res,
            None => Err(self.cancelled(stats)),
        }
    }

    async fn flush(
        &self,
        batch: &mut Batch,
        index: &mut VectorIndex,
        stats: &mut BuildStats,
    ) -> Result<(), BuildError> {
        let count = batch.len();
        info!(chunks = count, "Processing batch");

        let vectors = self.embedder.embed_documents(&batch.texts).await?;
        index.add(vectors, std::mem::take(&mut batch.metadatas))?;
        batch.texts.clear();

        stats.chunks_indexed += count;
        stats.flushes += 1;
        info!(total_chunks = stats.chunks_indexed, "Batch indexed");
        Ok(())
    }

    /// Persist the index, then the processed ids, then the snapshot.
    fn checkpoint(&self, index: &VectorIndex, stats: &mut BuildStats) -> Result<(), BuildError> {
        index.save()?;
        self.store.save_processed_ids(&self.processed)?;
        self.store.save_info(&CheckpointInfo {
            timestamp: chrono::Utc::now(),
            docs_processed: stats.docs_processed,
            docs_skipped: stats.docs_skipped,
            total_chunks: stats.chunks_indexed,
            processed_ids_count: self.processed.len(),
        })?;
        stats.checkpoints += 1;
        info!(
            docs = stats.docs_processed,
            chunks = stats.chunks_indexed,
            "Checkpoint saved"
        );
        Ok(())
    }

    fn cancelled(&self, stats: &BuildStats) -> BuildError {
        warn!(
            docs_processed = stats.docs_processed,
            checkpoints = stats.checkpoints,
            "Build cancelled; persisted state is the last checkpoint"
        );
        BuildError::Cancelled
    }
}

impl std::fmt::Debug for IncrementalIndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalIndexBuilder")
            .field("settings", &self.settings)
            .field("processed", &self.processed.len())
            .finish_non_exhaustive()
    }
}
