//! Integration tests for the incremental builder.
//!
//! Exercise resumability across simulated crashes using the deterministic
//! mock embedding backend and real on-disk index and checkpoint artifacts.

use futures::StreamExt;
use ragindex_core::error::{BuildError, SourceError};
use ragindex_core::sources::{DocumentSource, MemorySource};
use ragindex_core::{
    BuildSettings, BuildStats, CheckpointStore, Chunker, Document, EmbeddingClient,
    IncrementalIndexBuilder, IndexPaths, MockEmbeddingBackend, VectorIndex, WhitespaceTokenizer,
};
use ragindex_core::config::RetryConfig;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const DIM: usize = 16;

fn settings(batch_size: usize, checkpoint_every: usize) -> BuildSettings {
    BuildSettings {
        batch_size,
        chunk_size: 300,
        chunk_overlap: 50,
        checkpoint_every,
    }
}

fn make_builder(
    dir: &Path,
    backend: Arc<MockEmbeddingBackend>,
    settings: BuildSettings,
) -> IncrementalIndexBuilder {
    let embedder = EmbeddingClient::new(backend, DIM)
        .with_throttle(Duration::ZERO)
        .with_retry(RetryConfig::immediate(3));
    IncrementalIndexBuilder::new(
        settings,
        Chunker::new(Arc::new(WhitespaceTokenizer::new())),
        embedder,
        CheckpointStore::new(dir.join("checkpoints")),
    )
    .unwrap()
}

/// Load the persisted index, or start empty.
fn open_index(dir: &Path) -> VectorIndex {
    let mut index = VectorIndex::new(DIM, IndexPaths::in_dir(dir));
    index.load().unwrap();
    index
}

fn sample_docs(n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| {
            Document::new(format!(
                "Sample document {} with some content about machine learning and AI.",
                i
            ))
            .with_id(i.to_string())
            .with_metadata("title", format!("Doc {}", i))
            .with_metadata("url", format!("http://example.com/{}", i))
        })
        .collect()
}

async fn run(
    dir: &Path,
    backend: Arc<MockEmbeddingBackend>,
    settings: BuildSettings,
    docs: Vec<Document>,
) -> (Result<BuildStats, BuildError>, VectorIndex) {
    let mut index = open_index(dir);
    let mut builder = make_builder(dir, backend, settings);
    let source = MemorySource::new(docs);
    let result = builder.process_documents(source.documents(), &mut index).await;
    (result, index)
}

fn persisted_doc_ids(dir: &Path) -> HashSet<String> {
    open_index(dir)
        .metadata()
        .iter()
        .map(|m| m.doc_id.clone())
        .collect()
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let dir = TempDir::new().unwrap();

    let (first, index) = run(
        dir.path(),
        Arc::new(MockEmbeddingBackend::new(DIM)),
        settings(5, 1),
        sample_docs(10),
    )
    .await;
    let first = first.unwrap();
    assert_eq!(first.docs_processed, 10);
    assert_eq!(first.chunks_indexed, 10);
    assert_eq!(index.len(), 10);

    let backend = Arc::new(MockEmbeddingBackend::new(DIM));
    let (second, index) = run(dir.path(), backend.clone(), settings(5, 1), sample_docs(10)).await;
    let second = second.unwrap();
    assert_eq!(second.docs_skipped, 10);
    assert_eq!(second.docs_processed, 0);
    assert_eq!(second.chunks_indexed, 0);
    assert_eq!(index.len(), 10);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn test_crash_after_checkpoint_resumes_remaining_documents() {
    let dir = TempDir::new().unwrap();

    // First flush (5 chunks) succeeds and is checkpointed; the second fails.
    let (first, _) = run(
        dir.path(),
        Arc::new(MockEmbeddingBackend::failing_after(DIM, 5)),
        settings(5, 1),
        sample_docs(10),
    )
    .await;
    assert!(matches!(first, Err(BuildError::Embedding(_))));
    assert_eq!(persisted_doc_ids(dir.path()).len(), 5);

    let (second, index) = run(
        dir.path(),
        Arc::new(MockEmbeddingBackend::new(DIM)),
        settings(5, 1),
        sample_docs(10),
    )
    .await;
    let second = second.unwrap();
    assert_eq!(second.docs_skipped, 5);
    assert_eq!(second.docs_processed, 5);
    assert_eq!(index.len(), 10);

    let ids = persisted_doc_ids(dir.path());
    assert_eq!(ids.len(), 10);
    assert_eq!(open_index(dir.path()).len(), 10);
}

#[tokio::test]
async fn test_crash_before_checkpoint_replays_everything() {
    let dir = TempDir::new().unwrap();

    // The first flush succeeds in memory but no checkpoint is due yet.
    let (first, _) = run(
        dir.path(),
        Arc::new(MockEmbeddingBackend::failing_after(DIM, 5)),
        settings(5, 10),
        sample_docs(10),
    )
    .await;
    assert!(matches!(first, Err(BuildError::Embedding(_))));
    assert!(!dir.path().join("index.bin").exists());
    let store = CheckpointStore::new(dir.path().join("checkpoints"));
    assert!(store.load_processed_ids().unwrap().is_empty());

    let (second, index) = run(
        dir.path(),
        Arc::new(MockEmbeddingBackend::new(DIM)),
        settings(5, 10),
        sample_docs(10),
    )
    .await;
    let second = second.unwrap();
    assert_eq!(second.docs_skipped, 0);
    assert_eq!(second.docs_processed, 10);
    assert_eq!(index.len(), 10);
}

#[tokio::test]
async fn test_empty_document_retried_until_it_has_text() {
    let dir = TempDir::new().unwrap();
    let mut docs = sample_docs(2);
    docs.push(Document::new("   ").with_id("late"));

    let (first, _) = run(
        dir.path(),
        Arc::new(MockEmbeddingBackend::new(DIM)),
        settings(5, 1),
        docs,
    )
    .await;
    let first = first.unwrap();
    assert_eq!(first.docs_empty, 1);
    assert_eq!(first.docs_processed, 2);
    let store = CheckpointStore::new(dir.path().join("checkpoints"));
    assert!(!store.load_processed_ids().unwrap().contains("late"));

    let mut docs = sample_docs(2);
    docs.push(Document::new("now it has content").with_id("late"));
    let (second, index) = run(
        dir.path(),
        Arc::new(MockEmbeddingBackend::new(DIM)),
        settings(5, 1),
        docs,
    )
    .await;
    let second = second.unwrap();
    assert_eq!(second.docs_skipped, 2);
    assert_eq!(second.docs_processed, 1);
    assert_eq!(index.len(), 3);
    assert!(store.load_processed_ids().unwrap().contains("late"));
}

#[tokio::test]
async fn test_checkpoint_info_written() {
    let dir = TempDir::new().unwrap();
    let (stats, _) = run(
        dir.path(),
        Arc::new(MockEmbeddingBackend::new(DIM)),
        settings(4, 1),
        sample_docs(9),
    )
    .await;
    let stats = stats.unwrap();
    // Flushes at 4 and 8 chunks, then the remainder; one checkpoint per
    // flush plus the final one.
    assert_eq!(stats.flushes, 3);
    assert_eq!(stats.checkpoints, 3);

    let info = CheckpointStore::new(dir.path().join("checkpoints"))
        .load_info()
        .unwrap()
        .unwrap();
    assert_eq!(info.docs_processed, 9);
    assert_eq!(info.total_chunks, 9);
    assert_eq!(info.processed_ids_count, 9);
}

#[tokio::test]
async fn test_cancellation_keeps_last_checkpoint() {
    let dir = TempDir::new().unwrap();
    let token = CancellationToken::new();

    let mut index = open_index(dir.path());
    let mut builder = make_builder(
        dir.path(),
        Arc::new(MockEmbeddingBackend::new(DIM)),
        settings(5, 1),
    )
    .with_cancellation(token.clone());

    // Seven documents, then a source that never yields again.
    let docs = sample_docs(7);
    let stream = futures::stream::iter(docs.into_iter().map(Ok::<_, SourceError>))
        .chain(futures::stream::pending());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });
    let result = builder.process_documents(stream, &mut index).await;
    canceller.await.unwrap();

    assert!(matches!(result, Err(BuildError::Cancelled)));
    // Documents 5 and 6 were buffered but never flushed or persisted.
    assert_eq!(persisted_doc_ids(dir.path()).len(), 5);
    let store = CheckpointStore::new(dir.path().join("checkpoints"));
    assert_eq!(store.load_processed_ids().unwrap().len(), 5);
}

#[tokio::test]
async fn test_jsonl_source_end_to_end() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("docs.jsonl");
    std::fs::write(
        &input,
        concat!(
            "{\"id\": 1, \"text\": \"Rust ownership rules explained\", \"metadata\": {\"url\": \"http://a\"}}\n",
            "\n",
            "{not json}\n",
            "{\"id\": \"2\", \"text\": \"Borrow checker basics\", \"metadata\": {\"title\": \"Borrowing\"}}\n",
            "{\"id\": \"3\", \"text\": \"Lifetimes in depth\", \"url\": \"http://top-level\"}\n",
        ),
    )
    .unwrap();

    let mut index = open_index(dir.path());
    let mut builder = make_builder(
        dir.path(),
        Arc::new(MockEmbeddingBackend::new(DIM)),
        settings(10, 1),
    );
    let source = ragindex_core::JsonlSource::new(&input);
    let stats = builder
        .process_documents(source.documents(), &mut index)
        .await
        .unwrap();

    assert_eq!(stats.docs_seen, 4);
    assert_eq!(stats.docs_failed, 1);
    assert_eq!(stats.docs_processed, 3);

    let reloaded = open_index(dir.path());
    assert_eq!(reloaded.len(), 3);
    assert_eq!(reloaded.metadata()[0].doc_id, "1");
    assert_eq!(reloaded.metadata()[0].source, "http://a");
    assert_eq!(reloaded.metadata()[1].title, "Borrowing");
    assert_eq!(reloaded.metadata()[1].source, "unknown");
    // Only the nested metadata object is read; a top-level url is ignored.
    assert_eq!(reloaded.metadata()[2].doc_id, "3");
    assert_eq!(reloaded.metadata()[2].source, "unknown");
}
