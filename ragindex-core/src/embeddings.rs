//! Embedding client.
//!
//! Wraps a remote [`EmbeddingBackend`] with sub-batching, per-call retry,
//! request throttling and dimension checking. Calls are strictly sequential.
//!
//! Questions and reference passages are embedded with different intents:
//! [`EmbeddingClient::embed_query`] requests the retrieval-query variant and
//! [`EmbeddingClient::embed_documents`] the retrieval-document variant.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{EmbeddingConfig, RetryConfig};
use crate::error::{EmbeddingError, ProviderError};
use crate::providers::with_retry;

/// What the embedded text will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedIntent {
    /// A short question searched against stored passages.
    Query,
    /// A passage stored in the index.
    Document,
}

impl EmbedIntent {
    /// The task type name understood by the Gemini embedding API.
    pub fn task_type(self) -> &'static str {
        match self {
            EmbedIntent::Query => "RETRIEVAL_QUERY",
            EmbedIntent::Document => "RETRIEVAL_DOCUMENT",
        }
    }
}

/// A remote service turning one text into one vector.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, text: &str, intent: EmbedIntent) -> Result<Vec<f32>, ProviderError>;
}

/// Batching, retrying front end for an [`EmbeddingBackend`].
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    dim: usize,
    batch_size: usize,
    throttle: Duration,
    retry: RetryConfig,
}

impl EmbeddingClient {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, dim: usize) -> Self {
        let defaults = EmbeddingConfig::default();
        Self {
            backend,
            dim,
            batch_size: defaults.batch_size,
            throttle: defaults.throttle(),
            retry: RetryConfig::default(),
        }
    }

    pub fn from_config(
        backend: Arc<dyn EmbeddingBackend>,
        config: &EmbeddingConfig,
        retry: &RetryConfig,
    ) -> Self {
        Self {
            backend,
            dim: config.dimensions,
            batch_size: config.batch_size.max(1),
            throttle: config.throttle(),
            retry: retry.clone(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Output dimension every returned vector is checked against.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Embed a single question with the retrieval-query intent.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_one(text, EmbedIntent::Query).await
    }

    /// Embed passages with the retrieval-document intent, preserving order.
    pub async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed(texts, EmbedIntent::Document).await
    }

    /// Embed `texts` in sequential sub-batches.
    ///
    /// Any call that exhausts its retries fails the whole request; no partial
    /// result is returned.
    pub async fn embed(
        &self,
        texts: &[String],
        intent: EmbedIntent,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        let total_batches = texts.len().div_ceil(self.batch_size);

        for (batch_num, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(
                batch = batch_num + 1,
                total_batches,
                size = batch.len(),
                "Embedding sub-batch"
            );
            for (i, text) in batch.iter().enumerate() {
                if i > 0 && !self.throttle.is_zero() {
                    tokio::time::sleep(self.throttle).await;
                }
                vectors.push(self.embed_one(text, intent).await?);
            }
        }

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        debug!(count = vectors.len(), "Embedded texts");
        Ok(vectors)
    }

    async fn embed_one(&self, text: &str, intent: EmbedIntent) -> Result<Vec<f32>, EmbeddingError> {
        let vector = with_retry(&self.retry, || self.backend.embed(text, intent)).await?;
        if vector.len() != self.dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("dim", &self.dim)
            .field("batch_size", &self.batch_size)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

/// Deterministic offline backend.
///
/// Vectors are derived from a SHA-256 of the text, so equal texts always map
/// to equal vectors. Can be told to start failing after a number of
/// successful calls to simulate an outage mid-build.
#[derive(Debug)]
pub struct MockEmbeddingBackend {
    dim: usize,
    calls: AtomicUsize,
    fail_after: Option<usize>,
}

impl MockEmbeddingBackend {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            calls: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    /// Succeed for the first `n` calls, then return connection errors.
    pub fn failing_after(dim: usize, n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new(dim)
        }
    }

    /// Total calls made, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The vector this backend returns for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.dim);
        let mut counter = 0u32;
        while out.len() < self.dim {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            for byte in hasher.finalize() {
                if out.len() == self.dim {
                    break;
                }
                out.push(byte as f32 / 255.0 - 0.5);
            }
            counter += 1;
        }
        out
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed(&self, text: &str, _intent: EmbedIntent) -> Result<Vec<f32>, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| n >= limit) {
            return Err(ProviderError::Connection {
                message: "mock embedding backend unavailable".into(),
            });
        }
        Ok(self.vector_for(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records the intent of every call.
    struct RecordingBackend {
        intents: Mutex<Vec<EmbedIntent>>,
    }

    #[async_trait]
    impl EmbeddingBackend for RecordingBackend {
        async fn embed(&self, text: &str, intent: EmbedIntent) -> Result<Vec<f32>, ProviderError> {
            self.intents.lock().unwrap().push(intent);
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("passage {}", i)).collect()
    }

    fn client(backend: Arc<dyn EmbeddingBackend>, dim: usize) -> EmbeddingClient {
        EmbeddingClient::new(backend, dim)
            .with_throttle(Duration::ZERO)
            .with_retry(RetryConfig::immediate(3))
    }

    #[tokio::test]
    async fn test_intent_follows_call_not_count() {
        let backend = Arc::new(RecordingBackend {
            intents: Mutex::new(Vec::new()),
        });
        let client = client(backend.clone(), 2);
        client.embed_query("what?").await.unwrap();
        client.embed_documents(&texts(1)).await.unwrap();
        assert_eq!(
            *backend.intents.lock().unwrap(),
            vec![EmbedIntent::Query, EmbedIntent::Document]
        );
    }

    #[tokio::test]
    async fn test_order_preserved_across_sub_batches() {
        let backend = Arc::new(MockEmbeddingBackend::new(8));
        let client = client(backend.clone(), 8).with_batch_size(3);
        let input = texts(7);
        let vectors = client.embed_documents(&input).await.unwrap();
        assert_eq!(vectors.len(), 7);
        for (text, vector) in input.iter().zip(&vectors) {
            assert_eq!(vector, &backend.vector_for(text));
        }
        assert_eq!(backend.calls(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_calls_within_sub_batch() {
        let backend = Arc::new(MockEmbeddingBackend::new(4));
        let throttle = Duration::from_millis(100);
        let client = EmbeddingClient::new(backend.clone(), 4)
            .with_throttle(throttle)
            .with_retry(RetryConfig::immediate(1))
            .with_batch_size(10);

        let start = tokio::time::Instant::now();
        let vectors = client.embed(&texts(4), EmbedIntent::Document).await.unwrap();

        assert_eq!(vectors.len(), 4);
        assert_eq!(backend.calls(), 4);
        let elapsed = start.elapsed();
        assert!(elapsed >= throttle * 3, "elapsed {:?}", elapsed);
        assert!(elapsed < throttle * 4, "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let backend = Arc::new(MockEmbeddingBackend::new(4));
        let vectors = client(backend.clone(), 4).embed_documents(&[]).await.unwrap();
        assert!(vectors.is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_whole_call() {
        let backend = Arc::new(MockEmbeddingBackend::failing_after(4, 2));
        let err = client(backend.clone(), 4)
            .embed_documents(&texts(5))
            .await
            .unwrap_err();
        match err {
            EmbeddingError::Provider { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("Expected Provider, got {:?}", other),
        }
        // Two successes, then three attempts on the third text.
        assert_eq!(backend.calls(), 5);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let backend = Arc::new(MockEmbeddingBackend::new(3));
        let err = client(backend, 768).embed_query("q").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 768,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_mock_vectors_deterministic() {
        let backend = MockEmbeddingBackend::new(40);
        assert_eq!(backend.vector_for("a"), backend.vector_for("a"));
        assert_ne!(backend.vector_for("a"), backend.vector_for("b"));
        assert_eq!(backend.vector_for("a").len(), 40);
    }

    #[test]
    fn test_task_types() {
        assert_eq!(EmbedIntent::Query.task_type(), "RETRIEVAL_QUERY");
        assert_eq!(EmbedIntent::Document.task_type(), "RETRIEVAL_DOCUMENT");
    }
}
