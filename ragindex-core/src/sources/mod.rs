//! Document sources.
//!
//! Every source exposes its records as one uniform stream of
//! `Result<Document, SourceError>`. Calling [`DocumentSource::documents`]
//! again starts over from the beginning; for a live API that means
//! re-fetching.

pub mod api;
pub mod jsonl;
pub mod sqlite;
pub mod text_dir;

use futures::StreamExt;
use futures::stream::{self, BoxStream};

use crate::document::Document;
use crate::error::SourceError;

pub use api::ApiSource;
pub use jsonl::JsonlSource;
pub use sqlite::SqliteSource;
pub use text_dir::TextDirSource;

/// A re-iterable producer of documents.
pub trait DocumentSource: Send + Sync {
    /// A fresh stream over every document, in source order.
    fn documents(&self) -> BoxStream<'_, Result<Document, SourceError>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Documents held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    docs: Vec<Document>,
}

impl MemorySource {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs }
    }
}

impl DocumentSource for MemorySource {
    fn documents(&self) -> BoxStream<'_, Result<Document, SourceError>> {
        stream::iter(self.docs.iter().cloned().map(Ok)).boxed()
    }

    fn describe(&self) -> String {
        format!("{} in-memory documents", self.docs.len())
    }
}
