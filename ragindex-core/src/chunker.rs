//! Token-window chunking.
//!
//! A document is tokenized once and cut into overlapping windows of at most
//! `max_tokens` tokens. Consecutive windows share `overlap` tokens, and the
//! last window always ends at the final token.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChunkError;
use crate::tokenizer::Tokenizer;

/// Default cap on chunks emitted for a single document.
pub const DEFAULT_MAX_CHUNKS: usize = 1000;

/// One window of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position among the chunks actually emitted for the document.
    pub chunk_index: usize,
    pub text: String,
    /// Token offset of the window start (inclusive).
    pub start_token: usize,
    /// Token offset of the window end (exclusive).
    pub end_token: usize,
}

impl Chunk {
    /// Identifier unique within the owning document.
    pub fn id(&self) -> String {
        format!("chunk_{}", self.chunk_index)
    }

    pub fn token_len(&self) -> usize {
        self.end_token - self.start_token
    }
}

/// Result of chunking one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkSet {
    pub chunks: Vec<Chunk>,
    pub total_tokens: usize,
    /// The chunk cap was reached before the end of the document.
    pub truncated: bool,
    /// Windows dropped because their tokens could not be decoded.
    pub skipped: usize,
}

impl ChunkSet {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Splits text into overlapping token windows.
#[derive(Clone)]
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
    max_chunks: usize,
}

impl Chunker {
    pub fn new(tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            tokenizer,
            max_chunks: DEFAULT_MAX_CHUNKS,
        }
    }

    pub fn with_max_chunks(mut self, max_chunks: usize) -> Self {
        self.max_chunks = max_chunks;
        self
    }

    pub fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    /// Cut `text` into windows of at most `max_tokens` tokens sharing
    /// `overlap` tokens with their predecessor.
    ///
    /// Only invalid parameters are errors. A tokenizer failure yields an empty
    /// set, and a window that fails to decode is dropped while the cursor
    /// still advances.
    pub fn chunk_text(
        &self,
        text: &str,
        max_tokens: usize,
        overlap: usize,
    ) -> Result<ChunkSet, ChunkError> {
        if max_tokens == 0 || overlap >= max_tokens {
            return Err(ChunkError::InvalidParameters {
                max_tokens,
                overlap,
            });
        }

        let tokens = match self.tokenizer.encode(text) {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(error = %e, "Tokenization failed, document yields no chunks");
                return Ok(ChunkSet::default());
            }
        };

        let mut set = ChunkSet {
            total_tokens: tokens.len(),
            ..ChunkSet::default()
        };

        let mut start = 0;
        while start < tokens.len() {
            if set.chunks.len() >= self.max_chunks {
                set.truncated = true;
                warn!(
                    max_chunks = self.max_chunks,
                    total_tokens = tokens.len(),
                    stopped_at = start,
                    "Chunk cap reached, truncating document"
                );
                break;
            }

            let end = (start + max_tokens).min(tokens.len());
            match self.tokenizer.decode(&tokens[start..end]) {
                Ok(text) => {
                    let chunk_index = set.chunks.len();
                    set.chunks.push(Chunk {
                        chunk_index,
                        text,
                        start_token: start,
                        end_token: end,
                    });
                    if (chunk_index + 1) % 10 == 0 {
                        debug!(chunks = chunk_index + 1, "Chunking progress");
                    }
                }
                Err(e) => {
                    set.skipped += 1;
                    debug!(start, end, error = %e, "Skipping undecodable chunk");
                }
            }

            if end == tokens.len() {
                break;
            }
            start = end - overlap;
        }

        Ok(set)
    }
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("max_chunks", &self.max_chunks)
            .finish_non_exhaustive()
    }
}
