//! Query path: embed a question, retrieve chunks, generate a grounded answer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{GenerationConfig, QueryConfig};
use crate::embeddings::EmbeddingClient;
use crate::error::{ProviderError, QueryError};
use crate::generation::{AnswerGenerator, GenerationRequest};
use crate::index::{SearchHit, VectorIndex};

const SYSTEM_PROMPT: &str = "You are an assistant that answers using ONLY the provided sources.
If the answer is not in the sources, say \"I don't know from the provided sources.\"
Keep answers concise and cite source numbers in brackets like [1], [2].";

const CLOSING_INSTRUCTION: &str =
    "Answer the question using only the information above. Cite sources using [1], [2], etc.";

/// A retrieved chunk as shown to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedSource {
    pub source: String,
    pub text: String,
    pub score: f32,
}

/// Answer plus the chunks it was grounded on, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub retrieved: Vec<RetrievedSource>,
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Assemble the grounded prompt for `question` over `hits`.
pub fn build_prompt(question: &str, hits: &[SearchHit], snippet_chars: usize) -> String {
    let mut prompt = format!("{}\n\nQuestion: {}\n\nSources:\n", SYSTEM_PROMPT, question);
    for (i, hit) in hits.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] (from {}) {}\n\n",
            i + 1,
            hit.metadata.source,
            truncate_chars(&hit.metadata.text, snippet_chars)
        ));
    }
    prompt.push('\n');
    prompt.push_str(CLOSING_INSTRUCTION);
    prompt
}

/// Answers questions against a [`VectorIndex`].
#[derive(Clone)]
pub struct QueryEngine {
    embedder: EmbeddingClient,
    generator: Arc<dyn AnswerGenerator>,
    query: QueryConfig,
    generation: GenerationConfig,
}

impl QueryEngine {
    pub fn new(
        embedder: EmbeddingClient,
        generator: Arc<dyn AnswerGenerator>,
        query: QueryConfig,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            embedder,
            generator,
            query,
            generation,
        }
    }

    pub fn default_top_k(&self) -> usize {
        self.query.top_k
    }

    /// Top-`top_k` chunks for `question`, best first.
    pub async fn retrieve(
        &self,
        index: &VectorIndex,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, QueryError> {
        if question.trim().is_empty() {
            return Err(QueryError::InvalidInput {
                message: "question must not be empty".into(),
            });
        }
        if top_k == 0 {
            return Err(QueryError::InvalidInput {
                message: "top_k must be at least 1".into(),
            });
        }

        let vector = self.embedder.embed_query(question).await?;
        let hits = index.query(&vector, top_k)?;
        debug!(hits = hits.len(), top_k, "Retrieved chunks");
        Ok(hits)
    }

    /// Retrieve, prompt the generator, and return the answer with its sources.
    pub async fn answer(
        &self,
        index: &VectorIndex,
        question: &str,
        top_k: usize,
    ) -> Result<QueryResponse, QueryError> {
        let hits = self.retrieve(index, question, top_k).await?;

        let prompt = build_prompt(question, &hits, self.query.prompt_snippet_chars);
        let request = GenerationRequest::from_config(prompt, &self.generation);
        let timeout = request.timeout;
        let answer = tokio::time::timeout(timeout, self.generator.generate(request))
            .await
            .map_err(|_| ProviderError::Timeout {
                timeout_secs: timeout.as_secs(),
            })??;

        info!(sources = hits.len(), "Answer generated");

        let display = self.query.display_snippet_chars;
        let retrieved = hits
            .into_iter()
            .map(|hit| RetrievedSource {
                text: truncate_chars(&hit.metadata.text, display).to_string(),
                source: hit.metadata.source,
                score: hit.score,
            })
            .collect();

        Ok(QueryResponse { answer, retrieved })
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("embedder", &self.embedder)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}
