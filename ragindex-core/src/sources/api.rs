//! Paginated REST API source.
//!
//! Pages are requested as `GET {base_url}/{endpoint}?limit=N&offset=M`, one
//! at a time with a fixed pause before each request. Records are read from
//! a `results` or `data` array, or from a bare top-level array.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::DocumentSource;
use crate::config::SourceConfig;
use crate::document::{Document, value_to_string};
use crate::error::SourceError;

/// Fields copied from an API record into document metadata.
const METADATA_FIELDS: [&str; 4] = ["title", "url", "created_at", "category"];

#[derive(Debug, Clone, Copy, Default)]
struct PageCursor {
    offset: usize,
    fetched: usize,
    done: bool,
}

/// Documents from a paginated HTTP endpoint.
#[derive(Debug, Clone)]
pub struct ApiSource {
    client: reqwest::Client,
    base_url: String,
    endpoint: String,
    api_key: Option<String>,
    page_size: usize,
    request_delay: Duration,
    max_attempts: u32,
    backoff_base: Duration,
    total_records: Option<usize>,
}

impl ApiSource {
    pub fn new(
        base_url: impl Into<String>,
        endpoint: impl Into<String>,
        config: &SourceConfig,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let rate = config.rate_limit_per_second.max(1);
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            endpoint: endpoint.into().trim_start_matches('/').to_string(),
            api_key: None,
            page_size: config.api_page_size.max(1),
            request_delay: Duration::from_secs(1) / rate,
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_secs(1),
            total_records: None,
        })
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Stop once at least `total` records have been fetched.
    pub fn with_total_records(mut self, total: usize) -> Self {
        self.total_records = Some(total);
        self
    }

    /// Override the pause before each request and the retry backoff base.
    pub fn with_timing(mut self, request_delay: Duration, backoff_base: Duration) -> Self {
        self.request_delay = request_delay;
        self.backoff_base = backoff_base;
        self
    }

    /// Raw record pages. Ends on an empty page, after `total_records`, or
    /// after one error item once a page exhausts its retries.
    pub fn pages(&self) -> BoxStream<'_, Result<Vec<Value>, SourceError>> {
        stream::unfold(PageCursor::default(), move |mut cursor| async move {
            if cursor.done {
                return None;
            }
            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
            match self.fetch_page(cursor.offset).await {
                Ok(records) if records.is_empty() => None,
                Ok(records) => {
                    cursor.fetched += records.len();
                    cursor.offset += self.page_size;
                    info!(records = cursor.fetched, "Fetched batch");
                    if self.total_records.is_some_and(|t| cursor.fetched >= t) {
                        cursor.done = true;
                    }
                    Some((Ok(records), cursor))
                }
                Err(e) => {
                    cursor.done = true;
                    Some((Err(e), cursor))
                }
            }
        })
        .boxed()
    }

    /// Write every raw record to `path` as JSON lines. Returns the count.
    pub async fn fetch_all(&self, path: &Path) -> Result<usize, SourceError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::io::BufWriter::new(tokio::fs::File::create(path).await?);
        let mut count = 0;
        let mut pages = self.pages();
        while let Some(page) = pages.next().await {
            for record in page? {
                let mut line = serde_json::to_vec(&record).map_err(|e| SourceError::Parse {
                    location: format!("record {}", count),
                    message: e.to_string(),
                })?;
                line.push(b'\n');
                file.write_all(&line).await?;
                count += 1;
            }
        }
        file.flush().await?;
        info!(records = count, path = %path.display(), "All data saved");
        Ok(count)
    }

    async fn fetch_page(&self, offset: usize) -> Result<Vec<Value>, SourceError> {
        let mut attempt = 0u32;
        loop {
            let err = match self.request_page(offset).await {
                Ok(records) => return Ok(records),
                Err(e) => e,
            };
            attempt += 1;
            if attempt >= self.max_attempts {
                warn!(attempts = attempt, error = %err, "Page fetch failed");
                return Err(SourceError::Exhausted {
                    attempts: attempt,
                    message: err.to_string(),
                });
            }
            let wait = self.backoff_base * 2u32.saturating_pow(attempt - 1);
            warn!(
                attempt,
                max = self.max_attempts,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "Retrying page fetch"
            );
            tokio::time::sleep(wait).await;
        }
    }

    async fn request_page(&self, offset: usize) -> Result<Vec<Value>, reqwest::Error> {
        let url = format!("{}/{}", self.base_url, self.endpoint);
        let mut request = self
            .client
            .get(&url)
            .query(&[("limit", self.page_size), ("offset", offset)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let body: Value = request.send().await?.error_for_status()?.json().await?;
        Ok(extract_records(body))
    }
}

fn extract_records(body: Value) -> Vec<Value> {
    match body {
        Value::Array(records) => records,
        Value::Object(mut map) => ["results", "data"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(records)) => Some(records),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Map an API record onto a document: `content` (or `description`) becomes
/// the text, a fixed set of fields becomes metadata.
pub fn record_to_document(record: &Value) -> Document {
    let text = record
        .get("content")
        .and_then(Value::as_str)
        .or_else(|| record.get("description").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string();
    let metadata = METADATA_FIELDS
        .iter()
        .filter_map(|field| {
            let value = value_to_string(record.get(*field)?.clone())?;
            Some((field.to_string(), value))
        })
        .collect();
    Document {
        id: record.get("id").cloned().and_then(value_to_string),
        text,
        metadata,
    }
}

impl DocumentSource for ApiSource {
    fn documents(&self) -> BoxStream<'_, Result<Document, SourceError>> {
        self.pages()
            .flat_map(|page| {
                let items: Vec<Result<Document, SourceError>> = match page {
                    Ok(records) => records.iter().map(|r| Ok(record_to_document(r))).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
            .boxed()
    }

    fn describe(&self) -> String {
        format!("REST API {}/{}", self.base_url, self.endpoint)
    }
}
