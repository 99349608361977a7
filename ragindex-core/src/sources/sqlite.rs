//! SQLite batch source.
//!
//! Reads `SELECT id, content, title, url FROM documents` in fixed-size pages.
//! Each page runs on the blocking thread pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OpenFlags, params};
use tracing::info;

use super::DocumentSource;
use crate::document::Document;
use crate::error::SourceError;

const PAGE_QUERY: &str =
    "SELECT id, content, title, url FROM documents ORDER BY rowid LIMIT ?1 OFFSET ?2";

/// Documents from the `documents` table of a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    path: PathBuf,
    page_size: usize,
}

impl SqliteSource {
    pub fn new(path: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            path: path.into(),
            page_size: page_size.max(1),
        }
    }
}

fn sql_to_string(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Integer(i) => Some(i.to_string()),
        SqlValue::Real(f) => Some(f.to_string()),
        SqlValue::Text(s) => Some(s),
        SqlValue::Blob(b) => Some(String::from_utf8_lossy(&b).into_owned()),
    }
}

fn read_page(path: &Path, limit: usize, offset: usize) -> Result<Vec<Document>, SourceError> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare(PAGE_QUERY)?;
    let rows = stmt.query_map(params![limit as i64, offset as i64], |row| {
        Ok((
            row.get::<_, SqlValue>(0)?,
            row.get::<_, SqlValue>(1)?,
            row.get::<_, SqlValue>(2)?,
            row.get::<_, SqlValue>(3)?,
        ))
    })?;

    let mut docs = Vec::new();
    for row in rows {
        let (id, content, title, url) = row?;
        let mut metadata = HashMap::new();
        if let Some(title) = sql_to_string(title) {
            metadata.insert("title".to_string(), title);
        }
        if let Some(url) = sql_to_string(url) {
            metadata.insert("url".to_string(), url);
        }
        docs.push(Document {
            id: sql_to_string(id),
            text: sql_to_string(content).unwrap_or_default(),
            metadata,
        });
    }
    Ok(docs)
}

impl DocumentSource for SqliteSource {
    fn documents(&self) -> BoxStream<'_, Result<Document, SourceError>> {
        let page_size = self.page_size;
        stream::unfold(Some(0usize), move |offset| async move {
            let offset = offset?;
            let path = self.path.clone();
            let page = tokio::task::spawn_blocking(move || read_page(&path, page_size, offset))
                .await
                .map_err(|e| SourceError::Io(std::io::Error::other(e)))
                .and_then(|res| res);
            match page {
                Ok(docs) if docs.is_empty() => None,
                Ok(docs) => {
                    info!(processed = offset + docs.len(), "Processed database records");
                    Some((stream::iter(docs.into_iter().map(Ok)).boxed(), Some(offset + page_size)))
                }
                Err(e) => Some((stream::once(futures::future::ready(Err(e))).boxed(), None)),
            }
        })
        .flatten()
        .boxed()
    }

    fn describe(&self) -> String {
        format!("SQLite database {}", self.path.display())
    }
}
