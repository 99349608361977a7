//! Newline-delimited JSON file source.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;

use super::DocumentSource;
use crate::document::Document;
use crate::error::SourceError;

/// One JSON document per line. Blank lines are ignored; a malformed line
/// yields an error item and reading continues.
#[derive(Debug, Clone)]
pub struct JsonlSource {
    path: PathBuf,
}

impl JsonlSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_line(path: &Path, line_no: usize, line: &str) -> Option<Result<Document, SourceError>> {
    if line.trim().is_empty() {
        return None;
    }
    Some(
        serde_json::from_str::<Document>(line).map_err(|e| SourceError::Parse {
            location: format!("{}:{}", path.display(), line_no),
            message: e.to_string(),
        }),
    )
}

impl DocumentSource for JsonlSource {
    fn documents(&self) -> BoxStream<'_, Result<Document, SourceError>> {
        let path = self.path.clone();
        stream::once(async move {
            let file = tokio::fs::File::open(&path).await;
            (path, file)
        })
        .flat_map(|(path, file)| match file {
            Ok(file) => LinesStream::new(BufReader::new(file).lines())
                .enumerate()
                .filter_map(move |(i, line)| {
                    let item = match line {
                        Ok(line) => parse_line(&path, i + 1, &line),
                        Err(e) => Some(Err(SourceError::Io(e))),
                    };
                    futures::future::ready(item)
                })
                .boxed(),
            Err(e) => stream::once(futures::future::ready(Err(SourceError::Io(e)))).boxed(),
        })
        .boxed()
    }

    fn describe(&self) -> String {
        format!("JSONL file {}", self.path.display())
    }
}
