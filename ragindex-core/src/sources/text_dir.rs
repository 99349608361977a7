//! Directory of plain-text files.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use walkdir::WalkDir;

use super::DocumentSource;
use crate::document::Document;
use crate::error::SourceError;

/// Every `*.txt` file directly inside a directory, in file-name order.
///
/// The file path is the document id and its `url`; the file name is its
/// title.
#[derive(Debug, Clone)]
pub struct TextDirSource {
    dir: PathBuf,
}

impl TextDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The text files that would be read, sorted.
    pub fn list_files(&self) -> Result<Vec<PathBuf>, SourceError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| SourceError::Io(std::io::Error::other(e)))?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "txt")
            {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}

async fn read_document(path: PathBuf) -> Result<Document, SourceError> {
    let text = tokio::fs::read_to_string(&path).await?;
    let display = path.display().to_string();
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Document::new(text)
        .with_id(display.clone())
        .with_metadata("url", display)
        .with_metadata("title", title))
}

impl DocumentSource for TextDirSource {
    fn documents(&self) -> BoxStream<'_, Result<Document, SourceError>> {
        match self.list_files() {
            Ok(files) => stream::iter(files).then(read_document).boxed(),
            Err(e) => stream::once(futures::future::ready(Err(e))).boxed(),
        }
    }

    fn describe(&self) -> String {
        format!("text files in {}", self.dir.display())
    }
}

/// Whether `dir` contains at least one readable text file.
pub fn has_text_files(dir: &Path) -> bool {
    TextDirSource::new(dir)
        .list_files()
        .is_ok_and(|files| !files.is_empty())
}
