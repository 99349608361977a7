//! Checkpoint artifacts for resumable builds.
//!
//! `processed_ids.json` holds the set of document ids whose chunks are in the
//! persisted index. `checkpoint_info.json` is an advisory progress snapshot
//! that is never read back to resume.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::persistence::{atomic_write_json, load_json};

const PROCESSED_IDS_FILE: &str = "processed_ids.json";
const CHECKPOINT_INFO_FILE: &str = "checkpoint_info.json";

/// Ids of documents already incorporated into the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessedIdSet {
    ids: BTreeSet<String>,
}

impl ProcessedIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns `true` if the id was not already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

/// Progress snapshot written at each checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub timestamp: DateTime<Utc>,
    /// Documents chunked and queued during the current run.
    pub docs_processed: usize,
    pub docs_skipped: usize,
    /// Chunks embedded and added during the current run.
    pub total_chunks: usize,
    pub processed_ids_count: usize,
}

/// Directory holding the checkpoint artifacts.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn processed_ids_path(&self) -> PathBuf {
        self.dir.join(PROCESSED_IDS_FILE)
    }

    pub fn info_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_INFO_FILE)
    }

    /// Load the persisted id set; empty when no checkpoint exists yet.
    pub fn load_processed_ids(&self) -> io::Result<ProcessedIdSet> {
        Ok(load_json(&self.processed_ids_path())?.unwrap_or_default())
    }

    pub fn save_processed_ids(&self, ids: &ProcessedIdSet) -> io::Result<()> {
        atomic_write_json(&self.processed_ids_path(), ids)
    }

    pub fn load_info(&self) -> io::Result<Option<CheckpointInfo>> {
        load_json(&self.info_path())
    }

    pub fn save_info(&self, info: &CheckpointInfo) -> io::Result<()> {
        atomic_write_json(&self.info_path(), info)
    }

    /// Delete both artifacts. Missing files are not an error.
    pub fn clear(&self) -> io::Result<()> {
        for path in [self.processed_ids_path(), self.info_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
