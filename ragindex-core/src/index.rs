//! Flat inner-product vector index with positional metadata.
//!
//! Vectors are L2-normalized on insert so the inner product of a stored row
//! and a normalized query is their cosine similarity. Row `i` of the vector
//! store always corresponds to `metadata[i]`; records are append-only.
//!
//! The index persists as two coupled artifacts:
//! - a binary vector file: `RGIX` magic, format version, dim, row count, then
//!   little-endian `f32` rows
//! - a JSON array of [`ChunkMetadata`] in row order

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::IndexError;
use crate::persistence::{atomic_write, atomic_write_json, load_json};

const MAGIC: &[u8; 4] = b"RGIX";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Locations of the two index artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub index: PathBuf,
    pub metadata: PathBuf,
}

impl IndexPaths {
    pub fn new(index: impl Into<PathBuf>, metadata: impl Into<PathBuf>) -> Self {
        Self {
            index: index.into(),
            metadata: metadata.into(),
        }
    }

    /// Default artifact names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join("index.bin"), dir.join("index_meta.json"))
    }
}

/// Per-chunk record stored alongside each vector.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub doc_id: String,
    pub chunk_id: String,
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: String,
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Cosine similarity to the query.
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// In-memory exhaustive similarity index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dim: usize,
    /// Row-major, `len() * dim` values.
    vectors: Vec<f32>,
    metadata: Vec<ChunkMetadata>,
    paths: IndexPaths,
}

impl VectorIndex {
    pub fn new(dim: usize, paths: IndexPaths) -> Self {
        Self {
            dim,
            vectors: Vec::new(),
            metadata: Vec::new(),
            paths,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    pub fn metadata(&self) -> &[ChunkMetadata] {
        &self.metadata
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    /// Append vectors with their metadata.
    ///
    /// Nothing is appended unless every vector has the index dimension and
    /// the two sequences have equal length.
    pub fn add(
        &mut self,
        vectors: Vec<Vec<f32>>,
        metadatas: Vec<ChunkMetadata>,
    ) -> Result<(), IndexError> {
        if vectors.len() != metadatas.len() {
            return Err(IndexError::LengthMismatch {
                vectors: vectors.len(),
                metadatas: metadatas.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: bad.len(),
            });
        }

        self.vectors.reserve(vectors.len() * self.dim);
        for mut vector in vectors {
            normalize(&mut vector);
            self.vectors.extend_from_slice(&vector);
        }
        self.metadata.extend(metadatas);
        debug!(total = self.len(), "Vectors added to index");
        Ok(())
    }

    /// Up to `k` records most similar to `vector`, by descending score.
    ///
    /// Equal scores keep insertion order.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if k == 0 || self.is_empty() || self.dim == 0 {
            return Ok(Vec::new());
        }

        let mut target = vector.to_vec();
        normalize(&mut target);

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dim)
            .map(|row| dot(row, &target))
            .enumerate()
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                score,
                metadata: self.metadata[i].clone(),
            })
            .collect())
    }

    /// Write both artifacts, vectors first.
    pub fn save(&self) -> Result<(), IndexError> {
        atomic_write(&self.paths.index, &self.encode_vectors())?;
        atomic_write_json(&self.paths.metadata, &self.metadata)?;
        info!(
            chunks = self.len(),
            path = %self.paths.index.display(),
            "Index saved"
        );
        Ok(())
    }

    /// Replace the in-memory contents with the persisted artifacts.
    ///
    /// Returns `Ok(false)` when neither artifact exists. Exactly one artifact
    /// existing is an inconsistent state and an error.
    pub fn load(&mut self) -> Result<bool, IndexError> {
        let has_index = self.paths.index.exists();
        let has_meta = self.paths.metadata.exists();
        match (has_index, has_meta) {
            (false, false) => return Ok(false),
            (true, false) => {
                return Err(IndexError::Inconsistent {
                    present: self.paths.index.clone(),
                    missing: self.paths.metadata.clone(),
                });
            }
            (false, true) => {
                return Err(IndexError::Inconsistent {
                    present: self.paths.metadata.clone(),
                    missing: self.paths.index.clone(),
                });
            }
            (true, true) => {}
        }

        let bytes = std::fs::read(&self.paths.index)?;
        let vectors = self.decode_vectors(&bytes)?;

        let metadata: Vec<ChunkMetadata> = match load_json(&self.paths.metadata) {
            Ok(Some(m)) => m,
            Ok(None) => {
                return Err(IndexError::Inconsistent {
                    present: self.paths.index.clone(),
                    missing: self.paths.metadata.clone(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(IndexError::Corrupt {
                    path: self.paths.metadata.clone(),
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let rows = vectors.len() / self.dim.max(1);
        if rows != metadata.len() {
            return Err(IndexError::Corrupt {
                path: self.paths.metadata.clone(),
                message: format!(
                    "{} vectors but {} metadata records",
                    rows,
                    metadata.len()
                ),
            });
        }

        self.vectors = vectors;
        self.metadata = metadata;
        info!(chunks = self.len(), "Index loaded");
        Ok(true)
    }

    fn encode_vectors(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dim as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for value in &self.vectors {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    fn decode_vectors(&self, bytes: &[u8]) -> Result<Vec<f32>, IndexError> {
        let corrupt = |message: String| IndexError::Corrupt {
            path: self.paths.index.clone(),
            message,
        };

        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(corrupt("missing index header".into()));
        }
        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", version)));
        }
        let dim = read_u32(&bytes[8..12]) as usize;
        if dim != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: dim,
            });
        }
        let count = read_u64(&bytes[12..20]);

        let body = &bytes[HEADER_LEN..];
        let expected = usize::try_from(count)
            .ok()
            .and_then(|c| c.checked_mul(dim))
            .and_then(|n| n.checked_mul(4));
        if expected != Some(body.len()) {
            return Err(corrupt(format!(
                "header declares {} rows of dim {} but body has {} bytes",
                count,
                dim,
                body.len()
            )));
        }

        Ok(body
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale to unit length. Zero vectors are left as-is.
fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(n: usize) -> ChunkMetadata {
        ChunkMetadata {
            doc_id: format!("doc{}", n),
            chunk_id: "chunk_0".into(),
            text: format!("text {}", n),
            source: format!("http://example.com/{}", n),
            ..ChunkMetadata::default()
        }
    }

    fn index_in(dir: &TempDir, dim: usize) -> VectorIndex {
        VectorIndex::new(dim, IndexPaths::in_dir(dir.path()))
    }

    #[test]
    fn test_ranking_descending() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, 2);
        // cos to target [1,0]: 0.0, 1.0, ~0.707
        index
            .add(
                vec![vec![0.0, 3.0], vec![5.0, 0.0], vec![1.0, 1.0]],
                vec![meta(0), meta(1), meta(2)],
            )
            .unwrap();
        let hits = index.query(&[2.0, 0.0], 3).unwrap();
        let docs: Vec<&str> = hits.iter().map(|h| h.metadata.doc_id.as_str()).collect();
        assert_eq!(docs, vec!["doc1", "doc2", "doc0"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(hits[2].score.abs() < 1e-6);
    }

    #[test]
    fn test_query_empty_index() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir, 3);
        assert!(index.query(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_k_larger_than_len_returns_all() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, 2);
        index
            .add(vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![meta(0), meta(1)])
            .unwrap();
        assert_eq!(index.query(&[1.0, 1.0], 10).unwrap().len(), 2);
        assert!(index.query(&[1.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_add_length_mismatch_is_atomic() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, 2);
        let err = index.add(vec![vec![1.0, 0.0]], vec![]).unwrap_err();
        assert!(matches!(err, IndexError::LengthMismatch { .. }));
        let err = index
            .add(vec![vec![1.0, 0.0], vec![1.0]], vec![meta(0), meta(1)])
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_query_wrong_dim() {
        let dir = TempDir::new().unwrap();
        let index = index_in(&dir, 4);
        assert!(matches!(
            index.query(&[1.0], 1),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, 3);
        index
            .add(
                vec![vec![1.0, 2.0, 3.0], vec![-1.0, 0.5, 0.0], vec![0.0, 0.0, 9.0]],
                vec![meta(0), meta(1), meta(2)],
            )
            .unwrap();
        index.save().unwrap();
        let target = [0.3, -0.2, 0.9];
        let before = index.query(&target, 3).unwrap();

        let mut reloaded = index_in(&dir, 3);
        assert!(reloaded.load().unwrap());
        assert_eq!(reloaded.metadata(), index.metadata());
        let after = reloaded.query(&target, 3).unwrap();
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.metadata, b.metadata);
            assert!((a.score - b.score).abs() < 1e-6);
        }
    }

    #[test]
    fn test_load_absent_is_false() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, 3);
        assert!(!index.load().unwrap());
    }

    #[test]
    fn test_load_single_artifact_is_inconsistent() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, 2);
        index.add(vec![vec![1.0, 0.0]], vec![meta(0)]).unwrap();
        index.save().unwrap();
        std::fs::remove_file(&index.paths().metadata).unwrap();
        let err = index_in(&dir, 2).load().unwrap_err();
        assert!(matches!(err, IndexError::Inconsistent { .. }));
    }

    #[test]
    fn test_load_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, 2);
        index.add(vec![vec![1.0, 0.0]], vec![meta(0)]).unwrap();
        index.save().unwrap();
        let err = index_in(&dir, 768).load().unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 768,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_load_count_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, 2);
        index
            .add(vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![meta(0), meta(1)])
            .unwrap();
        index.save().unwrap();
        atomic_write_json(&index.paths().metadata, &vec![meta(0)]).unwrap();
        let err = index_in(&dir, 2).load().unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn test_load_bad_magic_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let paths = IndexPaths::in_dir(dir.path());
        std::fs::write(&paths.index, b"FAISS-whatever-bytes-here").unwrap();
        std::fs::write(&paths.metadata, b"[]").unwrap();
        let err = VectorIndex::new(2, paths).load().unwrap_err();
        assert!(matches!(err, IndexError::Corrupt { .. }));
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let dir = TempDir::new().unwrap();
        let mut index = index_in(&dir, 2);
        index.add(vec![vec![0.0, 0.0]], vec![meta(0)]).unwrap();
        let hits = index.query(&[1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].score, 0.0);
    }
}
