//! # VectorIndex
//!
//! Append-only exact similarity index over fixed-dimension vectors.
//!
//! Every added vector is L2-normalized and stored contiguously; its id is its
//! position, so ids start at `0` and increase by one per add. Queries are
//! normalized the same way, which makes the raw inner product equal to cosine
//! similarity in `[-1, 1]`. Search is a full scan, which is adequate up to the
//! low millions of vectors.
//!
//! ## Serialization layout
//! The index file is `bincode` (serde mode) of `{ dimension, data }`, where `data`
//! is the row-major vector buffer. Persisting writes a sibling temp file and
//! renames it over the target.
//!
//! ## Quick Example
//! ```
//! use hindsight::vector_index::VectorIndex;
//!
//! let mut index = VectorIndex::new(3);
//! assert_eq!(index.add(&[1.0, 0.0, 0.0]).unwrap(), 0);
//! assert_eq!(index.add(&[0.0, 1.0, 0.0]).unwrap(), 1);
//! let hits = index.search(&[0.9, 0.1, 0.0], 1).unwrap();
//! assert_eq!(hits[0].0, 0);
//! ```

use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fs, path::Path};
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};

/// Exact inner-product index over normalized vectors.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VectorIndex {
    /// Length of every stored vector.
    dimension: usize,
    /// Row-major storage; vector `id` occupies `data[id * dimension..(id + 1) * dimension]`.
    data: Vec<f32>,
}

impl VectorIndex {
    /// An empty index for vectors of length `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of vectors held; also the id the next [`add`](Self::add) will return.
    pub fn total_count(&self) -> u64 {
        if self.dimension == 0 {
            return 0;
        }
        (self.data.len() / self.dimension) as u64
    }

    /// Normalize and append `vector`, returning its id.
    ///
    /// # Errors
    /// `DimensionMismatch` if `vector.len()` differs from the index dimension.
    pub fn add(&mut self, vector: &[f32]) -> Result<u64> {
        self.check_dimension(vector.len())?;
        let id = self.total_count();
        self.data.extend(normalized(vector));
        Ok(id)
    }

    /// The `k` most similar vectors to `query`, best first, as `(id, score)`.
    ///
    /// Scores are cosine similarities. Equal scores keep the lower id first. An
    /// empty index yields an empty list.
    ///
    /// # Errors
    /// `DimensionMismatch` if `query.len()` differs from the index dimension.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        self.check_dimension(query.len())?;
        if k == 0 || self.data.is_empty() {
            return Ok(Vec::new());
        }

        let query = normalized(query);
        let mut scored: Vec<(u64, f32)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(id, row)| (id as u64, dot(row, &query)))
            .collect();

        let by_score = |a: &(u64, f32), b: &(u64, f32)| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        };

        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, by_score);
            scored.truncate(k);
        }
        scored.sort_by(by_score);

        Ok(scored)
    }

    /// Drop every vector; the next add returns id `0` again.
    pub fn reset(&mut self) {
        self.data.clear();
    }

    /// Write the full index to `path`, creating the parent directory if needed.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(self, bincode::config::standard())?;
        write_atomically(path, &bytes)?;
        debug!("Persisted {} vectors to {}", self.total_count(), path.display());
        Ok(())
    }

    /// Read an index from `path`.
    ///
    /// A missing file yields a fresh empty index of `dimension`. An unreadable or
    /// corrupt file is logged and also yields an empty index; the consistency check
    /// then rebuilds it from the log.
    ///
    /// # Errors
    /// `DimensionMismatch` if the file holds an index of another dimension.
    pub fn load(path: &Path, dimension: usize) -> Result<Self> {
        if !path.exists() {
            info!("No vector index at {}, starting empty", path.display());
            return Ok(Self::new(dimension));
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Error reading index {}: {}. Creating new one.", path.display(), err);
                return Ok(Self::new(dimension));
            }
        };

        let decoded: std::result::Result<(VectorIndex, usize), _> =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard());
        let index = match decoded {
            Ok((index, _)) if index.is_well_formed() => index,
            Ok(_) => {
                warn!("Vector index {} is truncated. Creating new one.", path.display());
                return Ok(Self::new(dimension));
            }
            Err(err) => {
                warn!("Error decoding index {}: {}. Creating new one.", path.display(), err);
                return Ok(Self::new(dimension));
            }
        };

        if index.dimension != dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: index.dimension,
                actual: dimension,
            });
        }

        info!("Loaded vector index with {} vectors.", index.total_count());
        Ok(index)
    }

    fn is_well_formed(&self) -> bool {
        self.dimension > 0 && self.data.len() % self.dimension == 0
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}

/// L2-normalized copy of `vector`; the zero vector stays zero.
pub fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ids_start_at_zero_and_increase() {
        let mut index = VectorIndex::new(2);
        assert_eq!(index.total_count(), 0);
        assert_eq!(index.add(&[1.0, 0.0]).unwrap(), 0);
        assert_eq!(index.add(&[0.0, 3.0]).unwrap(), 1);
        assert_eq!(index.total_count(), 2);
    }

    #[test]
    fn test_add_rejects_wrong_dimension() {
        let mut index = VectorIndex::new(3);
        let err = index.add(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(index.total_count(), 0);
    }

    #[test]
    fn test_search_orders_by_cosine() {
        let mut index = VectorIndex::new(2);
        index.add(&[0.0, 1.0]).unwrap();
        index.add(&[10.0, 0.0]).unwrap();
        index.add(&[1.0, 1.0]).unwrap();

        let hits = index.search(&[2.0, 0.0], 3).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.0).collect();
        assert_eq!(ids, vec![1, 2, 0]);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
        assert!((hits[1].1 - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(hits[2].1.abs() < 1e-6);
    }

    #[test]
    fn test_search_truncates_to_k() {
        let mut index = VectorIndex::new(2);
        for i in 0..10 {
            index.add(&[1.0, i as f32]).unwrap();
        }
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0, 0);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_search_empty_index() {
        let index = VectorIndex::new(4);
        assert!(index.search(&[1.0, 0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_reset_restarts_ids() {
        let mut index = VectorIndex::new(2);
        index.add(&[1.0, 0.0]).unwrap();
        index.add(&[0.0, 1.0]).unwrap();
        index.reset();
        assert_eq!(index.total_count(), 0);
        assert_eq!(index.add(&[1.0, 1.0]).unwrap(), 0);
    }

    #[test]
    fn test_persist_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idx").join("history.index");
        let mut index = VectorIndex::new(3);
        index.add(&[1.0, 2.0, 3.0]).unwrap();
        index.add(&[3.0, 2.0, 1.0]).unwrap();
        index.persist(&path).unwrap();

        let loaded = VectorIndex::load(&path, 3).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let loaded = VectorIndex::load(&dir.path().join("absent.index"), 8).unwrap();
        assert_eq!(loaded.total_count(), 0);
        assert_eq!(loaded.dimension(), 8);
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.index");
        fs::write(&path, b"not an index").unwrap();
        let loaded = VectorIndex::load(&path, 8).unwrap();
        assert_eq!(loaded.total_count(), 0);
    }

    #[test]
    fn test_load_other_dimension_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.index");
        let mut index = VectorIndex::new(3);
        index.add(&[1.0, 0.0, 0.0]).unwrap();
        index.persist(&path).unwrap();

        let err = VectorIndex::load(&path, 384).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch {
                expected: 3,
                actual: 384
            }
        ));
    }

    #[test]
    fn test_normalized_zero_vector() {
        assert_eq!(normalized(&[0.0, 0.0]), vec![0.0, 0.0]);
        let unit = normalized(&[3.0, 4.0]);
        assert!((unit[0] - 0.6).abs() < 1e-6 && (unit[1] - 0.8).abs() < 1e-6);
    }
}
