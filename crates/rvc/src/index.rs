//! Voice-print index: reference feature vectors of the target speaker.
//!
//! The index is built elsewhere and only read here. [`FlatIndex`] does exact
//! squared-L2 search over every stored vector, which is what a flat index
//! file describes.

use std::path::Path;

use thiserror::Error;

use crate::tensors::{TensorError, TensorStore};

/// Name of the reference matrix inside an index file.
pub const INDEX_TENSOR_NAME: &str = "vectors";

/// Nearest neighbours of one query, closest first.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbors {
    /// Squared L2 distances.
    pub distances: Vec<f32>,
    pub indices: Vec<usize>,
}

/// Read-only nearest-neighbour lookup over reference vectors.
pub trait VoicePrintIndex {
    /// Up to `k` nearest references to `query`, sorted by distance.
    fn search(&self, query: &[f32], k: usize) -> Neighbors;

    /// All reference vectors, row-major `[len, dim]`.
    fn reconstruct_all(&self) -> &[f32];

    fn dim(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("index holds no vectors")]
    Empty,
    #[error("index dimension {actual} does not match encoder dimension {expected}")]
    DimMismatch { expected: usize, actual: usize },
}

/// Exact search over an in-memory copy of the reference vectors.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    vectors: Vec<f32>,
}

impl FlatIndex {
    /// `vectors` is row-major `[n, dim]`; a trailing partial row is dropped.
    #[must_use]
    pub fn from_vectors(dim: usize, mut vectors: Vec<f32>) -> Self {
        let rows = if dim == 0 { 0 } else { vectors.len() / dim };
        vectors.truncate(rows * dim);
        Self { dim, vectors }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let store = TensorStore::open(path)?;
        let m = store.matrix_f32(INDEX_TENSOR_NAME)?;
        if m.rows == 0 || m.cols == 0 {
            return Err(IndexError::Empty);
        }
        Ok(Self::from_vectors(m.cols, m.data))
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dim..(i + 1) * self.dim]
    }
}

impl VoicePrintIndex for FlatIndex {
    fn search(&self, query: &[f32], k: usize) -> Neighbors {
        let mut scored: Vec<(f32, usize)> = (0..self.len())
            .map(|i| {
                let d = self
                    .row(i)
                    .iter()
                    .zip(query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>();
                (d, i)
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        Neighbors {
            distances: scored.iter().map(|s| s.0).collect(),
            indices: scored.iter().map(|s| s.1).collect(),
        }
    }

    fn reconstruct_all(&self) -> &[f32] {
        &self.vectors
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.vectors.len() / self.dim }
    }
}

/// Outcome of trying to load an index for one conversion.
#[derive(Debug)]
pub enum IndexLoad {
    Loaded(FlatIndex),
    /// The conversion continues without retrieval.
    Unavailable(String),
}

/// Load an index whose vectors must have `expected_dim` components.
#[must_use]
pub fn load_index(path: &Path, expected_dim: usize) -> IndexLoad {
    let result = FlatIndex::open(path).and_then(|index| {
        if index.dim() == expected_dim {
            Ok(index)
        } else {
            Err(IndexError::DimMismatch {
                expected: expected_dim,
                actual: index.dim(),
            })
        }
    });
    match result {
        Ok(index) => IndexLoad::Loaded(index),
        Err(e) => IndexLoad::Unavailable(format!("{}: {e}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensors::test_support::{f32_tensor, tmp_file, write};

    fn grid() -> FlatIndex {
        FlatIndex::from_vectors(2, vec![0.0, 0.0, 1.0, 0.0, 0.0, 2.0, 3.0, 3.0])
    }

    #[test]
    fn search_is_sorted_and_bounded() {
        let idx = grid();
        assert_eq!(idx.len(), 4);
        let n = idx.search(&[0.9, 0.1], 3);
        assert_eq!(n.indices, vec![1, 0, 2]);
        assert!((n.distances[0] - 0.02).abs() < 1e-6);
        assert!(n.distances.windows(2).all(|w| w[0] <= w[1]));

        let all = idx.search(&[0.0, 0.0], 8);
        assert_eq!(all.indices.len(), 4);
    }

    #[test]
    fn ties_resolve_to_lower_index() {
        let idx = FlatIndex::from_vectors(1, vec![1.0, -1.0, 1.0]);
        let n = idx.search(&[0.0], 2);
        assert_eq!(n.indices, vec![0, 1]);
    }

    #[test]
    fn partial_rows_are_dropped() {
        let idx = FlatIndex::from_vectors(3, vec![1.0; 7]);
        assert_eq!(idx.len(), 2);
        assert_eq!(idx.reconstruct_all().len(), 6);
    }

    #[test]
    fn load_reports_missing_and_mismatched_files() {
        let missing = tmp_file("missing-index");
        assert!(matches!(load_index(&missing, 4), IndexLoad::Unavailable(_)));

        let path = tmp_file("index");
        write(&path, vec![(INDEX_TENSOR_NAME, f32_tensor(vec![3, 2], &[0.5; 6]))]);

        let IndexLoad::Loaded(idx) = load_index(&path, 2) else {
            panic!("expected loaded index");
        };
        assert_eq!((idx.len(), idx.dim()), (3, 2));

        match load_index(&path, 768) {
            IndexLoad::Unavailable(reason) => assert!(reason.contains("768"), "{reason}"),
            IndexLoad::Loaded(_) => panic!("dimension mismatch must not load"),
        }

        std::fs::remove_file(path).expect("cleanup");
    }
}
