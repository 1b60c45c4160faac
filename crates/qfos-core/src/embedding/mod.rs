//! Request embeddings and cosine similarity.
//!
//! The engine depends on one capability: "embed a list of token sequences
//! into a matrix of L2-normalized row vectors supporting dot-product
//! cosine". [`EmbeddingBackend`] expresses that capability; the TF-IDF
//! backend in [`tfidf`] is the default, and a dense transformer backend
//! can be installed through the same trait.
//!
//! Rows are stored sparse (sorted indices + values). Merge-join on sorted
//! indices gives O(n + m) dot products where n, m are the non-zero counts,
//! which is what makes all-pairs MIBCS affordable for URL vocabularies.
//!
//! A request whose tokenization is empty embeds as the zero row; any
//! similarity involving a zero row is defined as 0.

mod tfidf;

pub use tfidf::TfidfBackend;

use crate::error::EmbeddingError;

// ============================================================================
// SPARSE ROWS
// ============================================================================

/// A sparse vector with sorted, unique indices.
///
/// Construction normalizes to unit L2 length; the all-zero vector is
/// representable and stays zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVec {
    indices: Vec<u32>,
    values: Vec<f32>,
}

impl SparseVec {
    /// Build from unsorted (index, value) pairs, dropping zero values,
    /// then L2-normalize.
    pub fn from_pairs(mut pairs: Vec<(u32, f32)>) -> Self {
        pairs.retain(|&(_, v)| v != 0.0);
        pairs.sort_unstable_by_key(|&(i, _)| i);
        let mut vec = Self {
            indices: pairs.iter().map(|&(i, _)| i).collect(),
            values: pairs.iter().map(|&(_, v)| v).collect(),
        };
        vec.normalize();
        vec
    }

    /// The zero row.
    pub fn zero() -> Self {
        Self {
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of non-zero entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    fn l2_norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    fn normalize(&mut self) {
        let norm = self.l2_norm();
        if norm > f32::EPSILON {
            for v in self.values.iter_mut() {
                *v /= norm;
            }
        } else {
            self.indices.clear();
            self.values.clear();
        }
    }

    /// Dot product via merge-join on sorted indices.
    ///
    /// For normalized rows this is the cosine similarity. Involving a
    /// zero row the result is 0 by definition.
    pub fn dot(&self, other: &Self) -> f32 {
        let mut sum = 0.0f32;
        let mut i = 0;
        let mut j = 0;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
            }
        }
        sum
    }
}

// ============================================================================
// MATRIX
// ============================================================================

/// Row-per-request matrix of L2-normalized embeddings.
#[derive(Debug, Clone)]
pub struct EmbeddingMatrix {
    rows: Vec<SparseVec>,
    dims: usize,
}

impl EmbeddingMatrix {
    pub fn new(rows: Vec<SparseVec>, dims: usize) -> Self {
        Self { rows, dims }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Vocabulary / embedding dimensionality.
    #[inline]
    pub fn dims(&self) -> usize {
        self.dims
    }

    #[inline]
    pub fn row(&self, i: usize) -> &SparseVec {
        &self.rows[i]
    }

    /// Cosine similarity between rows `i` and `j`, clamped to [-1, 1].
    ///
    /// Rows are unit length, so the dot product suffices; the clamp only
    /// absorbs floating-point drift. Zero rows yield 0.
    #[inline]
    pub fn cosine(&self, i: usize, j: usize) -> f32 {
        self.rows[i].dot(&self.rows[j]).clamp(-1.0, 1.0)
    }

    /// Cosine distance `1 - cosine`, as used by the silhouette metric.
    #[inline]
    pub fn cosine_distance(&self, i: usize, j: usize) -> f32 {
        1.0 - self.cosine(i, j)
    }
}

// ============================================================================
// BACKEND CAPABILITY
// ============================================================================

/// Capability: embed token sequences into L2-normalized row vectors.
///
/// Implementations must be pure with respect to their input: the same
/// documents always produce the same matrix (the engine's determinism
/// guarantee depends on it).
pub trait EmbeddingBackend: Send + Sync {
    /// Backend name for logs and reports.
    fn name(&self) -> &'static str;

    /// Embed one document per input token sequence.
    ///
    /// # Errors
    ///
    /// [`EmbeddingError::DegenerateVocabulary`] when no usable tokens
    /// exist across the corpus.
    fn embed(&self, documents: &[Vec<String>]) -> Result<EmbeddingMatrix, EmbeddingError>;
}
