//! TF-IDF embedding backend.
//!
//! Vocabulary and document frequencies are computed over the documents of
//! a single call (one optimization pass), never shared across passes:
//! rebuilding is cheap and avoids cross-task state.
//!
//! `idf(t) = ln((1 + N) / (1 + df(t))) + 1` with raw term counts, matching
//! the smooth-idf formulation the production experiments were validated
//! against. Rows are L2-normalized by construction.

use std::collections::{BTreeMap, HashMap};

use super::{EmbeddingBackend, EmbeddingMatrix, SparseVec};
use crate::error::EmbeddingError;

/// Default TF-IDF backend. Stateless; vocabulary lives per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TfidfBackend;

impl TfidfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl EmbeddingBackend for TfidfBackend {
    fn name(&self) -> &'static str {
        "tfidf"
    }

    fn embed(&self, documents: &[Vec<String>]) -> Result<EmbeddingMatrix, EmbeddingError> {
        // BTreeMap gives a deterministic token -> column assignment
        // independent of document order hashing.
        let mut vocabulary: BTreeMap<&str, u32> = BTreeMap::new();
        let mut document_frequency: HashMap<&str, u32> = HashMap::new();

        for doc in documents {
            let mut seen: Vec<&str> = Vec::with_capacity(doc.len());
            for token in doc {
                if !seen.contains(&token.as_str()) {
                    seen.push(token);
                    *document_frequency.entry(token).or_insert(0) += 1;
                }
            }
        }
        for doc in documents {
            for token in doc {
                vocabulary.entry(token).or_insert(0);
            }
        }
        // Columns follow the sorted token order.
        for (column, slot) in vocabulary.values_mut().enumerate() {
            *slot = column as u32;
        }

        if vocabulary.is_empty() {
            return Err(EmbeddingError::DegenerateVocabulary);
        }

        let n_docs = documents.len() as f32;
        let idf: HashMap<&str, f32> = document_frequency
            .iter()
            .map(|(&token, &df)| {
                let idf = ((1.0 + n_docs) / (1.0 + df as f32)).ln() + 1.0;
                (token, idf)
            })
            .collect();

        let rows = documents
            .iter()
            .map(|doc| {
                if doc.is_empty() {
                    return SparseVec::zero();
                }
                let mut counts: HashMap<&str, f32> = HashMap::new();
                for token in doc {
                    *counts.entry(token).or_insert(0.0) += 1.0;
                }
                let pairs = counts
                    .into_iter()
                    .map(|(token, tf)| (vocabulary[token], tf * idf[token]))
                    .collect();
                SparseVec::from_pairs(pairs)
            })
            .collect();

        Ok(EmbeddingMatrix::new(rows, vocabulary.len()))
    }
}
