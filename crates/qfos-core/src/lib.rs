//! QFOS Core Library
//!
//! Query Fan-Out Session detection and window optimization: groups
//! bot-originated HTTP requests into sessions that approximate a single
//! upstream user query, refines those sessions with semantic analysis of
//! request URLs, and searches for the gap threshold that maximizes a
//! composite quality score over the dataset.
//!
//! # Architecture
//!
//! This crate defines:
//! - Domain types ([`types::Request`], [`types::Session`], provider and
//!   category labels)
//! - The URL tokenizer and TF-IDF embedder with pluggable dense backends
//! - The temporal bundler (partition-then-gap grouping)
//! - Bundle metrics (MIBCS, BPS, silhouette, degeneracy rates)
//! - The session refiner (collision detection and graph splitting)
//! - The window optimizer (candidate sweep, temporal cross-validation,
//!   confidence-rated recommendation)
//! - Collaborator traits ([`traits::RequestSource`],
//!   [`traits::SessionSink`]) with in-memory stubs
//!
//! # Example
//!
//! ```
//! use qfos_core::config::OptimizerConfig;
//! use qfos_core::optimizer::WindowOptimizer;
//!
//! let optimizer = WindowOptimizer::new(OptimizerConfig::default()).unwrap();
//! let outcome = optimizer.optimize(&[]).unwrap();
//! // An empty corpus evaluates every candidate but recommends nothing.
//! assert!(outcome.report.recommendation.is_none());
//! ```
//!
//! # Determinism
//!
//! Given the same input, configuration, and seed, reports and emitted
//! sessions are bit-identical: sampler seeds derive from the master seed
//! and evaluation coordinates, vocabularies order deterministically, and
//! the parallel sweep aggregates in task order.

pub mod bundler;
pub mod classify;
pub mod config;
pub mod deltas;
pub mod embedding;
pub mod error;
pub mod metrics;
pub mod optimizer;
pub mod refiner;
pub mod report;
pub mod sampling;
pub mod stubs;
pub mod tokenize;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use config::{OptScoreWeights, OptimizerConfig};
pub use error::{EngineError, EvaluationWarning, Result};
pub use optimizer::{CancellationToken, OptimizationOutcome, WindowOptimizer};
pub use report::OptimizationReport;
pub use types::{Provider, Request, Session};
