//! Core types and traits for the bid/RFP retrieval pipeline
//!
//! This crate provides the foundational types shared across the workspace:
//! - Scalar metadata values and the boundary sanitization rules
//! - Search candidate / retrieval result types handed to the generation side
//! - The `Retriever` trait seam for pluggable retrieval backends
//! - Error types

pub mod error;
pub mod metadata;
pub mod traits;

pub use error::{Error, Result};
pub use metadata::{sanitize_metadata, MetadataValue};
pub use traits::{
    MetadataFilter, RerankMode, RetrievalResult, Retriever, RetrieveOptions, SearchCandidate,
    SearchSource,
};
