//! Retrieval and indexing pipeline for bid/RFP documents
//!
//! Features:
//! - Fixed-size overlapping chunking with position metadata
//! - Embedding with ordered model fallback and bounded retries
//! - Embedded persistent vector store with metadata filtering
//! - Sparse BM25 search via Tantivy
//! - Hybrid fusion with per-list min-max normalization
//! - MMR and cross-encoder style reranking
//! - Core `Retriever` trait implementation
//!
//! Write path: text -> [`chunker::TextChunker`] -> [`embeddings::EmbeddingClient`]
//! -> [`vector_store::VectorStore`] + [`lexical::LexicalIndex`].
//! Query path: [`pipeline::RetrievalPipeline::retrieve`].

pub mod chunker;
pub mod embeddings;
pub mod lexical;
pub mod pipeline;
pub mod reranker;
pub mod retriever;
pub mod vector_store;

pub use chunker::{Chunk, ChunkerConfig, TextChunker};
pub use embeddings::{
    EmbedError, EmbeddedCorpus, EmbeddingClient, EmbeddingClientConfig, EmbeddingModel,
    HashEmbeddingModel, HttpEmbeddingConfig, HttpEmbeddingModel,
};
pub use lexical::{LexicalConfig, LexicalIndex};
pub use pipeline::{DocumentInput, IndexReport, PipelineConfig, RetrievalPipeline};
pub use reranker::{PairwiseScorer, Reranker, RerankerConfig, SimpleScorer};
pub use retriever::{FusionConfig, HybridRetriever};
pub use vector_store::{VectorStore, VectorStoreConfig};

// Re-export the shared contract types for convenience.
pub use bid_rag_core::{
    MetadataFilter, MetadataValue, RerankMode, RetrievalResult, Retriever, RetrieveOptions,
    SearchCandidate, SearchSource,
};

use thiserror::Error;

/// Retrieval errors
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Caller contract violation (empty text, bad config); never retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Every model in the preference list failed; fatal for the build.
    #[error("Embedding unavailable, models tried: {}", tried.join(", "))]
    EmbeddingUnavailable { tried: Vec<String> },

    /// Query issued before anything was indexed. A query that merely matches
    /// nothing returns an empty result instead.
    #[error("Empty corpus: no documents have been indexed")]
    EmptyCorpus,

    /// A query result failed its own filter. Always a defect.
    #[error("Filter violation: {0}")]
    FilterViolation(String),

    #[error("Vector store error: {0}")]
    Store(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Search error: {0}")]
    Search(String),
}

impl From<RetrievalError> for bid_rag_core::Error {
    fn from(err: RetrievalError) -> Self {
        bid_rag_core::Error::Retrieval(err.to_string())
    }
}
