//! Retrieval contract shared with collaborators
//!
//! The generation side consumes `RetrievalResult` and never sees the
//! individual indexes; the ingestion side only supplies normalized text and
//! a metadata map. These types are the whole surface between them.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::metadata::MetadataValue;

/// Which index produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    /// BM25 keyword match
    Lexical,
    /// Dense vector similarity
    Vector,
    /// Present in both lists, scores combined
    Fused,
}

/// One retrieved chunk with its score and provenance.
///
/// Scores are only comparable within a single retrieval method; the fused
/// score is a weighted sum of per-list min-max normalized scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchCandidate {
    /// Chunk ID (`{doc_id}_{chunk_index}`)
    pub chunk_id: String,
    /// Owning document
    pub doc_id: String,
    /// Chunk text
    pub text: String,
    /// Score under `source` semantics
    pub score: f32,
    /// Index that produced the candidate
    pub source: SearchSource,
    /// Metadata copied from the chunk, for filtering and display
    pub metadata: BTreeMap<String, MetadataValue>,
    /// Embedding carried from the vector store, used by MMR reranking
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vector: Option<Vec<f32>>,
    /// 0-based rank in the vector similarity list, used for tie-breaking
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vector_rank: Option<usize>,
}

/// Final ranked output of one retrieval call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Normalized query the search actually ran with
    pub query: String,
    /// Ranked candidates, at most the requested top-K
    pub candidates: Vec<SearchCandidate>,
    /// Number of candidates returned
    pub total_found: usize,
    /// Wall-clock search time
    pub search_time: Duration,
}

/// Reranking strategy applied after fusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RerankMode {
    /// Maximal Marginal Relevance: trade relevance against redundancy
    #[default]
    Mmr,
    /// Pairwise (query, text) relevance scoring
    CrossEncoder,
    /// Pass-through truncation (fast mode)
    None,
}

/// Exact-match conjunction over metadata keys.
///
/// A candidate matches when every filter key is present in its metadata with
/// an equal value. List-valued source fields were flattened to strings at
/// write time, so they cannot be filtered element-wise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, MetadataValue>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exact-match condition.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    /// Restrict results to one document.
    pub fn doc_id(self, doc_id: impl Into<String>) -> Self {
        self.with("doc_id", doc_id.into())
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &BTreeMap<String, MetadataValue> {
        &self.conditions
    }

    /// True when the metadata satisfies every condition.
    pub fn matches(&self, metadata: &BTreeMap<String, MetadataValue>) -> bool {
        self.conditions
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

/// Per-call overrides for `Retriever::retrieve`; unset fields fall back to
/// the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub top_k: Option<usize>,
    pub use_hybrid: Option<bool>,
    pub rerank_mode: Option<RerankMode>,
    pub filter: Option<MetadataFilter>,
}

impl RetrieveOptions {
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn use_hybrid(mut self, use_hybrid: bool) -> Self {
        self.use_hybrid = Some(use_hybrid);
        self
    }

    pub fn rerank_mode(mut self, mode: RerankMode) -> Self {
        self.rerank_mode = Some(mode);
        self
    }

    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Retrieval seam handed to the generation collaborator
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve relevant chunks for a query.
    async fn retrieve(
        &self,
        query: &str,
        options: RetrieveOptions,
    ) -> Result<RetrievalResult, Error>;
}
