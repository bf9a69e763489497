//! Hybrid retriever
//!
//! Combines dense and lexical search into one ranked list. BM25 scores and
//! cosine similarities live on different scales, so each leg is min-max
//! normalized to [0, 1] before the weighted sum. Candidates found by only one
//! leg keep their normalized score weighted by that leg alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use bid_rag_config::RetrievalSettings;
use bid_rag_core::{MetadataFilter, SearchCandidate, SearchSource};

use crate::lexical::LexicalIndex;
use crate::vector_store::VectorStore;
use crate::RetrievalError;

/// Fusion configuration
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Weight of the vector leg; the lexical leg gets `1 - vector_weight`
    pub vector_weight: f32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { vector_weight: 0.5 }
    }
}

impl From<&RetrievalSettings> for FusionConfig {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            vector_weight: settings.vector_weight,
        }
    }
}

/// Dense plus lexical retrieval with score fusion
pub struct HybridRetriever {
    store: Arc<VectorStore>,
    lexical: Arc<LexicalIndex>,
    config: FusionConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<VectorStore>,
        lexical: Arc<LexicalIndex>,
        config: FusionConfig,
    ) -> Self {
        Self {
            store,
            lexical,
            config,
        }
    }

    /// Dense-only search
    pub fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchCandidate>, RetrievalError> {
        self.store.query(query_vector, top_k, filter)
    }

    /// Hybrid search: both legs fetch `top_k` candidates each, then weighted
    /// min-max fusion; callers over-fetch when a reranker follows
    pub fn search_hybrid(
        &self,
        query: &str,
        query_vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchCandidate>, RetrievalError> {
        let vector_results = self.store.query(query_vector, top_k, filter)?;
        let lexical_results = self.lexical.search(query, top_k, filter)?;

        tracing::debug!(
            vector = vector_results.len(),
            lexical = lexical_results.len(),
            "Fusing candidate pools"
        );

        Ok(fuse(
            vector_results,
            lexical_results,
            top_k,
            self.config.vector_weight,
        ))
    }
}

/// Weighted min-max fusion of two candidate lists.
///
/// Each list is normalized independently; a degenerate list where every score
/// is equal normalizes to all ones, treating its members as equally good
/// rather than worthless. Ties in the fused score break by the candidate's
/// rank in the dense list, then by chunk id for determinism.
fn fuse(
    vector_results: Vec<SearchCandidate>,
    lexical_results: Vec<SearchCandidate>,
    top_k: usize,
    vector_weight: f32,
) -> Vec<SearchCandidate> {
    let vector_norms = normalize(&vector_results);
    let lexical_norms = normalize(&lexical_results);
    let lexical_weight = 1.0 - vector_weight;

    let mut fused: BTreeMap<String, SearchCandidate> = BTreeMap::new();

    for (mut candidate, norm) in vector_results.into_iter().zip(vector_norms) {
        candidate.score = vector_weight * norm;
        candidate.source = SearchSource::Fused;
        fused.insert(candidate.chunk_id.clone(), candidate);
    }

    for (candidate, norm) in lexical_results.into_iter().zip(lexical_norms) {
        let contribution = lexical_weight * norm;
        match fused.get_mut(&candidate.chunk_id) {
            Some(existing) => existing.score += contribution,
            None => {
                let mut candidate = candidate;
                candidate.score = contribution;
                candidate.source = SearchSource::Fused;
                fused.insert(candidate.chunk_id.clone(), candidate);
            }
        }
    }

    let mut results: Vec<SearchCandidate> = fused.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| match (a.vector_rank, b.vector_rank) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(top_k);
    results
}

/// Min-max normalization to [0, 1]; zero-range lists map to all ones
fn normalize(candidates: &[SearchCandidate]) -> Vec<f32> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let min = candidates
        .iter()
        .map(|c| c.score)
        .fold(f32::INFINITY, f32::min);
    let max = candidates
        .iter()
        .map(|c| c.score)
        .fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    candidates
        .iter()
        .map(|c| {
            if range > 0.0 {
                (c.score - min) / range
            } else {
                1.0
            }
        })
        .collect()
}
