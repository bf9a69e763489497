//! Reranking of fused candidates
//!
//! Two strategies over the fused pool:
//! - MMR (maximal marginal relevance): trades relevance against similarity to
//!   already-selected results, so near-duplicate chunks of the same
//!   announcement don't crowd out the rest of the page.
//! - Cross-encoder style pairwise scoring behind the [`PairwiseScorer`] seam.
//!   The default [`SimpleScorer`] is a lexical stand-in; a model-backed scorer
//!   plugs in without touching the selection logic.

use std::collections::HashSet;
use std::sync::Arc;

use bid_rag_config::RetrievalSettings;
use bid_rag_core::{RerankMode, SearchCandidate};

/// Reranker configuration
#[derive(Debug, Clone)]
pub struct RerankerConfig {
    /// MMR balance: 1.0 is pure relevance, 0.0 is pure diversity
    pub mmr_lambda: f32,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self { mmr_lambda: 0.5 }
    }
}

impl From<&RetrievalSettings> for RerankerConfig {
    fn from(settings: &RetrievalSettings) -> Self {
        Self {
            mmr_lambda: settings.mmr_lambda,
        }
    }
}

/// Query-document relevance scorer, the cross-encoder seam
pub trait PairwiseScorer: Send + Sync {
    fn score(&self, query: &str, document: &str) -> f32;
}

/// Candidate reranker
pub struct Reranker {
    config: RerankerConfig,
    scorer: Arc<dyn PairwiseScorer>,
}

impl Reranker {
    pub fn new(config: RerankerConfig) -> Self {
        Self {
            config,
            scorer: Arc::new(SimpleScorer),
        }
    }

    /// Swap in a model-backed pairwise scorer
    pub fn with_scorer(mut self, scorer: Arc<dyn PairwiseScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Reorder candidates and cut to `top_k`
    pub fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchCandidate>,
        mode: RerankMode,
        top_k: usize,
    ) -> Vec<SearchCandidate> {
        let selected = match mode {
            RerankMode::None => {
                let mut candidates = candidates;
                candidates.truncate(top_k);
                candidates
            }
            RerankMode::Mmr => self.mmr_select(candidates, top_k),
            RerankMode::CrossEncoder => self.pairwise_select(query, candidates, top_k),
        };

        tracing::debug!(mode = ?mode, selected = selected.len(), "Candidates reranked");
        selected
    }

    /// Greedy MMR selection.
    ///
    /// Relevance is the fused score min-max normalized within the pool, so it
    /// shares the [0, 1] scale of the similarity penalty. Fused scores are
    /// left on the candidates; only the order changes.
    fn mmr_select(
        &self,
        mut pool: Vec<SearchCandidate>,
        top_k: usize,
    ) -> Vec<SearchCandidate> {
        if pool.len() <= 1 {
            pool.truncate(top_k);
            return pool;
        }

        let relevance = normalize_scores(&pool);
        let lambda = self.config.mmr_lambda;

        let mut remaining: Vec<(SearchCandidate, f32)> =
            pool.into_iter().zip(relevance).collect();
        let mut selected: Vec<SearchCandidate> = Vec::with_capacity(top_k.min(remaining.len()));

        while selected.len() < top_k && !remaining.is_empty() {
            let mut best_idx = 0;
            let mut best_score = f32::NEG_INFINITY;

            for (idx, (candidate, rel)) in remaining.iter().enumerate() {
                let max_sim = selected
                    .iter()
                    .map(|s| candidate_similarity(candidate, s))
                    .fold(0.0f32, f32::max);
                let mmr = lambda * rel - (1.0 - lambda) * max_sim;
                if mmr > best_score {
                    best_score = mmr;
                    best_idx = idx;
                }
            }

            let (candidate, _) = remaining.remove(best_idx);
            selected.push(candidate);
        }

        selected
    }

    /// Pairwise rescoring; the scorer's output replaces the fused score.
    /// The sort is stable, so ties keep their incoming fused order.
    fn pairwise_select(
        &self,
        query: &str,
        candidates: Vec<SearchCandidate>,
        top_k: usize,
    ) -> Vec<SearchCandidate> {
        let mut rescored: Vec<SearchCandidate> = candidates
            .into_iter()
            .map(|mut candidate| {
                candidate.score = self.scorer.score(query, &candidate.text);
                candidate
            })
            .collect();

        rescored.sort_by(|a, b| b.score.total_cmp(&a.score));
        rescored.truncate(top_k);
        rescored
    }
}

impl Default for Reranker {
    fn default() -> Self {
        Self::new(RerankerConfig::default())
    }
}

/// Min-max normalization; a zero-range pool maps to all ones
fn normalize_scores(candidates: &[SearchCandidate]) -> Vec<f32> {
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
        .map(|c| if range > 0.0 { (c.score - min) / range } else { 1.0 })
        .collect()
}

/// Similarity between two candidates: cosine when both carry vectors,
/// character-bigram Jaccard on the text otherwise
fn candidate_similarity(a: &SearchCandidate, b: &SearchCandidate) -> f32 {
    match (&a.vector, &b.vector) {
        (Some(va), Some(vb)) if va.len() == vb.len() => cosine(va, vb),
        _ => bigram_jaccard(&a.text, &b.text),
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Character bigrams match the lexical analyzer's view of Korean text
fn bigram_jaccard(a: &str, b: &str) -> f32 {
    let grams_a = bigrams(a);
    let grams_b = bigrams(b);
    if grams_a.is_empty() || grams_b.is_empty() {
        return 0.0;
    }
    let intersection = grams_a.intersection(&grams_b).count() as f32;
    let union = grams_a.union(&grams_b).count() as f32;
    intersection / union
}

fn bigrams(text: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Lexical relevance scorer with TF-IDF-like weighting
///
/// Stand-in for a model-backed cross-encoder. Korean particles attach to the
/// noun ("예산은"), so term frequency counts containment rather than token
/// equality.
pub struct SimpleScorer;

impl SimpleScorer {
    /// Korean particles and copulas plus a few English function words
    const STOPWORDS: &'static [&'static str] = &[
        // Korean
        "은", "는", "이", "가", "을", "를", "의", "에", "에서", "으로", "로", "와", "과", "및",
        "등", "또는", "그리고", "하는", "하여", "된", "될", "있는", "있습니다", "합니다",
        "입니다", "경우", "위한", "대한", "따라",
        // English
        "the", "a", "an", "is", "are", "was", "were", "be", "to", "of", "in", "for", "on",
        "with", "at", "by", "from", "and", "but", "or", "not", "this", "that",
    ];

    fn score_pair(query: &str, document: &str) -> f32 {
        let query_lower = query.to_lowercase();
        let doc_lower = document.to_lowercase();

        let stopwords: HashSet<&str> = Self::STOPWORDS.iter().copied().collect();

        let query_terms: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|w| w.chars().count() > 1 && !stopwords.contains(*w))
            .collect();

        if query_terms.is_empty() {
            return 0.0;
        }

        let doc_words: Vec<&str> = doc_lower.split_whitespace().collect();
        let doc_len = doc_words.len().max(1) as f32;

        let mut total_score = 0.0f32;
        let mut matched_terms = 0usize;

        for (pos, term) in query_terms.iter().enumerate() {
            // Containment, not equality: "예산" must hit "예산은".
            let tf = doc_words.iter().filter(|w| w.contains(*term)).count() as f32;

            if tf > 0.0 {
                matched_terms += 1;

                // sqrt for diminishing returns on repeated terms
                let tf_score = tf.sqrt();
                // Longer terms are more specific
                let idf_approx = (1.0 + term.chars().count() as f32).ln();
                // Earlier query terms matter slightly more
                let position_weight = 1.0 / (1.0 + pos as f32 * 0.1);
                let length_norm = 1.0 / (1.0 + (doc_len / 50.0).sqrt());

                total_score += tf_score * idf_approx * position_weight * length_norm;
            }
        }

        let coverage = matched_terms as f32 / query_terms.len() as f32;
        let raw_score = total_score + coverage * 0.3;

        // Squash into [0, 1)
        (raw_score / (raw_score + 1.0)).min(1.0)
    }
}

impl PairwiseScorer for SimpleScorer {
    fn score(&self, query: &str, document: &str) -> f32 {
        Self::score_pair(query, document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bid_rag_core::SearchSource;
    use std::collections::BTreeMap;

    fn candidate(chunk_id: &str, text: &str, score: f32, vector: Option<Vec<f32>>) -> SearchCandidate {
        SearchCandidate {
            chunk_id: chunk_id.to_string(),
            doc_id: chunk_id.to_string(),
            text: text.to_string(),
            score,
            source: SearchSource::Fused,
            metadata: BTreeMap::new(),
            vector,
            vector_rank: None,
        }
    }

    #[test]
    fn test_none_mode_truncates_only() {
        let pool = vec![
            candidate("a", "첫째", 0.9, None),
            candidate("b", "둘째", 0.8, None),
            candidate("c", "셋째", 0.7, None),
        ];
        let results = Reranker::default().rerank("질의", pool, RerankMode::None, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "a");
        assert_eq!(results[1].chunk_id, "b");
    }

    #[test]
    fn test_mmr_pure_relevance_keeps_order() {
        let reranker = Reranker::new(RerankerConfig { mmr_lambda: 1.0 });
        let pool = vec![
            candidate("a", "문서 가", 0.9, Some(vec![1.0, 0.0])),
            candidate("b", "문서 나", 0.8, Some(vec![1.0, 0.0])),
            candidate("c", "문서 다", 0.7, Some(vec![0.0, 1.0])),
        ];
        let results = reranker.rerank("질의", pool, RerankMode::Mmr, 3);
        let ids: Vec<&str> = results.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_mmr_promotes_diversity() {
        // "b" nearly duplicates "a"; with diversity weight on, the distinct
        // "c" should be selected before "b" despite its lower fused score.
        let reranker = Reranker::new(RerankerConfig { mmr_lambda: 0.5 });
        let pool = vec![
            candidate("a", "예산 안내", 1.0, Some(vec![1.0, 0.0])),
            candidate("b", "예산 안내 사본", 0.95, Some(vec![0.99, 0.05])),
            candidate("c", "마감일 안내", 0.6, Some(vec![0.0, 1.0])),
        ];
        let results = reranker.rerank("질의", pool, RerankMode::Mmr, 3);
        let ids: Vec<&str> = results.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids[0], "a");
        assert_eq!(ids[1], "c");
        assert_eq!(ids[2], "b");
    }

    #[test]
    fn test_mmr_text_fallback_without_vectors() {
        let reranker = Reranker::new(RerankerConfig { mmr_lambda: 0.5 });
        let pool = vec![
            candidate("a", "사업 예산은 1억원입니다", 1.0, None),
            candidate("b", "사업 예산은 1억원입니다만", 0.95, None),
            candidate("c", "납품 기한 안내", 0.6, None),
        ];
        let results = reranker.rerank("질의", pool, RerankMode::Mmr, 2);
        assert_eq!(results[0].chunk_id, "a");
        assert_eq!(results[1].chunk_id, "c");
    }

    #[test]
    fn test_cross_encoder_reorders_by_query_match() {
        let pool = vec![
            candidate("weak", "전혀 관련 없는 내용", 0.9, None),
            candidate("strong", "예산은 1억원이며 마감은 12월", 0.5, None),
        ];
        let results =
            Reranker::default().rerank("예산 마감", pool, RerankMode::CrossEncoder, 2);
        assert_eq!(results[0].chunk_id, "strong");
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn test_simple_scorer_korean_particles() {
        // The document says "예산은"; the query term "예산" must still count.
        let score = SimpleScorer::score_pair("예산 금액", "사업 예산은 총 1억원입니다");
        assert!(score > 0.0);

        let miss = SimpleScorer::score_pair("납품 기한", "전혀 관련 없는 문장");
        assert!(score > miss);
    }

    #[test]
    fn test_simple_scorer_stopword_only_query() {
        assert_eq!(SimpleScorer::score_pair("은 는 이 가", "아무 문서"), 0.0);
    }

    #[test]
    fn test_bigram_jaccard() {
        assert!(bigram_jaccard("예산 안내", "예산 안내") > 0.99);
        assert_eq!(bigram_jaccard("예산", "마감"), 0.0);
        let partial = bigram_jaccard("예산 안내문", "예산 공고문");
        assert!(partial > 0.0 && partial < 1.0);
    }

    #[test]
    fn test_mmr_empty_and_single() {
        let reranker = Reranker::default();
        assert!(reranker
            .rerank("질의", Vec::new(), RerankMode::Mmr, 5)
            .is_empty());

        let one = vec![candidate("only", "단일 청크", 0.5, None)];
        let results = reranker.rerank("질의", one, RerankMode::Mmr, 5);
        assert_eq!(results.len(), 1);
    }
}
