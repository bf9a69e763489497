//! End-to-end retrieval pipeline
//!
//! Ties the components together: chunk, embed, write both indexes on the
//! ingestion side; embed, fuse, rerank on the query side. Implements the
//! [`Retriever`] trait the generation collaborator consumes.
//!
//! Indexing is all-or-nothing per call: every chunk is embedded before either
//! index is touched, so an embedding failure leaves both indexes as they were.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bid_rag_config::Settings;
use bid_rag_core::{
    sanitize_metadata, RerankMode, RetrievalResult, Retriever, RetrieveOptions, SearchCandidate,
};

use crate::chunker::{Chunk, ChunkerConfig, TextChunker};
use crate::embeddings::{EmbeddedCorpus, EmbeddingClient, EmbeddingClientConfig, EmbeddingModel};
use crate::lexical::{LexicalConfig, LexicalIndex};
use crate::reranker::{Reranker, RerankerConfig};
use crate::retriever::{FusionConfig, HybridRetriever};
use crate::vector_store::{VectorStore, VectorStoreConfig};
use crate::RetrievalError;

/// Default query behavior, overridable per call
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub top_k: usize,
    pub use_hybrid: bool,
    pub rerank_mode: RerankMode,
    /// Candidate pool fetched before reranking, per requested result
    pub pool_multiplier: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            use_hybrid: true,
            rerank_mode: RerankMode::Mmr,
            pool_multiplier: 2,
        }
    }
}

impl From<&Settings> for PipelineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            top_k: settings.retrieval.top_k,
            use_hybrid: settings.retrieval.use_hybrid,
            rerank_mode: settings.retrieval.rerank_mode,
            pool_multiplier: 2,
        }
    }
}

/// One document handed to the indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    /// Stable document identifier
    pub doc_id: String,
    /// Normalized full text
    pub text: String,
    /// Raw metadata; sanitized before storage
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Summary of one indexing call
#[derive(Debug, Clone)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
    /// Model the vectors came from
    pub model: String,
}

/// The assembled pipeline
pub struct RetrievalPipeline {
    chunker: TextChunker,
    embedder: EmbeddingClient,
    store: Arc<VectorStore>,
    lexical: Arc<LexicalIndex>,
    retriever: HybridRetriever,
    reranker: Reranker,
    config: PipelineConfig,
}

impl RetrievalPipeline {
    /// Build the pipeline with HTTP embedding backends from settings
    pub fn new(settings: &Settings) -> Result<Self, RetrievalError> {
        let embedder = EmbeddingClient::from_settings(&settings.embedding)?;
        Self::assemble(settings, embedder)
    }

    /// Build the pipeline with caller-supplied embedding backends
    pub fn with_models(
        settings: &Settings,
        models: Vec<Arc<dyn EmbeddingModel>>,
    ) -> Result<Self, RetrievalError> {
        let embedder =
            EmbeddingClient::new(models, EmbeddingClientConfig::from(&settings.embedding))?;
        Self::assemble(settings, embedder)
    }

    fn assemble(settings: &Settings, embedder: EmbeddingClient) -> Result<Self, RetrievalError> {
        let mut store_config = VectorStoreConfig::from(&settings.store);
        store_config.vector_dim = Some(settings.embedding.vector_dim);
        let store = Arc::new(VectorStore::open(store_config)?);

        let lexical = Arc::new(LexicalIndex::new(LexicalConfig {
            index_path: settings
                .store
                .data_dir
                .as_ref()
                .map(|dir| dir.join(format!("{}_lexical", settings.store.collection))),
            language: settings.retrieval.language.clone(),
        })?);

        let retriever = HybridRetriever::new(
            Arc::clone(&store),
            Arc::clone(&lexical),
            FusionConfig::from(&settings.retrieval),
        );

        Ok(Self {
            chunker: TextChunker::new(ChunkerConfig::from(&settings.chunking)),
            embedder,
            store,
            lexical,
            retriever,
            reranker: Reranker::new(RerankerConfig::from(&settings.retrieval)),
            config: PipelineConfig::from(settings),
        })
    }

    /// Chunk, embed, and index a batch of documents.
    ///
    /// Re-indexing a document replaces all of its previous chunks. The first
    /// build pins the collection to whichever model carried it; later calls
    /// embed with that model only.
    pub async fn index_documents(
        &self,
        documents: &[DocumentInput],
    ) -> Result<IndexReport, RetrievalError> {
        if documents.is_empty() {
            return Err(RetrievalError::InvalidInput(
                "no documents to index".to_string(),
            ));
        }

        let mut chunks: Vec<Chunk> = Vec::new();
        for document in documents {
            if document.doc_id.trim().is_empty() {
                return Err(RetrievalError::InvalidInput(
                    "document has an empty doc_id".to_string(),
                ));
            }
            let metadata = sanitize_metadata(&document.metadata);
            chunks.extend(
                self.chunker
                    .chunk(&document.text, &document.doc_id, &metadata)?,
            );
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let corpus = self.embed_chunks(&texts).await?;

        // Both indexes mutate only after every vector exists.
        for document in documents {
            self.store.remove_document(&document.doc_id)?;
            self.lexical.remove_document(&document.doc_id)?;
        }
        self.store.upsert(&chunks, &corpus)?;
        if let Err(err) = self.lexical.index_chunks(&chunks) {
            // A lexical failure here would leave the chunks reachable by
            // vector search only; pull them back out of the store so both
            // indexes stay in step.
            for document in documents {
                if let Err(rollback) = self.store.remove_document(&document.doc_id) {
                    tracing::warn!(
                        doc_id = %document.doc_id,
                        error = %rollback,
                        "Failed to roll back vector store after lexical indexing error"
                    );
                }
            }
            return Err(err);
        }

        tracing::info!(
            documents = documents.len(),
            chunks = chunks.len(),
            model = %corpus.model,
            "Documents indexed"
        );

        Ok(IndexReport {
            documents: documents.len(),
            chunks: chunks.len(),
            model: corpus.model,
        })
    }

    async fn embed_chunks(&self, texts: &[String]) -> Result<EmbeddedCorpus, RetrievalError> {
        match self.store.model() {
            Some(pinned) => self.embedder.embed_corpus_with(texts, &pinned).await,
            None => self.embedder.embed_corpus(texts).await,
        }
    }

    /// Run a search; the trait implementation delegates here
    pub async fn search(
        &self,
        query: &str,
        options: RetrieveOptions,
    ) -> Result<RetrievalResult, RetrievalError> {
        let started = Instant::now();

        let query = normalize_query(query)?;

        let model = self.store.model().ok_or(RetrievalError::EmptyCorpus)?;

        let top_k = options.top_k.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Err(RetrievalError::InvalidInput("top_k is zero".to_string()));
        }
        let use_hybrid = options.use_hybrid.unwrap_or(self.config.use_hybrid);
        let rerank_mode = options.rerank_mode.unwrap_or(self.config.rerank_mode);
        let filter = options.filter.unwrap_or_default();

        let query_vector = self.embedder.embed_query(&query, &model).await?;

        // Over-fetch so the reranker has something to choose from.
        let pool_k = top_k * self.config.pool_multiplier.max(1);
        let pool: Vec<SearchCandidate> = if use_hybrid {
            self.retriever
                .search_hybrid(&query, &query_vector, pool_k, &filter)?
        } else {
            self.retriever.search_vector(&query_vector, pool_k, &filter)?
        };

        let total_found = pool.len();
        let candidates = self.reranker.rerank(&query, pool, rerank_mode, top_k);

        let result = RetrievalResult {
            query,
            candidates,
            total_found,
            search_time: started.elapsed(),
        };

        tracing::debug!(
            query = %result.query,
            returned = result.candidates.len(),
            total_found,
            elapsed_ms = result.search_time.as_millis() as u64,
            "Search completed"
        );

        Ok(result)
    }

    /// Remove one document from both indexes
    pub fn remove_document(&self, doc_id: &str) -> Result<usize, RetrievalError> {
        let removed = self.store.remove_document(doc_id)?;
        self.lexical.remove_document(doc_id)?;
        Ok(removed)
    }

    /// Drop everything, including the model pin
    pub fn reset(&self) -> Result<(), RetrievalError> {
        self.store.reset()?;
        self.lexical.reset()
    }

    /// Number of chunks in the vector store
    pub fn chunk_count(&self) -> usize {
        self.store.len()
    }

    /// Model the collection is pinned to, if anything is indexed
    pub fn active_model(&self) -> Option<String> {
        self.store.model()
    }
}

#[async_trait]
impl Retriever for RetrievalPipeline {
    async fn retrieve(
        &self,
        query: &str,
        options: RetrieveOptions,
    ) -> Result<RetrievalResult, bid_rag_core::Error> {
        self.search(query, options).await.map_err(Into::into)
    }
}

/// Trim and collapse runs of whitespace
fn normalize_query(query: &str) -> Result<String, RetrievalError> {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return Err(RetrievalError::InvalidInput("query is empty".to_string()));
    }
    Ok(normalized)
}
