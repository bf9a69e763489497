//! Embedding generation with ordered model fallback
//!
//! A corpus build tries each configured model in preference order. Batches are
//! retried with exponential backoff; when a batch exhausts its retries the
//! whole build restarts on the next model, so a collection never mixes vectors
//! from two models. Queries embed with the model the collection was built
//! with and never fall back.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use bid_rag_config::EmbeddingSettings;

use crate::RetrievalError;

/// Failure of a single embedding call; retried and, eventually, cause for
/// model fallback.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("Embedding request failed: {0}")]
    Request(String),

    #[error("Embedding API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed embedding response: {0}")]
    Malformed(String),
}

/// An embedding backend identified by model name
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Model identifier, persisted with the collection
    fn name(&self) -> &str;

    /// Output dimension
    fn dim(&self) -> usize;

    /// Embed a batch of texts, one vector per text, in order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;
}

/// HTTP embedding backend configuration
#[derive(Debug, Clone)]
pub struct HttpEmbeddingConfig {
    /// API endpoint
    pub endpoint: String,
    /// Model name sent with each request
    pub model: String,
    /// Embedding dimension
    pub dim: usize,
    /// Per-request timeout
    pub request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding backend over an HTTP batch API
pub struct HttpEmbeddingModel {
    client: Client,
    config: HttpEmbeddingConfig,
}

impl HttpEmbeddingModel {
    pub fn new(config: HttpEmbeddingConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RetrievalError::InvalidInput(format!("HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl EmbeddingModel for HttpEmbeddingModel {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn dim(&self) -> usize {
        self.config.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let request = EmbedRequest {
            model: &self.config.model,
            input: texts,
        };

        let url = format!("{}/api/embed", self.config.endpoint);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbedError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Api { status, body });
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::Malformed(e.to_string()))?;

        let embeddings = embed_response.embeddings;
        if embeddings.len() != texts.len() {
            return Err(EmbedError::Malformed(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        for vector in &embeddings {
            if vector.len() != self.config.dim {
                return Err(EmbedError::Malformed(format!(
                    "Expected dimension {}, got {}",
                    self.config.dim,
                    vector.len()
                )));
            }
        }

        Ok(embeddings)
    }
}

/// Deterministic hash-based backend for tests and offline runs
///
/// Character positions are folded into a fixed-size histogram and normalized
/// to unit length. Not semantically meaningful, but stable and dimension-safe.
pub struct HashEmbeddingModel {
    name: String,
    dim: usize,
}

impl HashEmbeddingModel {
    pub fn new(name: impl Into<String>, dim: usize) -> Self {
        Self {
            name: name.into(),
            dim,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dim];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % self.dim;
            embedding[idx] += 1.0;
        }
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingModel for HashEmbeddingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Client-side batching and fallback policy
#[derive(Debug, Clone)]
pub struct EmbeddingClientConfig {
    /// Texts per request
    pub batch_size: usize,
    /// Retries per batch before advancing to the next model
    pub max_retries: usize,
    /// Base backoff delay; doubles per attempt
    pub retry_delay: Duration,
    /// Batches in flight after the first batch succeeds
    pub concurrency: usize,
}

impl Default for EmbeddingClientConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            concurrency: 4,
        }
    }
}

impl From<&EmbeddingSettings> for EmbeddingClientConfig {
    fn from(settings: &EmbeddingSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            max_retries: settings.max_retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            concurrency: settings.concurrency,
        }
    }
}

/// Result of a corpus build: all vectors come from one model
#[derive(Debug, Clone)]
pub struct EmbeddedCorpus {
    /// Model that produced every vector
    pub model: String,
    /// Dimension of every vector
    pub dim: usize,
    /// One vector per input text, in input order
    pub vectors: Vec<Vec<f32>>,
}

/// Embedding client with ordered model fallback
pub struct EmbeddingClient {
    models: Vec<Arc<dyn EmbeddingModel>>,
    config: EmbeddingClientConfig,
}

impl EmbeddingClient {
    pub fn new(
        models: Vec<Arc<dyn EmbeddingModel>>,
        config: EmbeddingClientConfig,
    ) -> Result<Self, RetrievalError> {
        if models.is_empty() {
            return Err(RetrievalError::InvalidInput(
                "model preference list is empty".to_string(),
            ));
        }
        if config.batch_size == 0 || config.concurrency == 0 {
            return Err(RetrievalError::InvalidInput(
                "batch_size and concurrency must be positive".to_string(),
            ));
        }
        Ok(Self { models, config })
    }

    /// Build HTTP backends for every model in the preference list
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self, RetrievalError> {
        let timeout = Duration::from_millis(settings.request_timeout_ms);
        let models = settings
            .model_preference
            .iter()
            .map(|model| {
                HttpEmbeddingModel::new(HttpEmbeddingConfig {
                    endpoint: settings.endpoint.clone(),
                    model: model.clone(),
                    dim: settings.vector_dim,
                    request_timeout: timeout,
                })
                .map(|m| Arc::new(m) as Arc<dyn EmbeddingModel>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(models, EmbeddingClientConfig::from(settings))
    }

    /// Embed an entire corpus with the first model that can carry it.
    ///
    /// A model that fails any batch past its retries is abandoned and the
    /// build restarts from scratch on the next model, discarding partial
    /// output. Returns [`RetrievalError::EmbeddingUnavailable`] once the
    /// preference list is exhausted.
    pub async fn embed_corpus(&self, texts: &[String]) -> Result<EmbeddedCorpus, RetrievalError> {
        if texts.is_empty() {
            return Err(RetrievalError::InvalidInput(
                "no texts to embed".to_string(),
            ));
        }

        let mut tried = Vec::new();
        for model in &self.models {
            match self.build_with_model(model.as_ref(), texts).await {
                Ok(vectors) => {
                    if !tried.is_empty() {
                        tracing::warn!(
                            model = model.name(),
                            skipped = ?tried,
                            "Corpus embedded with fallback model"
                        );
                    }
                    return Ok(EmbeddedCorpus {
                        model: model.name().to_string(),
                        dim: model.dim(),
                        vectors,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        model = model.name(),
                        error = %err,
                        "Embedding model failed, trying next"
                    );
                    tried.push(model.name().to_string());
                }
            }
        }

        Err(RetrievalError::EmbeddingUnavailable { tried })
    }

    /// Embed a corpus with one specific model, no fallback.
    ///
    /// Used for incremental writes into a collection already pinned to a
    /// model: falling back would mix vector spaces.
    pub async fn embed_corpus_with(
        &self,
        texts: &[String],
        model_name: &str,
    ) -> Result<EmbeddedCorpus, RetrievalError> {
        if texts.is_empty() {
            return Err(RetrievalError::InvalidInput(
                "no texts to embed".to_string(),
            ));
        }

        let model = self
            .models
            .iter()
            .find(|m| m.name() == model_name)
            .ok_or_else(|| {
                RetrievalError::InvalidInput(format!(
                    "collection is pinned to unconfigured model {}",
                    model_name
                ))
            })?;

        let vectors = self
            .build_with_model(model.as_ref(), texts)
            .await
            .map_err(|err| {
                tracing::warn!(model = model_name, error = %err, "Pinned model failed");
                RetrievalError::EmbeddingUnavailable {
                    tried: vec![model_name.to_string()],
                }
            })?;

        Ok(EmbeddedCorpus {
            model: model.name().to_string(),
            dim: model.dim(),
            vectors,
        })
    }

    /// Embed a query with the model the collection is pinned to.
    ///
    /// No fallback here: a query vector from a different model would be
    /// compared against incompatible document vectors.
    pub async fn embed_query(
        &self,
        text: &str,
        model_name: &str,
    ) -> Result<Vec<f32>, RetrievalError> {
        let model = self
            .models
            .iter()
            .find(|m| m.name() == model_name)
            .ok_or_else(|| {
                RetrievalError::InvalidInput(format!(
                    "collection is pinned to unconfigured model {}",
                    model_name
                ))
            })?;

        let batch = vec![text.to_string()];
        let mut vectors = self
            .embed_with_retry(model.as_ref(), &batch)
            .await
            .map_err(|_| RetrievalError::EmbeddingUnavailable {
                tried: vec![model_name.to_string()],
            })?;
        vectors
            .pop()
            .ok_or_else(|| RetrievalError::Search("empty embedding response".to_string()))
    }

    /// All batches through one model; first batch alone, the rest pipelined.
    async fn build_with_model(
        &self,
        model: &dyn EmbeddingModel,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut batches = texts.chunks(self.config.batch_size);

        // The first batch settles whether this model works at all before
        // concurrent batches start queueing against a dead backend.
        let mut vectors = match batches.next() {
            Some(first) => self.embed_with_retry(model, first).await?,
            None => return Ok(Vec::new()),
        };

        let remaining: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(|batch| self.embed_with_retry(model, batch))
            .buffered(self.config.concurrency)
            .try_collect()
            .await?;

        for batch in remaining {
            vectors.extend(batch);
        }
        Ok(vectors)
    }

    async fn embed_with_retry(
        &self,
        model: &dyn EmbeddingModel,
        batch: &[String],
    ) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_delay * 2u32.pow(attempt as u32 - 1);
                tokio::time::sleep(delay).await;
            }
            match model.embed_batch(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(err) => {
                    tracing::debug!(
                        model = model.name(),
                        attempt,
                        error = %err,
                        "Embedding batch failed"
                    );
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| EmbedError::Request("no attempts were made".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyModel {
        name: String,
        dim: usize,
        failures: AtomicUsize,
        inner: HashEmbeddingModel,
    }

    impl FlakyModel {
        fn failing_first(name: &str, dim: usize, failures: usize) -> Self {
            Self {
                name: name.to_string(),
                dim,
                failures: AtomicUsize::new(failures),
                inner: HashEmbeddingModel::new(name, dim),
            }
        }
    }

    #[async_trait]
    impl EmbeddingModel for FlakyModel {
        fn name(&self) -> &str {
            &self.name
        }
        fn dim(&self) -> usize {
            self.dim
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(EmbedError::Request("injected failure".to_string()));
            }
            self.inner.embed_batch(texts).await
        }
    }

    fn fast_config() -> EmbeddingClientConfig {
        EmbeddingClientConfig {
            batch_size: 2,
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            concurrency: 2,
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("입찰 공고 본문 {}", i)).collect()
    }

    #[test]
    fn test_hash_model_deterministic_and_normalized() {
        let model = HashEmbeddingModel::new("hash", 64);
        let a = model.embed_one("예산은 1억원");
        let b = model.embed_one("예산은 1억원");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_corpus_build_preserves_order() {
        let model = Arc::new(HashEmbeddingModel::new("hash", 32));
        let client = EmbeddingClient::new(vec![model.clone()], fast_config()).unwrap();

        let input = texts(7);
        let corpus = client.embed_corpus(&input).await.unwrap();

        assert_eq!(corpus.model, "hash");
        assert_eq!(corpus.dim, 32);
        assert_eq!(corpus.vectors.len(), 7);
        for (text, vector) in input.iter().zip(&corpus.vectors) {
            assert_eq!(vector, &model.embed_one(text));
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let model = Arc::new(FlakyModel::failing_first("flaky", 16, 2));
        let client = EmbeddingClient::new(vec![model], fast_config()).unwrap();

        let corpus = client.embed_corpus(&texts(3)).await.unwrap();
        assert_eq!(corpus.model, "flaky");
        assert_eq!(corpus.vectors.len(), 3);
    }

    #[tokio::test]
    async fn test_fallback_to_next_model() {
        let dead = Arc::new(FlakyModel::failing_first("dead", 16, usize::MAX));
        let backup = Arc::new(HashEmbeddingModel::new("backup", 16));
        let client = EmbeddingClient::new(vec![dead, backup], fast_config()).unwrap();

        let corpus = client.embed_corpus(&texts(5)).await.unwrap();
        assert_eq!(corpus.model, "backup");
        assert_eq!(corpus.vectors.len(), 5);
    }

    #[tokio::test]
    async fn test_all_models_exhausted() {
        let a = Arc::new(FlakyModel::failing_first("model-a", 16, usize::MAX));
        let b = Arc::new(FlakyModel::failing_first("model-b", 16, usize::MAX));
        let client = EmbeddingClient::new(vec![a, b], fast_config()).unwrap();

        let err = client.embed_corpus(&texts(2)).await.unwrap_err();
        match err {
            RetrievalError::EmbeddingUnavailable { tried } => {
                assert_eq!(tried, vec!["model-a".to_string(), "model-b".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_query_uses_pinned_model_only() {
        let primary = Arc::new(HashEmbeddingModel::new("primary", 16));
        let secondary = Arc::new(HashEmbeddingModel::new("secondary", 16));
        let client =
            EmbeddingClient::new(vec![primary, secondary.clone()], fast_config()).unwrap();

        let vector = client.embed_query("마감일", "secondary").await.unwrap();
        assert_eq!(vector, secondary.embed_one("마감일"));

        let err = client.embed_query("마감일", "unknown").await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_query_does_not_fall_back() {
        let dead = Arc::new(FlakyModel::failing_first("dead", 16, usize::MAX));
        let backup = Arc::new(HashEmbeddingModel::new("backup", 16));
        let client = EmbeddingClient::new(vec![dead, backup], fast_config()).unwrap();

        let err = client.embed_query("예산", "dead").await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::EmbeddingUnavailable { tried } if tried == vec!["dead".to_string()]
        ));
    }

    #[tokio::test]
    async fn test_empty_corpus_rejected() {
        let model = Arc::new(HashEmbeddingModel::new("hash", 16));
        let client = EmbeddingClient::new(vec![model], fast_config()).unwrap();
        let err = client.embed_corpus(&[]).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidInput(_)));
    }
}
