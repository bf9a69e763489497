//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use bid_rag_core::RerankMode;

use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Document chunking configuration
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Embedding configuration
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Vector store configuration
    #[serde(default)]
    pub store: StoreSettings,

    /// Search and reranking configuration
    #[serde(default)]
    pub retrieval: RetrievalSettings,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Window size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive windows, in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Final windows adding fewer than this many new characters are merged
    /// into the previous chunk
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_min_chunk_size() -> usize {
    100
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Embedding API endpoint
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Models to try, in order of preference; a build falls back down this
    /// list when a model keeps failing
    #[serde(default = "default_model_preference")]
    pub model_preference: Vec<String>,

    /// Embedding dimension of the active collection
    #[serde(default = "default_vector_dim")]
    pub vector_dim: usize,

    /// Texts per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retries per batch before falling back to the next model
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Base backoff delay in milliseconds (doubles per attempt)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Concurrently dispatched batches after the first batch pins the model
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_embedding_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_model_preference() -> Vec<String> {
    vec![
        "text-embedding-3-large".to_string(),
        "text-embedding-3-small".to_string(),
    ]
}
fn default_vector_dim() -> usize {
    1024
}
fn default_batch_size() -> usize {
    100
}
fn default_max_retries() -> usize {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_concurrency() -> usize {
    4
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            model_preference: default_model_preference(),
            vector_dim: default_vector_dim(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            concurrency: default_concurrency(),
        }
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Directory holding persisted collections; in-memory when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Collection name; one collection per embedding-model configuration
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    "bid_documents".to_string()
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            collection: default_collection(),
        }
    }
}

/// Search and reranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Final number of results per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Fuse lexical and vector results; false = vector-only
    #[serde(default = "default_true")]
    pub use_hybrid: bool,

    /// Weight of the vector list in fusion; the lexical list gets the rest
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    /// Reranking strategy applied to the fused pool
    #[serde(default)]
    pub rerank_mode: RerankMode,

    /// MMR relevance/diversity balance (1.0 = pure relevance)
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,

    /// Language for lexical analysis ("ko" uses character n-grams)
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_top_k() -> usize {
    10
}
fn default_vector_weight() -> f32 {
    0.5
}
fn default_mmr_lambda() -> f32 {
    0.5
}
fn default_language() -> String {
    "ko".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            use_hybrid: default_true(),
            vector_weight: default_vector_weight(),
            rerank_mode: RerankMode::default(),
            mmr_lambda: default_mmr_lambda(),
            language: default_language(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_chunking()?;
        self.validate_embedding()?;
        self.validate_retrieval()?;
        Ok(())
    }

    fn validate_chunking(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;

        if chunking.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "chunking.chunk_size".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        // The window would never advance otherwise.
        if chunking.chunk_size <= chunking.chunk_overlap {
            return Err(ConfigError::InvalidValue {
                field: "chunking.chunk_overlap".to_string(),
                message: format!(
                    "Overlap {} must be smaller than chunk size {}",
                    chunking.chunk_overlap, chunking.chunk_size
                ),
            });
        }

        Ok(())
    }

    fn validate_embedding(&self) -> Result<(), ConfigError> {
        let embedding = &self.embedding;

        if embedding.model_preference.is_empty() {
            return Err(ConfigError::MissingField(
                "embedding.model_preference".to_string(),
            ));
        }

        if embedding.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.batch_size".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        if embedding.vector_dim == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.vector_dim".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        if embedding.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.concurrency".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let retrieval = &self.retrieval;

        if retrieval.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.top_k".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&retrieval.vector_weight) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.vector_weight".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", retrieval.vector_weight),
            });
        }

        if !(0.0..=1.0).contains(&retrieval.mmr_lambda) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.mmr_lambda".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", retrieval.mmr_lambda),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (`BID_RAG_` prefix)
/// 2. config/{env}.yaml (if env specified)
/// 3. config/default.yaml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("BID_RAG")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    tracing::debug!(
        environment = ?settings.environment,
        collection = %settings.store.collection,
        "Settings loaded"
    );

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.chunking.chunk_size, 1000);
        assert_eq!(settings.chunking.chunk_overlap, 200);
        assert_eq!(settings.retrieval.top_k, 10);
        assert!(settings.retrieval.use_hybrid);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk_size() {
        let mut settings = Settings::default();
        settings.chunking.chunk_overlap = settings.chunking.chunk_size;
        assert!(settings.validate().is_err());

        settings.chunking.chunk_overlap = settings.chunking.chunk_size - 1;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_vector_weight_bounds() {
        let mut settings = Settings::default();

        settings.retrieval.vector_weight = 0.7;
        assert!(settings.validate().is_ok());

        settings.retrieval.vector_weight = 1.5;
        assert!(settings.validate().is_err());

        settings.retrieval.vector_weight = -0.1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_mmr_lambda_bounds() {
        let mut settings = Settings::default();
        settings.retrieval.mmr_lambda = 1.1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_model_preference_rejected() {
        let mut settings = Settings::default();
        settings.embedding.model_preference.clear();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut settings = Settings::default();
        settings.embedding.batch_size = 0;
        assert!(settings.validate().is_err());
    }
}
