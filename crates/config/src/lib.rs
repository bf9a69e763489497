//! Configuration management for the bid/RFP retrieval pipeline
//!
//! Supports loading configuration from:
//! - YAML/TOML files (`config/default`, then `config/{env}`)
//! - Environment variables (`BID_RAG_` prefix, `__` separator)
//!
//! Every section carries serde defaults, so an empty config file is a valid
//! starting point; `Settings::validate()` rejects out-of-range values before
//! the pipeline is constructed.

pub mod settings;

pub use settings::{
    load_settings, ChunkingConfig, EmbeddingSettings, RetrievalSettings, RuntimeEnvironment,
    Settings, StoreSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for bid_rag_core::Error {
    fn from(err: ConfigError) -> Self {
        bid_rag_core::Error::Config(err.to_string())
    }
}
