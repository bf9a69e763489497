//! Workspace-level error type
//!
//! Crate-specific errors (retrieval, config) convert into this type at the
//! boundaries where components hand results to collaborators.

use thiserror::Error;

/// Top-level error for the bid/RFP pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Workspace result alias
pub type Result<T> = std::result::Result<T, Error>;
