//! # Errors
//!
//! A single error type for the memory engine. The variants mirror the failure
//! kinds the engine distinguishes when deciding whether to propagate or degrade:
//!
//! - [`MemoryError::DimensionMismatch`]: the embedder and a persisted index disagree.
//!   Fatal at startup; delete the index files and let the rebuild recreate them.
//! - Storage kinds ([`MemoryError::StorageUnavailable`], database, I/O, codec errors):
//!   propagated on the save path, degraded to empty evidence on the retrieval path.
//! - [`MemoryError::EmbeddingFailure`]: the provider could not embed a text.
//! - [`MemoryError::NotFound`]: an unknown session was addressed directly.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("embedding failure: {0}")]
    EmbeddingFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("database connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("index encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("index decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

impl MemoryError {
    /// True for failures of the log, the index files, or their codecs.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            MemoryError::StorageUnavailable(_)
                | MemoryError::Database(_)
                | MemoryError::Connection(_)
                | MemoryError::Io(_)
                | MemoryError::Encode(_)
                | MemoryError::Decode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
