//! This module provides functionality for loading and handling the memory engine's configuration.
//!
//! It defines the `MemoryConfig` struct, which holds storage locations, retrieval
//! parameters and the embedding provider choice, and a `load_config` function to
//! load the configuration from a YAML file.
//!
//! Every field has a default, so a partial file (or an empty one) is valid.
//!
//! # Examples
//!
//! ```no_run
//! use hindsight::config::{MemoryConfig, load_config};
//!
//! let config: MemoryConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::*;

use crate::error::Result;

/// File name of the serialized vector index inside `storage.index_dir`.
pub const INDEX_FILE_NAME: &str = "history.index";
/// File name of the serialized id map inside `storage.index_dir`.
pub const MAP_FILE_NAME: &str = "history_map.yaml";

/// Represents the engine's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
pub struct MemoryConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Where the turn log and the index files live.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding `conversation_history` and `sessions`.
    pub history_db_path: PathBuf,

    /// Directory holding the vector index and id map files.
    pub index_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_db_path: PathBuf::from("./cache/conversation_history.db"),
            index_dir: PathBuf::from("./cache"),
        }
    }
}

impl StorageConfig {
    pub fn index_path(&self) -> PathBuf {
        self.index_dir.join(INDEX_FILE_NAME)
    }

    pub fn map_path(&self) -> PathBuf {
        self.index_dir.join(MAP_FILE_NAME)
    }
}

/// Hybrid retrieval knobs.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum number of distinct semantically matched turns.
    pub top_k: usize,

    /// Minimum cosine similarity for a semantic hit.
    pub similarity_threshold: f32,

    /// Number of most recent rows always included.
    pub recent_n: usize,

    /// Character budget of the assembled evidence.
    pub max_evidence_chars: usize,

    /// Candidates requested from the index per wanted turn, to absorb deduplication.
    pub overfetch: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.5,
            recent_n: 2,
            max_evidence_chars: 1200,
            overfetch: 5,
        }
    }
}

/// Which embedding provider to construct.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// all-MiniLM-L6-v2 through Candle.
    #[default]
    Minilm,
    /// Offline feature hashing.
    Hashing,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,

    /// Vector length. Only consulted by the `hashing` provider; MiniLM is fixed at 384.
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Minilm,
            dimension: 384,
        }
    }
}

/// Loads the engine's configuration from a YAML file.
///
/// # Returns
///
/// - `Ok(MemoryConfig)`: The loaded configuration.
/// - `Err(MemoryError)`: An error occurred while reading the file or parsing the YAML.
pub fn load_config(file: impl AsRef<Path>) -> Result<MemoryConfig> {
    let file = file.as_ref();
    debug!("Loading config from {}", file.display());
    let content = fs::read_to_string(file)?;
    // serde_yaml reads an empty document as unit, not as an empty map.
    if content.trim().is_empty() {
        return Ok(MemoryConfig::default());
    }
    let config: MemoryConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Writes `config` as YAML, creating the parent directory if needed.
pub fn write_config(file: impl AsRef<Path>, config: &MemoryConfig) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)?;
    }
    info!("Creating config file: {}", file.display());
    fs::write(file, serde_yaml::to_string(config)?)?;
    Ok(())
}
