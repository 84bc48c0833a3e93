//! # Hindsight (library root)
//!
//! Long-term memory for a conversational agent. Every exchange is written to a
//! durable SQLite turn log and mirrored into a vector index; when the user asks
//! something, the engine recalls the session's most recent turns plus the turns
//! that are semantically closest to the question, and renders them as numbered
//! evidence for the model prompt.
//!
//! ## Pieces
//! - [`turn_store`]: the authoritative log (`conversation_history`, `sessions`).
//! - [`vector_index`] and [`index_map`]: exact cosine search over role-tagged
//!   message vectors, and the vector id → `(session, turn, role)` binding.
//! - [`embeddings`]: the [`EmbeddingProvider`](embeddings::EmbeddingProvider) seam,
//!   with a Candle MiniLM model and an offline hashing embedder.
//! - [`consistency`]: startup drift check and full rebuild from the log.
//! - [`retriever`] and [`evidence`]: hybrid recall and budgeted citation text.
//! - [`memory`]: the [`MemoryEngine`](memory::MemoryEngine) facade over all of the above.
//! - [`config`], [`commands`], [`error`], [`models`], [`schema`]: plumbing.
//!
//! ## Config directory
//! The CLI keeps `config.yaml` under the per-platform directory returned by
//! [`config_dir`], e.g.:
//!
//! - macOS: `~/Library/Application Support/com.hindsight.hindsight`
//! - Linux (XDG): `~/.config/hindsight`
//! - Windows: `C:\Users\<you>\AppData\Roaming\hindsight\hindsight\config`

use directories::ProjectDirs;
use std::{error::Error, path::PathBuf};

pub mod commands;
pub mod config;
pub mod consistency;
pub mod embeddings;
pub mod error;
pub mod evidence;
pub mod index_map;
pub mod memory;
pub mod models;
pub mod retriever;
pub mod schema;
pub mod turn_store;
pub mod vector_index;

pub use error::{MemoryError, Result};
pub use memory::MemoryEngine;

/// Return the per-platform configuration directory used by Hindsight.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "hindsight", "hindsight")`. The directory is **not** created here.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (rare, but possible in heavily sandboxed environments).
///
/// # Examples
/// ```rust
/// let cfg = hindsight::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> std::result::Result<PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "hindsight", "hindsight")
        .ok_or("Unable to determine config directory")?;

    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Path of the default `config.yaml` inside [`config_dir`].
pub fn default_config_path() -> std::result::Result<PathBuf, Box<dyn Error>> {
    Ok(config_dir()?.join("config.yaml"))
}
