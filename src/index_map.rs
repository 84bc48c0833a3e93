//! # IndexMap
//!
//! The join between the vector index and the turn log: a durable mapping from
//! vector id to [`TurnKey`]. It is the only place the two id spaces meet.
//!
//! The map is persisted as YAML next to the index file (see
//! [`StorageConfig::map_path`](crate::config::StorageConfig::map_path)), one entry
//! per vector:
//!
//! ```yaml
//! - vector_id: 0
//!   session_id: "1760781234567890"
//!   turn_number: 1
//!   role: user
//! ```

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use tracing::{debug, warn};

use crate::{
    error::Result,
    models::{Role, TurnKey},
    vector_index::write_atomically,
};

/// On-disk form of one binding.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct IndexMapEntry {
    vector_id: u64,
    session_id: String,
    turn_number: i32,
    role: Role,
}

/// Vector id → turn identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexMap {
    entries: BTreeMap<u64, TurnKey>,
}

impl IndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `vector_id` to `key`, replacing any previous binding of that id.
    pub fn bind(&mut self, vector_id: u64, key: TurnKey) {
        self.entries.insert(vector_id, key);
    }

    pub fn resolve(&self, vector_id: u64) -> Option<&TurnKey> {
        self.entries.get(&vector_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Write every binding to `path` as YAML.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let entries: Vec<IndexMapEntry> = self
            .entries
            .iter()
            .map(|(vector_id, key)| IndexMapEntry {
                vector_id: *vector_id,
                session_id: key.session_id.clone(),
                turn_number: key.turn_number,
                role: key.role,
            })
            .collect();

        let yaml = serde_yaml::to_string(&entries)?;
        write_atomically(path, yaml.as_bytes())?;
        debug!("Persisted {} index map entries to {}", entries.len(), path.display());
        Ok(())
    }

    /// Read the map from `path`. Missing or unreadable files yield an empty map.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }

        let parsed = fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|yaml| {
                serde_yaml::from_str::<Vec<IndexMapEntry>>(&yaml).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(entries) => Self {
                entries: entries
                    .into_iter()
                    .map(|entry| {
                        (
                            entry.vector_id,
                            TurnKey {
                                session_id: entry.session_id,
                                turn_number: entry.turn_number,
                                role: entry.role,
                            },
                        )
                    })
                    .collect(),
            },
            Err(err) => {
                warn!("Error loading index map {}: {}. Creating new one.", path.display(), err);
                Self::new()
            }
        }
    }
}
