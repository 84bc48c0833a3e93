//! # Hybrid retrieval
//!
//! Unions two sets of turn numbers for a session and resolves them to full rows:
//!
//! 1. **Recency**: the session's `recent_n` most recent rows, for short-term
//!    continuity regardless of relevance.
//! 2. **Semantic**: the query is embedded and searched in the vector index
//!    (over-fetching `top_k * overfetch` candidates), hits below the similarity
//!    threshold are dropped, and the survivors are resolved through the
//!    [`IndexMap`] to distinct turn numbers of the same session, stopping at `top_k`.
//!
//! A failing embedder only empties the semantic set; storage failures are
//! returned to the caller, which decides how to degrade. Rows come back in
//! chronological order, and the evidence assembler defines the final presentation.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::{
    config::RetrievalConfig,
    embeddings::EmbeddingProvider,
    error::Result,
    index_map::IndexMap,
    models::Turn,
    turn_store::TurnStore,
    vector_index::VectorIndex,
};

/// Per-call retrieval knobs.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub recent_n: usize,
    pub overfetch: usize,
}

impl From<&RetrievalConfig> for RetrievalParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            similarity_threshold: config.similarity_threshold,
            recent_n: config.recent_n,
            overfetch: config.overfetch,
        }
    }
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

/// A semantically matched turn and the best score among its vectors.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct SemanticHit {
    pub turn_number: i32,
    pub score: f32,
}

pub struct HybridRetriever<'a> {
    store: &'a mut TurnStore,
    index: &'a VectorIndex,
    map: &'a IndexMap,
    embedder: &'a dyn EmbeddingProvider,
}

impl<'a> HybridRetriever<'a> {
    pub fn new(
        store: &'a mut TurnStore,
        index: &'a VectorIndex,
        map: &'a IndexMap,
        embedder: &'a dyn EmbeddingProvider,
    ) -> Self {
        Self {
            store,
            index,
            map,
            embedder,
        }
    }

    /// Recent rows ∪ semantically matched turns of `session_id`, chronologically.
    ///
    /// An empty result is a normal outcome (new session, nothing retrievable yet).
    pub fn retrieve_evidence(
        &mut self,
        session_id: &str,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<Vec<Turn>> {
        let mut turn_numbers: BTreeSet<i32> = BTreeSet::new();

        if params.recent_n > 0 {
            let recent = self.store.get_session_history(session_id, Some(params.recent_n))?;
            turn_numbers.extend(recent.iter().map(|turn| turn.turn_number));
        }

        let semantic = self.semantic_hits(session_id, query, params);
        debug!(
            "Recall for session {}: recent turns {:?}, semantic hits {:?}",
            session_id, turn_numbers, semantic
        );
        turn_numbers.extend(semantic.iter().map(|hit| hit.turn_number));

        if turn_numbers.is_empty() {
            return Ok(Vec::new());
        }

        let turn_numbers: Vec<i32> = turn_numbers.into_iter().collect();
        self.store.turns_in(session_id, &turn_numbers)
    }

    /// Distinct turns of `session_id` matching `query` at or above the threshold, best first.
    ///
    /// Embedding or search failures are logged and yield no hits.
    pub fn semantic_hits(
        &self,
        session_id: &str,
        query: &str,
        params: &RetrievalParams,
    ) -> Vec<SemanticHit> {
        if params.top_k == 0 || self.index.total_count() == 0 {
            return Vec::new();
        }

        let query_vector = match self.embedder.embed(query) {
            Ok(vector) => vector,
            Err(err) => {
                warn!("Query embedding failed, using recent turns only: {}", err);
                return Vec::new();
            }
        };

        let candidates = params.top_k.saturating_mul(params.overfetch.max(1));
        let scored = match self.index.search(&query_vector, candidates) {
            Ok(scored) => scored,
            Err(err) => {
                warn!("Vector search failed, using recent turns only: {}", err);
                return Vec::new();
            }
        };

        let mut seen = BTreeSet::new();
        let mut hits = Vec::new();
        for (vector_id, score) in scored {
            if score < params.similarity_threshold {
                continue;
            }
            let Some(key) = self.map.resolve(vector_id) else {
                continue;
            };
            if key.session_id != session_id {
                continue;
            }
            if seen.insert(key.turn_number) {
                hits.push(SemanticHit {
                    turn_number: key.turn_number,
                    score,
                });
            }
            if hits.len() >= params.top_k {
                break;
            }
        }

        hits
    }
}
