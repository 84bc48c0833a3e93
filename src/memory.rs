//! # Memory engine
//!
//! The facade a chat loop talks to. It owns the turn log, the vector index and
//! the id map, and borrows them out to the consistency check and the retriever.
//!
//! ## Save path
//! [`MemoryEngine::save_turn`] writes the log first. Log failures propagate:
//! losing a turn silently is not acceptable. Then both role-tagged messages are
//! embedded, appended to the index, bound in the map, and both files are
//! persisted. Re-saving a turn that is already logged replaces its rows, so the
//! index is rebuilt from the log instead of appended to; vector, map and row
//! counts stay equal after every successful save. A failure after the log write
//! is logged and left as drift, which the consistency check repairs on the next
//! [`open`](MemoryEngine::open).
//!
//! ## Retrieval path
//! [`MemoryEngine::recall`] and [`MemoryEngine::evidence`] never fail: storage
//! errors degrade to no evidence, so a broken index cannot abort a conversation.
//!
//! ## Quick Example
//! ```no_run
//! use hindsight::{config::MemoryConfig, embeddings::HashingEmbedder, memory::MemoryEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = MemoryEngine::open(MemoryConfig::default(), Box::new(HashingEmbedder::new(384)))?;
//! let session = engine.start_session()?;
//! engine.save_turn(&session, 1, "My name is Wang", "Hello, Wang")?;
//! println!("{}", engine.evidence(&session, "What is my name?"));
//! # Ok(()) }
//! ```

use std::fs;
use tracing::{error, info, warn};

use crate::{
    config::MemoryConfig,
    consistency::{ConsistencyManager, ReconcileReport},
    embeddings::EmbeddingProvider,
    error::Result,
    evidence,
    index_map::IndexMap,
    models::{Role, Session, Turn, TurnKey, embedding_text},
    retriever::{HybridRetriever, RetrievalParams},
    turn_store::TurnStore,
    vector_index::VectorIndex,
};

pub struct MemoryEngine {
    config: MemoryConfig,
    store: TurnStore,
    index: VectorIndex,
    map: IndexMap,
    embedder: Box<dyn EmbeddingProvider>,
    show_progress: bool,
}

impl MemoryEngine {
    /// Open the log and index files named in `config` and repair any drift.
    ///
    /// # Errors
    /// - `DimensionMismatch` if a persisted index was built with another dimension
    ///   than `embedder` produces. Delete the index files to rebuild from the log.
    /// - Storage failures opening the log or creating directories.
    /// - Embedding failures during a rebuild.
    pub fn open(config: MemoryConfig, embedder: Box<dyn EmbeddingProvider>) -> Result<Self> {
        Self::open_with_progress(config, embedder, false)
    }

    /// Like [`open`](Self::open), drawing a progress bar if a rebuild runs.
    pub fn open_with_progress(
        config: MemoryConfig,
        embedder: Box<dyn EmbeddingProvider>,
        show_progress: bool,
    ) -> Result<Self> {
        fs::create_dir_all(&config.storage.index_dir)?;
        let store = TurnStore::open(&config.storage.history_db_path)?;
        let index = VectorIndex::load(&config.storage.index_path(), embedder.dimension())?;
        let map = IndexMap::load(&config.storage.map_path());

        let mut engine = Self {
            config,
            store,
            index,
            map,
            embedder,
            show_progress,
        };
        engine.rebuild(false)?;

        Ok(engine)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Check the index against the log and repair drift; with `force`, rebuild unconditionally.
    pub fn rebuild(&mut self, force: bool) -> Result<ReconcileReport> {
        let log_rows = self.store.row_count()?;
        let vectors_before = self.index.total_count();
        let mut manager = ConsistencyManager::new(
            &mut self.store,
            &mut self.index,
            &mut self.map,
            self.embedder.as_ref(),
            self.config.storage.index_path(),
            self.config.storage.map_path(),
        )
        .with_progress(self.show_progress);

        if force {
            let vectors_after = manager.rebuild()?;
            return Ok(ReconcileReport {
                log_rows,
                vectors_before,
                vectors_after,
                rebuilt: true,
            });
        }

        manager.reconcile()
    }

    pub fn start_session(&mut self) -> Result<String> {
        self.store.start_session()
    }

    /// Log one exchange, then index both of its messages.
    ///
    /// # Errors
    /// Only log-write failures, including `NotFound` for a session that was never
    /// started. Index-side failures are logged and repaired at the next open.
    pub fn save_turn(
        &mut self,
        session_id: &str,
        turn_number: i32,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<()> {
        let replacing = self.store.has_turn(session_id, turn_number)?;
        self.store
            .save_turn(session_id, turn_number, user_content, assistant_content)?;

        let indexed = if replacing {
            info!(
                "Turn {} of session {} replaced, rebuilding index",
                turn_number, session_id
            );
            self.rebuild(true).map(|_| ())
        } else {
            self.index_turn(session_id, turn_number, user_content, assistant_content)
        };

        if let Err(err) = indexed {
            error!(
                "Turn {} of session {} logged but not indexed: {}",
                turn_number, session_id, err
            );
        }

        Ok(())
    }

    fn index_turn(
        &mut self,
        session_id: &str,
        turn_number: i32,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<()> {
        let messages = [(Role::User, user_content), (Role::Assistant, assistant_content)];

        // Embed both before touching the index so a failure leaves it unchanged.
        let vectors = messages
            .iter()
            .map(|(role, content)| self.embedder.embed(&embedding_text(*role, content)))
            .collect::<Result<Vec<_>>>()?;

        for ((role, _), vector) in messages.iter().zip(vectors) {
            let vector_id = self.index.add(&vector)?;
            self.map.bind(
                vector_id,
                TurnKey {
                    session_id: session_id.to_string(),
                    turn_number,
                    role: *role,
                },
            );
        }

        self.index.persist(&self.config.storage.index_path())?;
        self.map.persist(&self.config.storage.map_path())?;
        Ok(())
    }

    /// Record the final turn count of a session. Returns `false` for an unknown session.
    pub fn close_session(&mut self, session_id: &str, total_turns: i32) -> Result<bool> {
        let found = self.store.update_session_total_turns(session_id, total_turns)?;
        if found {
            info!("Closed session {} after {} turns", session_id, total_turns);
        } else {
            warn!("Cannot close unknown session {}", session_id);
        }
        Ok(found)
    }

    /// Hybrid recall with the configured parameters.
    pub fn recall(&mut self, session_id: &str, query: &str) -> Vec<Turn> {
        let params = RetrievalParams::from(&self.config.retrieval);
        self.recall_with(session_id, query, &params)
    }

    /// Hybrid recall with explicit parameters. Failures degrade to an empty list.
    pub fn recall_with(&mut self, session_id: &str, query: &str, params: &RetrievalParams) -> Vec<Turn> {
        let result = self.try_recall(session_id, query, params);
        match result {
            Ok(turns) => turns,
            Err(err) => {
                warn!("History retrieval failed, continuing without evidence: {}", err);
                Vec::new()
            }
        }
    }

    /// Hybrid recall that surfaces storage failures instead of degrading.
    pub fn try_recall(
        &mut self,
        session_id: &str,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<Vec<Turn>> {
        HybridRetriever::new(&mut self.store, &self.index, &self.map, self.embedder.as_ref())
            .retrieve_evidence(session_id, query, params)
    }

    /// Recall and render evidence within the configured character budget.
    pub fn evidence(&mut self, session_id: &str, query: &str) -> String {
        let turns = self.recall(session_id, query);
        evidence::assemble(&turns, self.config.retrieval.max_evidence_chars)
    }

    pub fn sessions(&mut self) -> Result<Vec<Session>> {
        self.store.get_all_sessions()
    }

    pub fn session(&mut self, session_id: &str) -> Result<Session> {
        self.store.session(session_id)
    }

    pub fn history(&mut self, session_id: &str) -> Result<Vec<Turn>> {
        self.store.get_session_history(session_id, None)
    }

    pub fn row_count(&mut self) -> Result<u64> {
        self.store.row_count()
    }

    pub fn vector_count(&self) -> u64 {
        self.index.total_count()
    }

    pub fn mapped_count(&self) -> usize {
        self.map.len()
    }

    /// Direct access to the log, bypassing the index.
    pub fn store_mut(&mut self) -> &mut TurnStore {
        &mut self.store
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("config", &self.config)
            .field("vectors", &self.index.total_count())
            .field("mapped", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::error::MemoryError;
    use diesel::connection::SimpleConnection;
    use diesel::{Connection, SqliteConnection};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    const DIM: usize = 1024;

    fn config(dir: &TempDir) -> MemoryConfig {
        let mut config = MemoryConfig::default();
        config.storage.history_db_path = dir.path().join("db").join("conversation_history.db");
        config.storage.index_dir = dir.path().join("index");
        config
    }

    fn open(dir: &TempDir) -> MemoryEngine {
        MemoryEngine::open(config(dir), Box::new(HashingEmbedder::new(DIM))).unwrap()
    }

    fn params(top_k: usize, similarity_threshold: f32, recent_n: usize) -> RetrievalParams {
        RetrievalParams {
            top_k,
            similarity_threshold,
            recent_n,
            overfetch: 5,
        }
    }

    fn turn_numbers(turns: &[Turn]) -> BTreeSet<i32> {
        turns.iter().map(|t| t.turn_number).collect()
    }

    #[test]
    fn test_open_creates_files_and_directories() {
        let dir = TempDir::new().unwrap();
        let mut engine = open(&dir);
        let session = engine.start_session().unwrap();
        engine.save_turn(&session, 1, "hello", "hi").unwrap();

        let config = engine.config().clone();
        assert!(config.storage.history_db_path.exists());
        assert!(config.storage.index_path().exists());
        assert!(config.storage.map_path().exists());
    }

    #[test]
    fn test_counts_agree_after_every_save() {
        let dir = TempDir::new().unwrap();
        let mut engine = open(&dir);
        let session = engine.start_session().unwrap();

        for turn in 1..=5 {
            engine
                .save_turn(&session, turn, &format!("question {turn}"), &format!("answer {turn}"))
                .unwrap();
            let rows = engine.row_count().unwrap();
            assert_eq!(rows, 2 * turn as u64);
            assert_eq!(engine.vector_count(), rows);
            assert_eq!(engine.mapped_count() as u64, rows);
        }
    }

    #[test]
    fn test_remembers_name_through_semantic_match() {
        let dir = TempDir::new().unwrap();
        let mut engine = open(&dir);
        let session = engine.start_session().unwrap();
        engine.save_turn(&session, 1, "我叫小王", "你好，小王").unwrap();
        engine.save_turn(&session, 2, "明天开会", "好的，记下了").unwrap();

        let semantic = HybridRetriever::new(
            &mut engine.store,
            &engine.index,
            &engine.map,
            engine.embedder.as_ref(),
        )
        .semantic_hits(&session, "我叫什么？", &params(5, 0.3, 2));
        assert_eq!(semantic.first().map(|hit| hit.turn_number), Some(1));

        let turns = engine.recall_with(&session, "我叫什么？", &params(5, 0.3, 2));
        assert_eq!(turn_numbers(&turns), BTreeSet::from([1, 2]));

        let text = evidence::assemble(&turns, 1200);
        assert!(text.starts_with("[Evidence #1 | turn 1 | user"));
        assert!(text.contains("我叫小王"));
    }

    #[test]
    fn test_unreachable_threshold_returns_recency_only() {
        let dir = TempDir::new().unwrap();
        let mut engine = open(&dir);
        let session = engine.start_session().unwrap();
        engine.save_turn(&session, 1, "我叫小王", "你好，小王").unwrap();
        engine.save_turn(&session, 2, "明天开会", "好的，记下了").unwrap();

        let turns = engine.recall_with(&session, "我叫什么？", &params(5, 1.5, 2));
        assert_eq!(turn_numbers(&turns), BTreeSet::from([2]));
    }

    #[test]
    fn test_drift_is_repaired_on_reopen() {
        let dir = TempDir::new().unwrap();
        let session = {
            let mut engine = open(&dir);
            let session = engine.start_session().unwrap();
            engine.save_turn(&session, 1, "hello there", "hi").unwrap();
            // Log write without the index write, as after a crash.
            engine
                .store_mut()
                .save_turn(&session, 2, "my favourite colour is teal", "teal it is")
                .unwrap();
            assert_eq!(engine.vector_count(), 2);
            session
        };

        let mut engine = open(&dir);
        assert_eq!(engine.vector_count(), engine.row_count().unwrap());
        assert_eq!(engine.vector_count(), 4);

        let turns = engine.recall_with(&session, "favourite colour teal", &params(5, 0.3, 0));
        assert_eq!(turn_numbers(&turns), BTreeSet::from([2]));
    }

    #[test]
    fn test_reopening_twice_does_not_grow_index() {
        let dir = TempDir::new().unwrap();
        {
            let mut engine = open(&dir);
            let session = engine.start_session().unwrap();
            engine.store_mut().save_turn(&session, 1, "a", "b").unwrap();
        }

        let first = open(&dir);
        let after_first = fs::read(first.config().storage.index_path()).unwrap();
        assert_eq!(first.vector_count(), 2);
        drop(first);

        let mut second = open(&dir);
        assert_eq!(second.vector_count(), 2);
        let report = second.rebuild(false).unwrap();
        assert!(!report.rebuilt);
        let after_second = fs::read(second.config().storage.index_path()).unwrap();
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn test_forced_rebuild_keeps_counts() {
        let dir = TempDir::new().unwrap();
        let mut engine = open(&dir);
        let session = engine.start_session().unwrap();
        engine.save_turn(&session, 1, "a", "b").unwrap();
        engine.save_turn(&session, 2, "c", "d").unwrap();

        let report = engine.rebuild(true).unwrap();
        assert!(report.rebuilt);
        assert_eq!(report.vectors_before, 4);
        assert_eq!(report.vectors_after, 4);
        assert_eq!(engine.mapped_count(), 4);
    }

    #[test]
    fn test_resaving_a_turn_keeps_counts_equal() {
        let dir = TempDir::new().unwrap();
        let mut engine = open(&dir);
        let session = engine.start_session().unwrap();
        engine.save_turn(&session, 1, "my cat is called Miso", "nice name").unwrap();
        engine.save_turn(&session, 2, "book a room", "booked").unwrap();
        engine.save_turn(&session, 1, "my dog is called Biscuit", "lovely").unwrap();

        let rows = engine.row_count().unwrap();
        assert_eq!(rows, 4);
        assert_eq!(engine.vector_count(), rows);
        assert_eq!(engine.mapped_count() as u64, rows);

        let turns = engine.recall_with(&session, "dog called Biscuit", &params(5, 0.6, 0));
        assert_eq!(turn_numbers(&turns), BTreeSet::from([1]));
        assert!(turns.iter().any(|t| t.content.contains("Biscuit")));
        assert!(engine.recall_with(&session, "cat Miso", &params(5, 0.6, 0)).is_empty());
    }

    #[test]
    fn test_drift_after_resave_is_repaired_on_reopen() {
        let dir = TempDir::new().unwrap();
        let session = {
            let mut engine = open(&dir);
            let session = engine.start_session().unwrap();
            engine.save_turn(&session, 1, "hello there", "hi").unwrap();
            engine.save_turn(&session, 1, "hello again", "hi again").unwrap();
            // Log write without the index write, as after a crash.
            engine
                .store_mut()
                .save_turn(&session, 2, "my favourite colour is teal", "teal it is")
                .unwrap();
            session
        };

        let mut engine = open(&dir);
        assert_eq!(engine.row_count().unwrap(), 4);
        assert_eq!(engine.vector_count(), 4);
        assert_eq!(engine.mapped_count(), 4);

        let turns = engine.recall_with(&session, "favourite colour teal", &params(5, 0.3, 0));
        assert_eq!(turn_numbers(&turns), BTreeSet::from([2]));
    }

    #[test]
    fn test_save_to_unknown_session_is_an_error() {
        let dir = TempDir::new().unwrap();
        let mut engine = open(&dir);
        let err = engine.save_turn("never-started", 1, "a", "b").unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
        assert_eq!(engine.row_count().unwrap(), 0);
        assert_eq!(engine.vector_count(), 0);
    }

    #[test]
    fn test_storage_failure_degrades_to_empty_evidence() {
        let dir = TempDir::new().unwrap();
        let mut engine = open(&dir);
        let session = engine.start_session().unwrap();
        engine.save_turn(&session, 1, "my cat is called Miso", "nice name").unwrap();
        assert!(!engine.recall_with(&session, "cat Miso", &params(5, 0.3, 2)).is_empty());

        let db_path = engine.config().storage.history_db_path.clone();
        let mut other = SqliteConnection::establish(db_path.to_str().unwrap()).unwrap();
        other.batch_execute("DROP TABLE conversation_history").unwrap();

        let params = params(5, 0.3, 2);
        assert!(engine.try_recall(&session, "cat Miso", &params).is_err());
        assert!(engine.recall_with(&session, "cat Miso", &params).is_empty());
        assert!(engine.recall(&session, "cat Miso").is_empty());
        assert_eq!(engine.evidence(&session, "cat Miso"), "");
    }

    #[test]
    fn test_mismatched_embedder_fails_at_open() {
        let dir = TempDir::new().unwrap();
        {
            let mut engine = open(&dir);
            let session = engine.start_session().unwrap();
            engine.save_turn(&session, 1, "a", "b").unwrap();
        }

        let err = MemoryEngine::open(config(&dir), Box::new(HashingEmbedder::new(16))).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch {
                expected: DIM,
                actual: 16
            }
        ));
    }

    #[test]
    fn test_evidence_uses_configured_budget() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.retrieval.max_evidence_chars = 80;
        let mut engine = MemoryEngine::open(config, Box::new(HashingEmbedder::new(DIM))).unwrap();
        let session = engine.start_session().unwrap();
        engine.save_turn(&session, 1, "a fairly long question", "a fairly long answer").unwrap();

        let text = engine.evidence(&session, "question");
        assert!(!text.is_empty());
        assert!(text.chars().count() <= 80);
    }

    #[test]
    fn test_close_session_and_listing() {
        let dir = TempDir::new().unwrap();
        let mut engine = open(&dir);
        let session = engine.start_session().unwrap();
        engine.save_turn(&session, 1, "a", "b").unwrap();

        assert!(engine.close_session(&session, 1).unwrap());
        assert!(!engine.close_session("unknown", 1).unwrap());
        assert_eq!(engine.session(&session).unwrap().total_turns, 1);
        assert_eq!(engine.sessions().unwrap().len(), 1);
        assert_eq!(engine.history(&session).unwrap().len(), 2);
    }
}
