//! # Consistency check and rebuild
//!
//! The turn log is written before the index, and the two writes are not atomic
//! together. A crash in between leaves the log with rows the index does not know
//! about. [`ConsistencyManager::reconcile`] runs once at startup, compares the
//! counts, and replays the whole log into a fresh index when they drift.
//!
//! Drift is declared when
//! - the index holds fewer vectors than the log holds rows, or
//! - the id map and the index disagree on their size (e.g. a lost map file).
//!
//! An index *ahead* of the log is logged and accepted.
//!
//! Rebuild walks the log in storage order, one page at a time. Each page is
//! embedded in parallel, then added sequentially so vector ids follow storage
//! order. Both structures are persisted when the walk completes.

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::{
    embeddings::EmbeddingProvider,
    error::{MemoryError, Result},
    index_map::IndexMap,
    models::embedding_text,
    turn_store::TurnStore,
    vector_index::VectorIndex,
};

/// Rows fetched from the log per rebuild page.
const REBUILD_PAGE_SIZE: usize = 256;

/// Outcome of one consistency check.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub log_rows: u64,
    pub vectors_before: u64,
    pub vectors_after: u64,
    pub rebuilt: bool,
}

/// Borrowed view over the log, the index and the map, plus where to persist them.
pub struct ConsistencyManager<'a> {
    store: &'a mut TurnStore,
    index: &'a mut VectorIndex,
    map: &'a mut IndexMap,
    embedder: &'a dyn EmbeddingProvider,
    index_path: PathBuf,
    map_path: PathBuf,
    show_progress: bool,
}

impl<'a> ConsistencyManager<'a> {
    pub fn new(
        store: &'a mut TurnStore,
        index: &'a mut VectorIndex,
        map: &'a mut IndexMap,
        embedder: &'a dyn EmbeddingProvider,
        index_path: PathBuf,
        map_path: PathBuf,
    ) -> Self {
        Self {
            store,
            index,
            map,
            embedder,
            index_path,
            map_path,
            show_progress: false,
        }
    }

    /// Draw a progress bar on stderr while rebuilding.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Compare counts and rebuild if the index has drifted behind the log.
    pub fn reconcile(&mut self) -> Result<ReconcileReport> {
        let log_rows = self.store.row_count()?;
        let vectors_before = self.index.total_count();
        let mapped = self.map.len() as u64;

        if vectors_before > log_rows {
            warn!(
                "Vector index is ahead of the log ({} vectors, {} rows); leaving it as is",
                vectors_before, log_rows
            );
        }

        let behind = vectors_before < log_rows;
        let map_disagrees = mapped != vectors_before;

        if !behind && !map_disagrees {
            info!("Index consistent with log ({} rows)", log_rows);
            return Ok(ReconcileReport {
                log_rows,
                vectors_before,
                vectors_after: vectors_before,
                rebuilt: false,
            });
        }

        info!(
            "Rebuilding index for {} rows (current index: {}, map: {})",
            log_rows, vectors_before, mapped
        );
        let vectors_after = self.rebuild()?;

        Ok(ReconcileReport {
            log_rows,
            vectors_before,
            vectors_after,
            rebuilt: true,
        })
    }

    /// Reset the index and map, replay every log row, and persist both.
    ///
    /// Returns the number of vectors in the rebuilt index.
    pub fn rebuild(&mut self) -> Result<u64> {
        if self.embedder.dimension() != self.index.dimension() {
            return Err(MemoryError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: self.embedder.dimension(),
            });
        }

        let total = self.store.row_count()?;
        let progress = if self.show_progress {
            let bar = ProgressBar::new(total);
            if let Ok(style) =
                ProgressStyle::with_template("{spinner} rebuilding index [{bar:40}] {pos}/{len} rows")
            {
                bar.set_style(style);
            }
            bar
        } else {
            ProgressBar::hidden()
        };

        self.index.reset();
        self.map.clear();

        let embedder = self.embedder;
        let mut last_id = 0;
        loop {
            let page = self.store.turns_after(last_id, REBUILD_PAGE_SIZE)?;
            let Some(last) = page.last() else {
                break;
            };
            last_id = last.id;

            let vectors = page
                .par_iter()
                .progress_with(progress.clone())
                .map(|turn| embedder.embed(&embedding_text(turn.role, &turn.content)))
                .collect::<Result<Vec<_>>>()?;

            for (turn, vector) in page.iter().zip(vectors) {
                let vector_id = self.index.add(&vector)?;
                self.map.bind(vector_id, turn.key());
            }
        }
        progress.finish_and_clear();

        self.index.persist(&self.index_path)?;
        self.map.persist(&self.map_path)?;
        info!("Index rebuild complete: {} vectors", self.index.total_count());

        Ok(self.index.total_count())
    }
}
