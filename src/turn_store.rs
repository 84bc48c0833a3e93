//! # Turn Store
//!
//! The durable relational log of sessions and turns. It is the source of truth
//! for conversation content; the vector index is derived from it and can always
//! be rebuilt from it.
//!
//! ## What this module owns
//! - A `TurnStore` struct wrapping a live Diesel `SqliteConnection`.
//! - Table creation on open (`CREATE TABLE IF NOT EXISTS`).
//! - The sole write path for conversation content ([`TurnStore::save_turn`]).
//! - Read helpers used by retrieval and by the consistency check.
//!
//! ## Ordering
//! Every read returns rows in chronological order: `turn_number` ascending, and
//! within a turn the user row before the assistant row (`role DESC`, since
//! `"user" > "assistant"`). A `limit` always selects the *most recent* rows.
//!
//! ## Diesel schema
//! See `crate::schema`. The DDL lives in [`SCHEMA_SQL`] so a fresh database file
//! is usable without running migrations.

use chrono::{DateTime, Local};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::SqliteConnection;
use std::{fs, path::Path};
use tracing::debug;

use crate::{
    error::{MemoryError, Result},
    models::{NewTurn, Role, Session, Turn},
    schema::{conversation_history, sessions},
};

/// Tables backing the log.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversation_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    turn_number INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp REAL NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(session_id, turn_number, role)
);
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY NOT NULL,
    start_time REAL NOT NULL,
    start_time_str TEXT NOT NULL,
    last_update REAL NOT NULL,
    total_turns INTEGER NOT NULL DEFAULT 0
);
"#;

/// Offset separating the assistant row's timestamp from the user row's.
const ASSISTANT_TIMESTAMP_OFFSET: f64 = 0.001;

/// Live connection to the turn log.
pub struct TurnStore {
    connection: SqliteConnection,
}

impl TurnStore {
    /// Open (or create) the log at `db_path`.
    ///
    /// The parent directory is created if absent, and the tables are created if
    /// they do not exist yet. `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    /// - I/O failure creating the parent directory.
    /// - The path is not valid UTF-8 (`StorageUnavailable`).
    /// - SQLite cannot open the file or run the DDL.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let url = path.to_str().ok_or_else(|| {
            MemoryError::StorageUnavailable(format!("non UTF-8 database path {}", path.display()))
        })?;

        let mut connection = SqliteConnection::establish(url)?;
        connection.batch_execute(SCHEMA_SQL)?;
        debug!("Turn log opened at {}", path.display());

        Ok(Self { connection })
    }

    /// Create a session row with `total_turns = 0` and return its id.
    ///
    /// The id is the current time in microseconds. If that id is already taken
    /// (two sessions within the same microsecond, or a clock step backwards), the
    /// next free integer is used, so ids never collide within one store.
    pub fn start_session(&mut self) -> Result<String> {
        let now = Local::now();
        let start_time = epoch_seconds(&now);
        let start_time_str = render_time(&now);
        let mut candidate = now.timestamp_micros();

        self.connection.transaction::<_, MemoryError, _>(|conn| {
            loop {
                let session_id = candidate.to_string();
                let taken: i64 = sessions::table
                    .filter(sessions::session_id.eq(&session_id))
                    .count()
                    .get_result(conn)?;

                if taken == 0 {
                    diesel::insert_into(sessions::table)
                        .values(&Session {
                            session_id: session_id.clone(),
                            start_time,
                            start_time_str: start_time_str.clone(),
                            last_update: start_time,
                            total_turns: 0,
                        })
                        .execute(conn)?;
                    debug!("Started session {}", session_id);
                    return Ok(session_id);
                }

                candidate += 1;
            }
        })
    }

    /// Upsert the user and assistant rows of one exchange and bump the session.
    ///
    /// Both rows share `turn_number`; the assistant row is stamped slightly after the
    /// user row so sorting by timestamp keeps them in order. Writing an existing
    /// `(session_id, turn_number)` again replaces both rows. The session's
    /// `last_update` and `total_turns` are updated in the same transaction.
    ///
    /// # Errors
    /// - `NotFound` if `session_id` was never started; no rows are written.
    /// - Any database failure. Nothing is written if the transaction fails.
    pub fn save_turn(
        &mut self,
        session_id: &str,
        turn_number: i32,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<()> {
        let now = Local::now();
        let timestamp = epoch_seconds(&now);
        let created_at = render_time(&now);

        self.connection.transaction::<_, MemoryError, _>(|conn| {
            let known: i64 = sessions::table
                .filter(sessions::session_id.eq(session_id))
                .count()
                .get_result(conn)?;
            if known == 0 {
                return Err(MemoryError::NotFound(format!("session {session_id}")));
            }

            diesel::replace_into(conversation_history::table)
                .values(&NewTurn {
                    session_id,
                    turn_number,
                    role: Role::User.as_str(),
                    content: user_content,
                    timestamp,
                    created_at: &created_at,
                })
                .execute(conn)?;

            diesel::replace_into(conversation_history::table)
                .values(&NewTurn {
                    session_id,
                    turn_number,
                    role: Role::Assistant.as_str(),
                    content: assistant_content,
                    timestamp: timestamp + ASSISTANT_TIMESTAMP_OFFSET,
                    created_at: &created_at,
                })
                .execute(conn)?;

            diesel::update(sessions::table.find(session_id))
                .set((
                    sessions::last_update.eq(timestamp),
                    sessions::total_turns.eq(turn_number),
                ))
                .execute(conn)?;

            Ok(())
        })
    }

    /// Whether `(session_id, turn_number)` already has rows in the log.
    pub fn has_turn(&mut self, session_id: &str, turn_number: i32) -> Result<bool> {
        let rows: i64 = conversation_history::table
            .filter(conversation_history::session_id.eq(session_id))
            .filter(conversation_history::turn_number.eq(turn_number))
            .count()
            .get_result(&mut self.connection)?;

        Ok(rows > 0)
    }

    /// Session-close bookkeeping: set `total_turns` and touch `last_update`.
    ///
    /// Returns `false` if no such session exists.
    pub fn update_session_total_turns(&mut self, session_id: &str, total_turns: i32) -> Result<bool> {
        let now = Local::now();
        let updated = diesel::update(sessions::table.find(session_id))
            .set((
                sessions::total_turns.eq(total_turns),
                sessions::last_update.eq(epoch_seconds(&now)),
            ))
            .execute(&mut self.connection)?;

        Ok(updated > 0)
    }

    /// Rows of one session in chronological order.
    ///
    /// With `limit = Some(n)` only the `n` most recent **rows** (not turns) are
    /// returned, still in chronological order. An unknown session yields an empty list.
    pub fn get_session_history(&mut self, session_id: &str, limit: Option<usize>) -> Result<Vec<Turn>> {
        let rows = match limit {
            None => conversation_history::table
                .filter(conversation_history::session_id.eq(session_id))
                .order((
                    conversation_history::turn_number.asc(),
                    conversation_history::role.desc(),
                ))
                .select(Turn::as_select())
                .load(&mut self.connection)?,
            Some(n) => {
                let mut rows = conversation_history::table
                    .filter(conversation_history::session_id.eq(session_id))
                    .order((
                        conversation_history::turn_number.desc(),
                        conversation_history::role.asc(),
                    ))
                    .limit(i64::try_from(n).unwrap_or(i64::MAX))
                    .select(Turn::as_select())
                    .load(&mut self.connection)?;
                rows.reverse();
                rows
            }
        };

        Ok(rows)
    }

    /// All rows of `session_id` whose turn number is in `turn_numbers`, chronologically.
    pub fn turns_in(&mut self, session_id: &str, turn_numbers: &[i32]) -> Result<Vec<Turn>> {
        if turn_numbers.is_empty() {
            return Ok(Vec::new());
        }

        let rows = conversation_history::table
            .filter(conversation_history::session_id.eq(session_id))
            .filter(conversation_history::turn_number.eq_any(turn_numbers))
            .order((
                conversation_history::turn_number.asc(),
                conversation_history::role.desc(),
            ))
            .select(Turn::as_select())
            .load(&mut self.connection)?;

        Ok(rows)
    }

    /// One page of rows in storage order, starting after row id `after_id`.
    ///
    /// Pass `0` for the first page and the last returned `id` for the next one.
    pub fn turns_after(&mut self, after_id: i32, page_size: usize) -> Result<Vec<Turn>> {
        let rows = conversation_history::table
            .filter(conversation_history::id.gt(after_id))
            .order(conversation_history::id.asc())
            .limit(i64::try_from(page_size).unwrap_or(i64::MAX))
            .select(Turn::as_select())
            .load(&mut self.connection)?;

        Ok(rows)
    }

    /// Every session, newest first.
    pub fn get_all_sessions(&mut self) -> Result<Vec<Session>> {
        let rows = sessions::table
            .order(sessions::start_time.desc())
            .select(Session::as_select())
            .load(&mut self.connection)?;

        Ok(rows)
    }

    /// Look up a single session.
    ///
    /// # Errors
    /// `NotFound` if no session has this id.
    pub fn session(&mut self, session_id: &str) -> Result<Session> {
        sessions::table
            .find(session_id)
            .select(Session::as_select())
            .first(&mut self.connection)
            .optional()?
            .ok_or_else(|| MemoryError::NotFound(format!("session {session_id}")))
    }

    /// Total number of turn rows across all sessions.
    pub fn row_count(&mut self) -> Result<u64> {
        let count: i64 = conversation_history::table
            .count()
            .get_result(&mut self.connection)?;

        Ok(count.max(0) as u64)
    }
}

fn epoch_seconds(time: &DateTime<Local>) -> f64 {
    time.timestamp_micros() as f64 / 1_000_000.0
}

fn render_time(time: &DateTime<Local>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}
