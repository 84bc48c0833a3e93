//! # Database models
//!
//! Data structures that map to the turn log's SQLite schema via **Diesel**.
//!
//! - [`Turn`]: one role-tagged message inside a session. Two rows (user and
//!   assistant) share a `turn_number`.
//! - [`Session`]: one continuous conversation.
//! - [`TurnKey`]: the identity of a turn row, `(session_id, turn_number, role)`.
//!   This is what the index map binds vector ids to.
//!
//! ## Diesel expectations
//!
//! The tables are declared in `crate::schema` and created on open by
//! [`TurnStore`](crate::turn_store::TurnStore):
//!
//! - `conversation_history` with `UNIQUE(session_id, turn_number, role)`
//! - `sessions`
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role string in the log that is neither `user` nor `assistant`.
#[derive(Error, Debug)]
#[error("role in turn row not allowed: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One message within a session.
///
/// ### Table
/// - `conversation_history`
///
/// ### Notes
/// - `(session_id, turn_number, role)` is unique; writing the same key again
///   replaces the row.
/// - `created_at` is the local-time rendering of `timestamp`.
#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::conversation_history)]
pub struct Turn {
    /// Storage-order row id assigned by SQLite.
    pub id: i32,
    pub session_id: String,
    /// Positive and monotonic within a session.
    pub turn_number: i32,
    #[diesel(deserialize_as = String)]
    pub role: Role,
    pub content: String,
    /// Seconds since the epoch. The assistant row is stamped just after the user row.
    pub timestamp: f64,
    pub created_at: String,
}

impl Turn {
    pub fn key(&self) -> TurnKey {
        TurnKey {
            session_id: self.session_id.clone(),
            turn_number: self.turn_number,
            role: self.role,
        }
    }
}

/// Insert form of [`Turn`]; `id` is assigned by the database.
#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::conversation_history)]
pub struct NewTurn<'a> {
    pub session_id: &'a str,
    pub turn_number: i32,
    pub role: &'a str,
    pub content: &'a str,
    pub timestamp: f64,
    pub created_at: &'a str,
}

/// A conversation.
///
/// `total_turns` counts completed exchanges, not rows: every exchange writes two
/// [`Turn`] rows.
#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone, PartialEq)]
#[diesel(table_name = crate::schema::sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Session {
    pub session_id: String,
    pub start_time: f64,
    pub start_time_str: String,
    pub last_update: f64,
    pub total_turns: i32,
}

/// Identity of one turn row, independent of its storage id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnKey {
    pub session_id: String,
    pub turn_number: i32,
    pub role: Role,
}

/// The text unit embedded for a turn row, on both the save and rebuild paths.
pub fn embedding_text(role: Role, content: &str) -> String {
    format!("[{role}]: {content}")
}
