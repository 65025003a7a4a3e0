use std::collections::HashSet;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One session's authoritative in-memory record. Owned exclusively by the
/// store; callers receive clones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub data: Value,
    pub active: bool,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Created,
    Updated,
    Closed,
}

/// Emitted on every successful store mutation. The optional persistence
/// collaborator consumes these to mirror writes to durable storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionEvent {
    pub session_id: String,
    pub user_id: String,
    pub kind: SessionEventKind,
    pub revision: u64,
}

pub type SessionEventStream = Pin<Box<dyn Stream<Item = SessionEvent> + Send>>;

/// Concurrent session storage keyed by session id, with a secondary
/// per-user index of active sessions.
///
/// Missing-data conditions are expected outcomes, not errors: lookups return
/// `Option`/`bool`/empty sets. The `Result` seams exist so a
/// persistence-backed implementation can surface its own failures.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a new active record under a generated unique id and index it
    /// for the user. Returns the new session id.
    async fn create_session(&self, user_id: &str, data: Value) -> Result<String>;

    /// Pure lookup; `None` for unknown or empty ids.
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// The user's current active session ids, as a defensive copy. Empty set
    /// for unknown users.
    async fn get_user_sessions(&self, user_id: &str) -> Result<HashSet<String>>;

    /// Deep-merge `partial` into the session's data. Maps merge recursively;
    /// any non-map value, arrays included, replaces the old value wholesale.
    /// Returns false without side effects when the session does not exist.
    async fn update_session(&self, session_id: &str, partial: Value) -> Result<bool>;

    /// Deactivate the session and drop it from the user index. The record
    /// itself remains retrievable via `get_session`. Returns false when the
    /// session does not exist.
    async fn close_session(&self, session_id: &str) -> Result<bool>;

    /// False for unknown, empty, or closed ids; never raises on malformed
    /// input.
    async fn is_session_active(&self, session_id: &str) -> Result<bool>;

    /// Reset both indices. Privileged maintenance paths only.
    async fn clear_all(&self) -> Result<()>;

    /// Subscribe to mutation events, optionally filtered to one user.
    async fn watch_sessions(&self, user_id: Option<&str>) -> Result<SessionEventStream>;
}
