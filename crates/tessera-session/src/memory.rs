use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use uuid::Uuid;

use tessera_common::{ContextError, ExecutionContext};

use crate::merge::deep_merge;
use crate::types::{SessionEvent, SessionEventKind, SessionEventStream, SessionRecord, SessionStore};

/// In-memory authoritative session store.
///
/// Both indices live behind one `RwLock`, so every mutation is applied as a
/// whole: a concurrent reader either sees the fully-constructed record or
/// none of it, and two deep merges against the same session can never
/// interleave.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    inner: Arc<RwLock<Inner>>,
    tx: broadcast::Sender<SessionEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    revision: u64,
    sessions: HashMap<String, SessionRecord>,
    user_sessions: HashMap<String, HashSet<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            tx,
        }
    }

    fn next_revision(inner: &mut Inner) -> u64 {
        inner.revision = inner.revision.saturating_add(1);
        inner.revision
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Look up a session on behalf of a context, enforcing that the context's
    /// user owns it. Attaching a foreign user's session is an isolation
    /// violation, raised here at attachment time.
    pub async fn attach(
        &self,
        ctx: &ExecutionContext,
        session_id: &str,
    ) -> Result<Option<SessionRecord>, ContextError> {
        let inner = self.inner.read().await;
        match inner.sessions.get(session_id) {
            None => Ok(None),
            Some(record) if record.user_id == ctx.user_id() => Ok(Some(record.clone())),
            Some(record) => Err(ContextError::IsolationViolation {
                user_id: ctx.user_id().to_string(),
                reason: format!(
                    "session '{session_id}' belongs to user '{}'",
                    record.user_id
                ),
            }),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_session(&self, user_id: &str, data: serde_json::Value) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let event = {
            let mut inner = self.inner.write().await;
            let revision = Self::next_revision(&mut inner);
            inner.sessions.insert(
                session_id.clone(),
                SessionRecord {
                    session_id: session_id.clone(),
                    user_id: user_id.to_string(),
                    data,
                    active: true,
                    revision,
                    created_at: now,
                    updated_at: now,
                },
            );
            inner
                .user_sessions
                .entry(user_id.to_string())
                .or_default()
                .insert(session_id.clone());
            SessionEvent {
                session_id: session_id.clone(),
                user_id: user_id.to_string(),
                kind: SessionEventKind::Created,
                revision,
            }
        };
        self.emit(event);

        tracing::debug!(user_id = %user_id, session_id = %session_id, "session created");
        Ok(session_id)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.sessions.get(session_id).cloned())
    }

    async fn get_user_sessions(&self, user_id: &str) -> Result<HashSet<String>> {
        let inner = self.inner.read().await;
        Ok(inner
            .user_sessions
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_session(&self, session_id: &str, partial: serde_json::Value) -> Result<bool> {
        let event = {
            let mut inner = self.inner.write().await;
            if !inner.sessions.contains_key(session_id) {
                return Ok(false);
            }
            let revision = Self::next_revision(&mut inner);
            let Some(record) = inner.sessions.get_mut(session_id) else {
                return Ok(false);
            };
            deep_merge(&mut record.data, partial);
            record.revision = revision;
            record.updated_at = Utc::now();
            SessionEvent {
                session_id: record.session_id.clone(),
                user_id: record.user_id.clone(),
                kind: SessionEventKind::Updated,
                revision,
            }
        };
        self.emit(event);
        Ok(true)
    }

    async fn close_session(&self, session_id: &str) -> Result<bool> {
        let event = {
            let mut inner = self.inner.write().await;
            if !inner.sessions.contains_key(session_id) {
                return Ok(false);
            }
            let revision = Self::next_revision(&mut inner);
            let Some(record) = inner.sessions.get_mut(session_id) else {
                return Ok(false);
            };
            record.active = false;
            record.revision = revision;
            record.updated_at = Utc::now();
            let user_id = record.user_id.clone();

            if let Some(ids) = inner.user_sessions.get_mut(&user_id) {
                ids.remove(session_id);
                if ids.is_empty() {
                    inner.user_sessions.remove(&user_id);
                }
            }
            SessionEvent {
                session_id: session_id.to_string(),
                user_id,
                kind: SessionEventKind::Closed,
                revision,
            }
        };
        self.emit(event);

        tracing::debug!(session_id = %session_id, "session closed");
        Ok(true)
    }

    async fn is_session_active(&self, session_id: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .sessions
            .get(session_id)
            .map(|r| r.active)
            .unwrap_or(false))
    }

    async fn clear_all(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.sessions.clear();
        inner.user_sessions.clear();
        Ok(())
    }

    async fn watch_sessions(&self, user_id: Option<&str>) -> Result<SessionEventStream> {
        let filter_user = user_id.map(str::to_string);
        let rx = self.tx.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
            Ok(event) => match &filter_user {
                Some(user) if event.user_id != *user => None,
                _ => Some(event),
            },
            Err(_) => None,
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    async fn next_event(stream: &mut SessionEventStream) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timed out waiting for session event")
            .expect("watch stream ended")
    }

    #[tokio::test]
    async fn test_create_get_update_roundtrip() {
        let store = MemorySessionStore::new();
        let s1 = store.create_session("u1", json!({"ws": "a"})).await.unwrap();

        let record = store.get_session(&s1).await.unwrap().unwrap();
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.data, json!({"ws": "a"}));
        assert!(record.active);

        assert!(store
            .update_session(&s1, json!({"ws": "b", "extra": 1}))
            .await
            .unwrap());
        let record = store.get_session(&s1).await.unwrap().unwrap();
        assert_eq!(record.data, json!({"ws": "b", "extra": 1}));
    }

    #[tokio::test]
    async fn test_deep_merge_preserves_siblings() {
        let store = MemorySessionStore::new();
        let s1 = store
            .create_session("u1", json!({"a": {"x": 1, "y": 2}}))
            .await
            .unwrap();

        assert!(store.update_session(&s1, json!({"a": {"x": 9}})).await.unwrap());
        let record = store.get_session(&s1).await.unwrap().unwrap();
        assert_eq!(record.data, json!({"a": {"x": 9, "y": 2}}));

        assert!(store
            .update_session(&s1, json!({"a": {"z": [1, 2, 3]}}))
            .await
            .unwrap());
        assert!(store.update_session(&s1, json!({"a": {"z": [4]}})).await.unwrap());
        let record = store.get_session(&s1).await.unwrap().unwrap();
        assert_eq!(record.data["a"]["z"], json!([4]));
    }

    #[tokio::test]
    async fn test_unknown_and_empty_ids_degrade() {
        let store = MemorySessionStore::new();
        assert!(store.get_session("").await.unwrap().is_none());
        assert!(store.get_session("nope").await.unwrap().is_none());
        assert!(!store.update_session("nope", json!({})).await.unwrap());
        assert!(!store.close_session("nope").await.unwrap());
        assert!(!store.is_session_active("").await.unwrap());
        assert!(store.get_user_sessions("ghost").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_index_isolation() {
        let store = MemorySessionStore::new();
        let a1 = store.create_session("u1", json!({})).await.unwrap();
        let _a2 = store.create_session("u1", json!({})).await.unwrap();
        let b1 = store.create_session("u2", json!({})).await.unwrap();

        let u1_sessions = store.get_user_sessions("u1").await.unwrap();
        let u2_sessions = store.get_user_sessions("u2").await.unwrap();
        assert_eq!(u1_sessions.len(), 2);
        assert_eq!(u2_sessions.len(), 1);
        assert!(u1_sessions.is_disjoint(&u2_sessions));

        assert!(store.close_session(&a1).await.unwrap());
        assert_eq!(store.get_user_sessions("u1").await.unwrap().len(), 1);
        assert_eq!(store.get_user_sessions("u2").await.unwrap().len(), 1);
        assert_eq!(
            store.get_session(&b1).await.unwrap().unwrap().user_id,
            "u2"
        );
    }

    #[tokio::test]
    async fn test_close_is_permanent() {
        let store = MemorySessionStore::new();
        let s1 = store.create_session("u1", json!({"k": 1})).await.unwrap();

        assert!(store.close_session(&s1).await.unwrap());
        assert!(!store.is_session_active(&s1).await.unwrap());
        assert!(!store.get_user_sessions("u1").await.unwrap().contains(&s1));

        // The record stays retrievable, and later updates do not resurrect it.
        assert!(store.update_session(&s1, json!({"k": 2})).await.unwrap());
        let record = store.get_session(&s1).await.unwrap().unwrap();
        assert!(!record.active);
        assert_eq!(record.data, json!({"k": 2}));
        assert!(!store.is_session_active(&s1).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_yield_distinct_ids() {
        let store = Arc::new(MemorySessionStore::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .create_session(&format!("u{}", i % 4), json!({"n": i}))
                    .await
                    .unwrap()
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()));
        }
        assert_eq!(ids.len(), 32);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(MemorySessionStore::new());
        let s1 = store.create_session("u1", json!({})).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let s1 = s1.clone();
            handles.push(tokio::spawn(async move {
                let mut patch = serde_json::Map::new();
                patch.insert(format!("field_{i}"), json!(i));
                assert!(store
                    .update_session(&s1, serde_json::Value::Object(patch))
                    .await
                    .unwrap());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.get_session(&s1).await.unwrap().unwrap();
        let data = record.data.as_object().unwrap();
        assert_eq!(data.len(), 16);
        for i in 0..16 {
            assert_eq!(data[&format!("field_{i}")], json!(i));
        }
    }

    #[tokio::test]
    async fn test_clear_all_resets_both_indices() {
        let store = MemorySessionStore::new();
        let s1 = store.create_session("u1", json!({})).await.unwrap();
        store.clear_all().await.unwrap();

        assert!(store.get_session(&s1).await.unwrap().is_none());
        assert!(store.get_user_sessions("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_emits_lifecycle_events() {
        let store = MemorySessionStore::new();
        let mut stream = store.watch_sessions(Some("u1")).await.unwrap();

        let s1 = store.create_session("u1", json!({})).await.unwrap();
        let _other = store.create_session("u2", json!({})).await.unwrap();
        store.update_session(&s1, json!({"k": 1})).await.unwrap();
        store.close_session(&s1).await.unwrap();

        let created = next_event(&mut stream).await;
        assert_eq!(created.kind, SessionEventKind::Created);
        assert_eq!(created.session_id, s1);

        // The u2 event is filtered out; next is the update.
        let updated = next_event(&mut stream).await;
        assert_eq!(updated.kind, SessionEventKind::Updated);
        assert!(updated.revision > created.revision);

        let closed = next_event(&mut stream).await;
        assert_eq!(closed.kind, SessionEventKind::Closed);
    }

    #[tokio::test]
    async fn test_attach_enforces_ownership() {
        let store = MemorySessionStore::new();
        let s1 = store.create_session("u1", json!({"k": 1})).await.unwrap();

        let owner = ExecutionContext::new("u1", "t1", "r1", "q1").unwrap();
        let attached = store.attach(&owner, &s1).await.unwrap().unwrap();
        assert_eq!(attached.session_id, s1);

        let intruder = ExecutionContext::new("u2", "t1", "r1", "q1").unwrap();
        let err = store.attach(&intruder, &s1).await.unwrap_err();
        assert!(matches!(err, ContextError::IsolationViolation { .. }));

        assert!(store.attach(&owner, "absent").await.unwrap().is_none());
    }
}
