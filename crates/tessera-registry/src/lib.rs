use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use tessera_common::{ContextError, ExecutionContext};

pub mod error;
pub mod factory;
pub mod lifecycle;
pub mod metrics;
pub mod transport;

pub use error::RegistryError;
pub use factory::{IsolatedManagerFactory, DEFAULT_MANAGER_PURPOSE};
pub use lifecycle::{
    ConnectionLifecycleManager, ConnectionRegistration, DEFAULT_STALE_THRESHOLD_SECS,
};
pub use metrics::{FactoryStats, ManagerStats};
pub use transport::{ClientState, ConnectionHandle, ConnectionTransport, DeliveryError};

/// Reason recorded on recovery entries queued because the target user had no
/// live connections at send time.
pub const FAILURE_NO_CONNECTIONS: &str = "no_connections";

const DEFAULT_RECOVERY_QUEUE_LIMIT: usize = 256;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// An undeliverable message buffered for the external delivery-retry
/// collaborator. The queue only buffers, it never re-sends.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryQueueEntry {
    pub payload: Value,
    pub failure_reason: String,
    pub enqueued_at_ms: u64,
}

/// Outcome of one `send_to_user` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub failed: usize,
    pub queued: bool,
}

/// Per-user collection of live connection handles.
///
/// A registry is bound to exactly one user at construction. Every operation
/// that names a user is checked against the binding; cross-user writes are
/// isolation violations and leave the registry untouched. Registries for
/// different users share no state, so sends to different users never block
/// on each other.
pub struct ConnectionRegistry {
    user_id: String,
    manager_id: String,
    active: AtomicBool,
    created_at_ms: u64,
    connections: DashMap<String, ConnectionHandle>,
    recovery_queue: Mutex<VecDeque<RecoveryQueueEntry>>,
    recovery_queue_limit: usize,
    connections_managed_total: AtomicU64,
    messages_sent_total: AtomicU64,
    messages_failed_total: AtomicU64,
    recovery_dropped_total: AtomicU64,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("user_id", &self.user_id)
            .field("manager_id", &self.manager_id)
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl ConnectionRegistry {
    /// Construct a registry bound to the context's user. The context is
    /// re-checked before the binding is taken.
    pub fn new(ctx: &ExecutionContext) -> Result<Arc<Self>, RegistryError> {
        if !ctx.verify_isolation() {
            return Err(RegistryError::InvalidContext(ContextError::invalid(
                "context",
                "context failed isolation self-check",
            )));
        }

        let recovery_queue_limit = std::env::var("TESSERA_RECOVERY_QUEUE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_RECOVERY_QUEUE_LIMIT);

        let manager_id = Uuid::new_v4().to_string();
        tracing::info!(
            user_id = %ctx.user_id(),
            manager_id = %manager_id,
            "connection registry created"
        );

        Ok(Arc::new(Self {
            user_id: ctx.user_id().to_string(),
            manager_id,
            active: AtomicBool::new(true),
            created_at_ms: now_ms(),
            connections: DashMap::new(),
            recovery_queue: Mutex::new(VecDeque::new()),
            recovery_queue_limit,
            connections_managed_total: AtomicU64::new(0),
            messages_sent_total: AtomicU64::new(0),
            messages_failed_total: AtomicU64::new(0),
            recovery_dropped_total: AtomicU64::new(0),
        }))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn manager_id(&self) -> &str {
        &self.manager_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Mark this instance no longer authoritative. Used by the factory when
    /// a newer manager takes over the (user, purpose) slot.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Relaxed);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Register a live connection. The handle must carry the bound user.
    pub fn add_connection(&self, handle: ConnectionHandle) -> Result<(), RegistryError> {
        if handle.user_id != self.user_id {
            tracing::warn!(
                bound = %self.user_id,
                target = %handle.user_id,
                connection_id = %handle.connection_id,
                "rejected cross-user connection registration"
            );
            return Err(RegistryError::IsolationViolation {
                bound: self.user_id.clone(),
                target: handle.user_id,
            });
        }

        tracing::debug!(
            user_id = %self.user_id,
            connection_id = %handle.connection_id,
            "connection added"
        );
        self.connections
            .insert(handle.connection_id.clone(), handle);
        self.connections_managed_total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn remove_connection(&self, connection_id: &str) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    /// Send a payload to every live connection of the bound user.
    ///
    /// A registry may only ever originate sends to its own user. With zero
    /// live connections the payload is buffered on the bounded recovery
    /// queue instead of being dropped silently.
    pub fn send_to_user(
        &self,
        target_user_id: &str,
        payload: Value,
    ) -> Result<DeliveryReport, RegistryError> {
        if target_user_id != self.user_id {
            return Err(RegistryError::IsolationViolation {
                bound: self.user_id.clone(),
                target: target_user_id.to_string(),
            });
        }

        if self.connections.is_empty() {
            self.enqueue_recovery(payload, FAILURE_NO_CONNECTIONS);
            self.messages_failed_total.fetch_add(1, Ordering::Relaxed);
            return Ok(DeliveryReport {
                sent: 0,
                failed: 0,
                queued: true,
            });
        }

        let mut report = DeliveryReport::default();
        for entry in self.connections.iter() {
            match entry.value().transport.deliver(&payload) {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    tracing::warn!(
                        user_id = %self.user_id,
                        connection_id = %entry.key(),
                        error = %err,
                        "delivery failed"
                    );
                    report.failed += 1;
                }
            }
        }

        self.messages_sent_total
            .fetch_add(report.sent as u64, Ordering::Relaxed);
        self.messages_failed_total
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        Ok(report)
    }

    /// Whether the candidate user currently has registered connections here.
    /// Always false for any user other than the bound one; cross-user
    /// queries are negative, never errors.
    pub fn is_connection_active(&self, candidate_user_id: &str) -> bool {
        candidate_user_id == self.user_id && !self.connections.is_empty()
    }

    /// False when empty; otherwise true only if at least one connection's
    /// transport reports a live client. A non-empty registry whose
    /// transports are all closed is unhealthy.
    pub fn health_check(&self) -> bool {
        if self.connections.is_empty() {
            return false;
        }
        self.connections
            .iter()
            .any(|entry| entry.value().transport.client_state() == ClientState::Open)
    }

    fn enqueue_recovery(&self, payload: Value, failure_reason: &str) {
        let mut queue = self
            .recovery_queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if queue.len() >= self.recovery_queue_limit {
            queue.pop_front();
            self.recovery_dropped_total.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(RecoveryQueueEntry {
            payload,
            failure_reason: failure_reason.to_string(),
            enqueued_at_ms: now_ms(),
        });
        tracing::warn!(
            user_id = %self.user_id,
            reason = failure_reason,
            depth = queue.len(),
            "message buffered on recovery queue"
        );
    }

    pub fn recovery_queue_depth(&self) -> usize {
        self.recovery_queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Hand the buffered entries to the external delivery-retry collaborator.
    pub fn drain_recovery_queue(&self) -> Vec<RecoveryQueueEntry> {
        let mut queue = self
            .recovery_queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queue.drain(..).collect()
    }

    pub fn connections_managed_total(&self) -> u64 {
        self.connections_managed_total.load(Ordering::Relaxed)
    }

    pub fn messages_sent_total(&self) -> u64 {
        self.messages_sent_total.load(Ordering::Relaxed)
    }

    pub fn messages_failed_total(&self) -> u64 {
        self.messages_failed_total.load(Ordering::Relaxed)
    }

    pub fn recovery_dropped_total(&self) -> u64 {
        self.recovery_dropped_total.load(Ordering::Relaxed)
    }

    pub fn manager_stats(&self) -> ManagerStats {
        ManagerStats {
            user_id: self.user_id.clone(),
            manager_id: self.manager_id.clone(),
            active: self.is_active(),
            connection_count: self.connections.len(),
            recovery_queue_depth: self.recovery_queue_depth(),
            created_at_ms: self.created_at_ms,
            connections_managed_total: self.connections_managed_total(),
            messages_sent_total: self.messages_sent_total(),
            messages_failed_total: self.messages_failed_total(),
            recovery_dropped_total: self.recovery_dropped_total(),
        }
    }
}
