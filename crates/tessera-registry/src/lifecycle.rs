use std::collections::HashMap;

use dashmap::DashMap;
use serde::Serialize;

use crate::now_ms;

pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConnectionRegistration {
    pub user_id: String,
    pub registered_at_ms: u64,
}

/// Tracks when connections were registered and reaps the ones past a
/// staleness threshold.
///
/// This layer is deliberately permissive: `register_connection` records any
/// user id as advisory metadata and never rejects. Cross-user enforcement is
/// `ConnectionRegistry`'s job; this one is bookkeeping for the reaper.
#[derive(Debug, Default)]
pub struct ConnectionLifecycleManager {
    connections: DashMap<String, ConnectionRegistration>,
}

impl ConnectionLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection with the current timestamp. Always succeeds;
    /// re-registering refreshes the timestamp.
    pub fn register_connection(&self, connection_id: &str, user_id: &str) {
        self.register_connection_at(connection_id, user_id, now_ms());
    }

    fn register_connection_at(&self, connection_id: &str, user_id: &str, registered_at_ms: u64) {
        self.connections.insert(
            connection_id.to_string(),
            ConnectionRegistration {
                user_id: user_id.to_string(),
                registered_at_ms,
            },
        );
        tracing::debug!(
            connection_id = %connection_id,
            user_id = %user_id,
            "connection registered"
        );
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of every tracked registration.
    pub fn get_active_connections(&self) -> HashMap<String, ConnectionRegistration> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Remove registrations older than the threshold, returning how many
    /// were reaped. Safe to call concurrently with `register_connection`:
    /// entries registered after the cutoff are never removed, and each
    /// removal is counted once.
    pub fn cleanup_stale_connections(&self, threshold_secs: u64) -> usize {
        let cutoff = now_ms().saturating_sub(threshold_secs.saturating_mul(1000));
        let mut removed = 0usize;
        self.connections.retain(|_, registration| {
            if registration.registered_at_ms < cutoff {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            tracing::info!(removed, threshold_secs, "reaped stale connections");
        }
        removed
    }
}
