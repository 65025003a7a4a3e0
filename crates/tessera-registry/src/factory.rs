use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use tessera_common::{ContextAttributes, ContextError, ExecutionContext};

use crate::error::RegistryError;
use crate::lifecycle::ConnectionLifecycleManager;
use crate::metrics::FactoryStats;
use crate::ConnectionRegistry;

pub const DEFAULT_MANAGER_PURPOSE: &str = "realtime";

/// One (user, purpose) slot: the authoritative registry plus the lifecycle
/// tracker composed with it.
#[derive(Debug, Clone)]
struct ManagerEntry {
    registry: Arc<ConnectionRegistry>,
    lifecycle: Arc<ConnectionLifecycleManager>,
}

/// Hands out per-user `ConnectionRegistry` instances and keeps factory-level
/// bookkeeping.
///
/// At most one manager is authoritative per (user, purpose) tuple at any
/// moment: creating a manager for an occupied slot installs the new instance
/// and deactivates the displaced one. Managers for different users are fully
/// independent; concurrent creation for the same user only ever races on the
/// atomic counters and the per-key map slot.
pub struct IsolatedManagerFactory {
    managers: DashMap<(String, String), ManagerEntry>,
    managers_created_total: AtomicU64,
    managers_cleaned_total: AtomicU64,
    retired_sent_total: AtomicU64,
    retired_failed_total: AtomicU64,
}

impl std::fmt::Debug for IsolatedManagerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolatedManagerFactory")
            .field("managers", &self.managers.len())
            .finish()
    }
}

impl IsolatedManagerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            managers: DashMap::new(),
            managers_created_total: AtomicU64::new(0),
            managers_cleaned_total: AtomicU64::new(0),
            retired_sent_total: AtomicU64::new(0),
            retired_failed_total: AtomicU64::new(0),
        })
    }

    /// Create a manager for the context's user under the default purpose.
    pub fn create_manager(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<Arc<ConnectionRegistry>, RegistryError> {
        self.create_manager_for_purpose(ctx, DEFAULT_MANAGER_PURPOSE)
    }

    /// Async entry point, observably equivalent to `create_manager`: same
    /// validation, same resulting manager shape.
    pub async fn create_manager_async(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<Arc<ConnectionRegistry>, RegistryError> {
        self.create_manager(ctx)
    }

    /// Validate loose context-like attributes, then create a manager. Missing
    /// required attributes fail before any manager is constructed.
    pub fn create_manager_from_attributes(
        &self,
        attributes: ContextAttributes,
    ) -> Result<Arc<ConnectionRegistry>, RegistryError> {
        let ctx = attributes
            .into_context()
            .map_err(RegistryError::FactoryInitialization)?;
        self.create_manager(&ctx)
    }

    pub fn create_manager_for_purpose(
        &self,
        ctx: &ExecutionContext,
        purpose: &str,
    ) -> Result<Arc<ConnectionRegistry>, RegistryError> {
        if !ctx.verify_isolation() {
            return Err(RegistryError::FactoryInitialization(ContextError::invalid(
                "context",
                "context failed isolation self-check",
            )));
        }

        let manager = ConnectionRegistry::new(ctx)?;
        let entry = ManagerEntry {
            registry: Arc::clone(&manager),
            lifecycle: Arc::new(ConnectionLifecycleManager::new()),
        };
        let key = (ctx.user_id().to_string(), purpose.to_string());
        if let Some(displaced) = self.managers.insert(key, entry) {
            self.retire(&displaced.registry);
        }
        self.managers_created_total.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            user_id = %ctx.user_id(),
            purpose = purpose,
            manager_id = %manager.manager_id(),
            "manager installed"
        );
        Ok(manager)
    }

    /// The currently authoritative manager for a (user, purpose) slot.
    pub fn active_manager(
        &self,
        user_id: &str,
        purpose: &str,
    ) -> Option<Arc<ConnectionRegistry>> {
        self.managers
            .get(&(user_id.to_string(), purpose.to_string()))
            .map(|entry| Arc::clone(&entry.value().registry))
    }

    /// The lifecycle tracker paired with the slot's registry.
    pub fn active_lifecycle(
        &self,
        user_id: &str,
        purpose: &str,
    ) -> Option<Arc<ConnectionLifecycleManager>> {
        self.managers
            .get(&(user_id.to_string(), purpose.to_string()))
            .map(|entry| Arc::clone(&entry.value().lifecycle))
    }

    /// Remove and deactivate a manager pair. Returns false when the slot is
    /// empty.
    pub fn release_manager(&self, user_id: &str, purpose: &str) -> bool {
        match self
            .managers
            .remove(&(user_id.to_string(), purpose.to_string()))
        {
            Some((_, entry)) => {
                self.retire(&entry.registry);
                true
            }
            None => false,
        }
    }

    fn retire(&self, manager: &ConnectionRegistry) {
        manager.deactivate();
        self.retired_sent_total
            .fetch_add(manager.messages_sent_total(), Ordering::Relaxed);
        self.retired_failed_total
            .fetch_add(manager.messages_failed_total(), Ordering::Relaxed);
        self.managers_cleaned_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Aggregate snapshot across live and retired managers.
    pub fn factory_stats(&self) -> FactoryStats {
        let mut events_sent_total = self.retired_sent_total.load(Ordering::Relaxed);
        let mut events_failed_total = self.retired_failed_total.load(Ordering::Relaxed);
        for entry in self.managers.iter() {
            events_sent_total += entry.value().registry.messages_sent_total();
            events_failed_total += entry.value().registry.messages_failed_total();
        }

        FactoryStats {
            managers_created_total: self.managers_created_total.load(Ordering::Relaxed),
            managers_active: self.managers.len(),
            managers_cleaned_total: self.managers_cleaned_total.load(Ordering::Relaxed),
            events_sent_total,
            events_failed_total,
        }
    }
}
