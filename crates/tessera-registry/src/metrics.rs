use serde::Serialize;

/// Point-in-time snapshot of one manager's state and accumulated counters.
/// Serializable for the observability sink; this subsystem never transmits
/// it anywhere itself.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ManagerStats {
    pub user_id: String,
    pub manager_id: String,
    pub active: bool,
    pub connection_count: usize,
    pub recovery_queue_depth: usize,
    pub created_at_ms: u64,
    pub connections_managed_total: u64,
    pub messages_sent_total: u64,
    pub messages_failed_total: u64,
    pub recovery_dropped_total: u64,
}

/// Factory-wide aggregates across live and retired managers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FactoryStats {
    pub managers_created_total: u64,
    pub managers_active: usize,
    pub managers_cleaned_total: u64,
    pub events_sent_total: u64,
    pub events_failed_total: u64,
}
