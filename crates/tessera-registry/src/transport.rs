use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// Transport-level readiness of a connection's underlying client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Error)]
#[error("delivery failed: {reason}")]
pub struct DeliveryError {
    pub reason: String,
}

/// Seam to the transport collaborator. The registry only ever asks for
/// readiness and hands payloads over; framing, retries and deadlines live on
/// the other side of this trait.
pub trait ConnectionTransport: Send + Sync {
    fn client_state(&self) -> ClientState;

    fn deliver(&self, payload: &Value) -> Result<(), DeliveryError>;
}

/// One live bidirectional-stream connection, tagged with its owning user.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub connection_id: String,
    pub user_id: String,
    pub transport: Arc<dyn ConnectionTransport>,
}

impl ConnectionHandle {
    pub fn new(
        connection_id: impl Into<String>,
        user_id: impl Into<String>,
        transport: Arc<dyn ConnectionTransport>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            user_id: user_id.into(),
            transport,
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connection_id", &self.connection_id)
            .field("user_id", &self.user_id)
            .finish()
    }
}
