use serde::{Deserialize, Serialize};

use crate::error::ContextError;
use crate::execution_context::ExecutionContext;

/// Authenticated identity attached to an inbound request by the
/// authentication collaborator. This subsystem never validates credentials,
/// only the shape of the resulting identity.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub principal: Option<String>,
}

impl RequestIdentity {
    pub fn authenticated(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { principal: None }
    }
}

/// Loose context-like attributes as they arrive off the wire or out of a
/// config bag, before validation. Converting into an `ExecutionContext`
/// enforces presence of every required attribute plus the usual identifier
/// checks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextAttributes {
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    pub run_id: Option<String>,
    pub request_id: Option<String>,
}

impl ContextAttributes {
    pub fn into_context(self) -> Result<ExecutionContext, ContextError> {
        let user_id = self
            .user_id
            .ok_or_else(|| ContextError::invalid("user_id", "missing required attribute"))?;
        let thread_id = self
            .thread_id
            .ok_or_else(|| ContextError::invalid("thread_id", "missing required attribute"))?;
        let run_id = self
            .run_id
            .ok_or_else(|| ContextError::invalid("run_id", "missing required attribute"))?;
        let request_id = self
            .request_id
            .ok_or_else(|| ContextError::invalid("request_id", "missing required attribute"))?;

        ExecutionContext::new(user_id, thread_id, run_id, request_id)
    }
}
