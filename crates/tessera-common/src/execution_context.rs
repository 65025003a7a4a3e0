use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::ContextError;
use crate::identity::RequestIdentity;
use crate::validation::{
    validate_identifier, validate_operation_depth, validate_websocket_client_id, ValidationLimits,
};

/// Tag recorded on contexts minted for realtime connections, so downstream
/// observability can tell websocket-originated work apart.
pub const WEBSOCKET_CONTEXT_SOURCE: &str = "websocket_ssot";

type CleanupFn = Box<dyn FnOnce() + Send>;

/// One user-scoped unit of work: an inbound request, a background operation,
/// or a derived sub-operation.
///
/// Immutable after construction. All fields are private and there are no
/// mutating methods, so reassignment of a constructed context is rejected by
/// the compiler rather than at runtime. The only interior state is the
/// cleanup callback list, which collaborators append to via `on_cleanup` and
/// which `cleanup` drains exactly once.
pub struct ExecutionContext {
    user_id: String,
    thread_id: String,
    run_id: String,
    request_id: String,
    parent_request_id: Option<String>,
    operation_depth: u32,
    created_at: DateTime<Utc>,
    agent_context: Map<String, Value>,
    audit_metadata: Map<String, Value>,
    websocket_client_id: Option<String>,
    cleanup_callbacks: Mutex<Vec<CleanupFn>>,
    limits: ValidationLimits,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("user_id", &self.user_id)
            .field("thread_id", &self.thread_id)
            .field("run_id", &self.run_id)
            .field("request_id", &self.request_id)
            .field("parent_request_id", &self.parent_request_id)
            .field("operation_depth", &self.operation_depth)
            .field("websocket_client_id", &self.websocket_client_id)
            .finish()
    }
}

impl ExecutionContext {
    /// Construct a root context from four caller-supplied identifiers.
    /// Every identifier is checked against the placeholder deny-list.
    pub fn new(
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Result<Self, ContextError> {
        let user_id = user_id.into();
        let thread_id = thread_id.into();
        let run_id = run_id.into();
        let request_id = request_id.into();

        validate_identifier("user_id", &user_id)?;
        validate_identifier("thread_id", &thread_id)?;
        validate_identifier("run_id", &run_id)?;
        validate_identifier("request_id", &request_id)?;

        Ok(Self {
            user_id,
            thread_id,
            run_id,
            request_id,
            parent_request_id: None,
            operation_depth: 0,
            created_at: Utc::now(),
            agent_context: Map::new(),
            audit_metadata: Map::new(),
            websocket_client_id: None,
            cleanup_callbacks: Mutex::new(Vec::new()),
            limits: ValidationLimits::from_env(),
        })
    }

    /// Build a context from an authenticated inbound request. Fails when the
    /// identity carries no authenticated user; thread/run/request ids are
    /// generated fresh.
    pub fn from_request(identity: &RequestIdentity) -> Result<Self, ContextError> {
        let user_id = identity
            .principal
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ContextError::invalid("user_id", "request carries no authenticated user")
            })?;

        Self::new(
            user_id,
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
        )
    }

    /// Build a context for a realtime connection. Generates a fresh websocket
    /// client id and tags both context bags for downstream observability.
    /// Every generated identifier is a v4 UUID, so concurrent invocations
    /// never collide.
    pub fn for_websocket(
        user_id: impl Into<String>,
        operation: &str,
    ) -> Result<Self, ContextError> {
        let ctx = Self::new(
            user_id,
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
        )?;

        let mut agent_context = Map::new();
        agent_context.insert("source".to_string(), Value::from(WEBSOCKET_CONTEXT_SOURCE));

        let mut audit_metadata = Map::new();
        audit_metadata.insert(
            "context_source".to_string(),
            Value::from(WEBSOCKET_CONTEXT_SOURCE),
        );
        audit_metadata.insert("operation".to_string(), Value::from(operation));

        ctx.with_agent_context(agent_context)
            .with_audit_metadata(audit_metadata)
            .with_websocket_client_id(format!("ws-{}", Uuid::new_v4()))
    }

    /// Attach agent context entries. Consumes and rebuilds the value; the map
    /// is owned by this context alone.
    pub fn with_agent_context(mut self, entries: Map<String, Value>) -> Self {
        self.agent_context.extend(entries);
        self
    }

    /// Attach audit metadata entries.
    pub fn with_audit_metadata(mut self, entries: Map<String, Value>) -> Self {
        self.audit_metadata.extend(entries);
        self
    }

    /// Associate a realtime connection id. The id is format-checked.
    pub fn with_websocket_client_id(
        mut self,
        client_id: impl Into<String>,
    ) -> Result<Self, ContextError> {
        let client_id = client_id.into();
        validate_websocket_client_id(&client_id)?;
        self.websocket_client_id = Some(client_id);
        Ok(self)
    }

    /// Derive a child context for a named sub-operation.
    ///
    /// The child carries the same user, a fresh request id, this context's
    /// request id as its parent, depth + 1, and its own copies of both
    /// context bags merged with the supplied extras. This context's bags are
    /// left untouched and are never aliased by the child.
    pub fn derive_child(
        &self,
        operation_name: &str,
        extra_agent_context: Option<Map<String, Value>>,
        extra_audit_metadata: Option<Map<String, Value>>,
    ) -> Result<Self, ContextError> {
        // A context must be valid before it can produce children.
        validate_operation_depth(self.operation_depth, self.limits)?;
        let child_depth = self.operation_depth + 1;
        validate_operation_depth(child_depth, self.limits)?;

        let mut agent_context = self.agent_context.clone();
        if let Some(extra) = extra_agent_context {
            agent_context.extend(extra);
        }

        let mut audit_metadata = self.audit_metadata.clone();
        audit_metadata.insert("operation".to_string(), Value::from(operation_name));
        if let Some(extra) = extra_audit_metadata {
            audit_metadata.extend(extra);
        }

        tracing::debug!(
            user_id = %self.user_id,
            parent_request_id = %self.request_id,
            operation = operation_name,
            depth = child_depth,
            "derived child context"
        );

        Ok(Self {
            user_id: self.user_id.clone(),
            thread_id: self.thread_id.clone(),
            run_id: self.run_id.clone(),
            request_id: Uuid::new_v4().to_string(),
            parent_request_id: Some(self.request_id.clone()),
            operation_depth: child_depth,
            created_at: Utc::now(),
            agent_context,
            audit_metadata,
            websocket_client_id: self.websocket_client_id.clone(),
            cleanup_callbacks: Mutex::new(Vec::new()),
            limits: self.limits,
        })
    }

    /// Cheap self-check: identifiers internally consistent, depth in range.
    /// Not a cross-context comparison.
    pub fn verify_isolation(&self) -> bool {
        !self.user_id.is_empty()
            && !self.thread_id.is_empty()
            && !self.run_id.is_empty()
            && !self.request_id.is_empty()
            && self.operation_depth <= self.limits.max_operation_depth
    }

    /// Register a teardown action. Actions run in reverse registration order
    /// when `cleanup` drains them.
    pub fn on_cleanup(&self, callback: impl FnOnce() + Send + 'static) {
        let mut callbacks = self
            .cleanup_callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        callbacks.push(Box::new(callback));
    }

    /// Drain and run registered cleanup callbacks, last-in-first-out.
    ///
    /// The registered set is taken under the lock, so any number of
    /// concurrent callers results in exactly one full drain; the others
    /// observe an already-empty list and return 0. Returns the number of
    /// callbacks executed by this caller.
    pub fn cleanup(&self) -> usize {
        let drained = {
            let mut callbacks = self
                .cleanup_callbacks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *callbacks)
        };

        let count = drained.len();
        for callback in drained.into_iter().rev() {
            callback();
        }

        if count > 0 {
            tracing::debug!(
                request_id = %self.request_id,
                callbacks = count,
                "execution context torn down"
            );
        }
        count
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn parent_request_id(&self) -> Option<&str> {
        self.parent_request_id.as_deref()
    }

    pub fn operation_depth(&self) -> u32 {
        self.operation_depth
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn agent_context(&self) -> &Map<String, Value> {
        &self.agent_context
    }

    pub fn audit_metadata(&self) -> &Map<String, Value> {
        &self.audit_metadata
    }

    pub fn websocket_client_id(&self) -> Option<&str> {
        self.websocket_client_id.as_deref()
    }

    /// Alias for the realtime connection association; always identical to
    /// `websocket_client_id`.
    pub fn websocket_connection_id(&self) -> Option<&str> {
        self.websocket_client_id()
    }
}
