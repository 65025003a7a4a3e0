pub mod error;
pub mod execution_context;
pub mod identity;
pub mod telemetry;
pub mod validation;

pub use error::ContextError;
pub use execution_context::{ExecutionContext, WEBSOCKET_CONTEXT_SOURCE};
pub use identity::{ContextAttributes, RequestIdentity};
pub use validation::{ValidationLimits, DEFAULT_MAX_OPERATION_DEPTH, FORBIDDEN_PLACEHOLDERS};
