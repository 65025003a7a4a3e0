use thiserror::Error;

/// Errors raised at context construction, derivation, or attachment time.
/// Missing-data conditions are never represented here; stores use
/// `Option`/`bool` returns for those.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A required identifier is empty, matches the placeholder deny-list,
    /// the operation depth is out of range, or an optional field failed its
    /// format check. Raised synchronously at construction/derivation, never
    /// later during use.
    #[error("invalid context: {field}: {reason}")]
    InvalidContext { field: &'static str, reason: String },

    /// A mutable user-owned resource was attached to a context belonging to a
    /// different user. Raised at the point of the second context's attachment.
    #[error("context isolation violated for user '{user_id}': {reason}")]
    IsolationViolation { user_id: String, reason: String },
}

impl ContextError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ContextError::InvalidContext {
            field,
            reason: reason.into(),
        }
    }
}
