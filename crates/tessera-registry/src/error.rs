use thiserror::Error;

use tessera_common::ContextError;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// An operation targeted a user other than the one this registry is
    /// bound to. The registry's state is left unchanged.
    #[error("isolation violation: manager bound to user '{bound}' received operation for '{target}'")]
    IsolationViolation { bound: String, target: String },

    /// The context supplied when constructing a registry failed validation.
    #[error("invalid manager context: {0}")]
    InvalidContext(#[from] ContextError),

    /// Factory-level validation failed before any manager was constructed.
    #[error("factory initialization failed: {0}")]
    FactoryInitialization(ContextError),
}
