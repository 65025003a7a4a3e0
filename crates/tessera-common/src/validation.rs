use crate::error::ContextError;

/// Identifier values that must never reach production paths. Matched
/// case-insensitively, exact or as a prefix, so compound forms like
/// "placeholder_value" are caught too.
pub const FORBIDDEN_PLACEHOLDERS: &[&str] = &[
    "placeholder",
    "default",
    "temp",
    "none",
    "null",
    "test",
    "mock",
    "dummy",
    "xxx",
];

pub const DEFAULT_MAX_OPERATION_DEPTH: u32 = 16;

/// Bounds applied when validating a context. Defaults are compiled in;
/// `from_env` lets deployments override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_operation_depth: u32,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_operation_depth: DEFAULT_MAX_OPERATION_DEPTH,
        }
    }
}

impl ValidationLimits {
    pub fn from_env() -> Self {
        let max_operation_depth = std::env::var("TESSERA_MAX_OPERATION_DEPTH")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_OPERATION_DEPTH);
        Self {
            max_operation_depth,
        }
    }
}

/// Reject empty and placeholder identifiers.
pub fn validate_identifier(field: &'static str, value: &str) -> Result<(), ContextError> {
    if value.trim().is_empty() {
        return Err(ContextError::invalid(field, "identifier must not be empty"));
    }
    let lowered = value.to_ascii_lowercase();
    for forbidden in FORBIDDEN_PLACEHOLDERS {
        if lowered.starts_with(forbidden) {
            return Err(ContextError::invalid(
                field,
                format!("identifier '{value}' matches forbidden placeholder '{forbidden}'"),
            ));
        }
    }
    Ok(())
}

/// Depth is unsigned, so only the upper bound needs checking here.
pub fn validate_operation_depth(depth: u32, limits: ValidationLimits) -> Result<(), ContextError> {
    if depth > limits.max_operation_depth {
        return Err(ContextError::invalid(
            "operation_depth",
            format!(
                "depth {depth} exceeds maximum nesting limit {}",
                limits.max_operation_depth
            ),
        ));
    }
    Ok(())
}

/// Websocket client ids are opaque but must be non-empty and free of
/// embedded whitespace.
pub fn validate_websocket_client_id(value: &str) -> Result<(), ContextError> {
    if value.is_empty() {
        return Err(ContextError::invalid(
            "websocket_client_id",
            "websocket client id must not be empty",
        ));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ContextError::invalid(
            "websocket_client_id",
            format!("websocket client id '{value}' contains whitespace"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_identifier_rejected() {
        assert!(validate_identifier("user_id", "").is_err());
        assert!(validate_identifier("user_id", "   ").is_err());
    }

    #[test]
    fn test_placeholder_identifiers_rejected() {
        for value in ["placeholder", "default", "temp", "none", "null", "test", "mock", "dummy", "xxx"] {
            assert!(validate_identifier("user_id", value).is_err(), "{value} should be rejected");
        }
    }

    #[test]
    fn test_placeholder_prefix_and_case_rejected() {
        assert!(validate_identifier("user_id", "placeholder_value").is_err());
        assert!(validate_identifier("user_id", "PLACEHOLDER").is_err());
        assert!(validate_identifier("user_id", "Test-123").is_err());
        assert!(validate_identifier("user_id", "dummy_user").is_err());
    }

    #[test]
    fn test_uuid_like_identifiers_accepted() {
        for _ in 0..8 {
            let id = uuid::Uuid::new_v4().to_string();
            assert!(validate_identifier("user_id", &id).is_ok(), "{id} should pass");
        }
        assert!(validate_identifier("user_id", "alice@example.com").is_ok());
        assert!(validate_identifier("user_id", "u-42").is_ok());
    }

    #[test]
    fn test_depth_bounds() {
        let limits = ValidationLimits::default();
        assert!(validate_operation_depth(0, limits).is_ok());
        assert!(validate_operation_depth(limits.max_operation_depth, limits).is_ok());
        assert!(validate_operation_depth(limits.max_operation_depth + 1, limits).is_err());
    }

    #[test]
    fn test_websocket_client_id_format() {
        assert!(validate_websocket_client_id("ws-abc123").is_ok());
        assert!(validate_websocket_client_id("").is_err());
        assert!(validate_websocket_client_id("ws abc").is_err());
        assert!(validate_websocket_client_id("ws\tabc").is_err());
    }
}
