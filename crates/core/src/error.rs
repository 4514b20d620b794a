//! Error types for the stockchat domain.
//!
//! Uses `thiserror`. Each bounded context has its own error enum; the
//! orchestrator and tool registry turn them into terminal states or in-band
//! tool results rather than a shared top-level error.

use thiserror::Error;

/// Failures raised by a provider adapter.
///
/// Transport-level failures (network, auth, rate limit, timeout, non-2xx) are
/// distinct from malformed payloads; see [`ProviderError::is_retryable`].
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned neither content nor tool calls")]
    EmptyResponse,

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Whether the caller may reasonably retry the whole run later.
    ///
    /// Transport, authentication, rate-limit and timeout failures are
    /// retryable; a backend that answered with garbage is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::ApiError { status_code, .. } => {
                *status_code >= 500 || *status_code == 408 || *status_code == 409
            }
            ProviderError::RateLimited { .. }
            | ProviderError::AuthenticationFailed(_)
            | ProviderError::Timeout(_)
            | ProviderError::Network(_) => true,
            ProviderError::ModelNotFound(_)
            | ProviderError::NotConfigured(_)
            | ProviderError::EmptyResponse
            | ProviderError::MalformedResponse(_) => false,
        }
    }

    /// Stable machine-readable code for reporting to callers.
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::ApiError { .. } => "api_error",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::AuthenticationFailed(_) => "authentication_failed",
            ProviderError::ModelNotFound(_) => "model_not_found",
            ProviderError::NotConfigured(_) => "provider_not_configured",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Network(_) => "network_error",
            ProviderError::EmptyResponse => "empty_response",
            ProviderError::MalformedResponse(_) => "malformed_response",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Query rejected: {0}")]
    Rejected(String),

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Query timed out after {0}s")]
    Timeout(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        };
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert!(ProviderError::Network("refused".into()).is_retryable());
        assert!(ProviderError::Timeout("60s".into()).is_retryable());
        assert!(ProviderError::RateLimited { retry_after_secs: 5 }.is_retryable());
        assert!(ProviderError::AuthenticationFailed("bad key".into()).is_retryable());
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: "overloaded".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn content_errors_are_not_retryable() {
        assert!(!ProviderError::EmptyResponse.is_retryable());
        assert!(!ProviderError::MalformedResponse("no choices".into()).is_retryable());
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: "bad request".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = ToolError::ExecutionFailed {
            tool_name: "get_stock_detail".into(),
            reason: "database is locked".into(),
        };
        assert!(err.to_string().contains("get_stock_detail"));
        assert!(err.to_string().contains("locked"));
    }
}
