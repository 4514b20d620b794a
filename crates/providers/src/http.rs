//! HTTP plumbing shared by every adapter: client construction and the
//! status-code → `ProviderError` mapping.

use std::time::Duration;

use stockchat_core::error::ProviderError;
use tracing::warn;

/// Longest slice of an error body kept in `ProviderError::ApiError`.
const MAX_ERROR_BODY: usize = 500;

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("failed to create HTTP client: {e}")))
}

/// Map a failed `send()` into a transport error.
pub(crate) fn send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Turn a non-success response into the matching error, or pass it through.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    let error_body = response.text().await.unwrap_or_default();

    if status == 404 {
        warn!(provider, status, "Provider does not know the model or endpoint");
        return Err(ProviderError::ModelNotFound(
            truncate_utf8(&error_body, MAX_ERROR_BODY).to_string(),
        ));
    }

    warn!(provider, status, body = %truncate_utf8(&error_body, MAX_ERROR_BODY), "Provider returned error");
    Err(ProviderError::ApiError {
        status_code: status,
        message: truncate_utf8(&error_body, MAX_ERROR_BODY).to_string(),
    })
}

/// Decode a success body, reporting shape mismatches as malformed responses.
pub(crate) async fn decode_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let bytes = response.bytes().await.map_err(send_error)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {e}")))
}

/// Cut `s` to at most `max_bytes` without splitting a character.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
