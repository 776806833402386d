// =============================================================================
// Echo-Bridge token authentication — Axum extractor
// =============================================================================
//
// Extracts and validates the `X-Echo-Bridge-Token` header against the
// engine's configured `PRISM_ECHO_TOKEN`. Comparison is constant-time to
// avoid a timing side-channel, even though this transport is development-only
// and loopback-bound by default.
//
// async fn handler(EchoBridgeToken(_): EchoBridgeToken, ...) { ... }
//
// A missing or wrong token short-circuits with 401 before the handler body
// runs.
// =============================================================================

use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::warn;

const TOKEN_HEADER: &str = "x-echo-bridge-token";

/// Compare two byte slices in constant time.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Axum extractor that validates the `X-Echo-Bridge-Token` header against
/// the token configured in [`crate::config::Config`].
pub struct EchoBridgeToken;

pub struct AuthRejection {
    status: StatusCode,
    message: &'static str,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({"error": self.message});
        (self.status, axum::Json(body)).into_response()
    }
}

#[async_trait]
impl FromRequestParts<crate::transport::http::HttpState> for EchoBridgeToken {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &crate::transport::http::HttpState,
    ) -> Result<Self, Self::Rejection> {
        let expected = state.echo_token.as_str();

        let presented = parts
        .headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

        if presented.is_empty() || !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            warn!("rejected request with missing or invalid echo-bridge token");
            return Err(AuthRejection {
                    status: StatusCode::UNAUTHORIZED,
                    message: "missing or invalid X-Echo-Bridge-Token",
                });
        }

        Ok(EchoBridgeToken)
    }
}

/// Validate a token presented out-of-band, e.g. as an SSE query parameter
/// where a header extractor isn't usable.
pub fn validate_token(presented: &str, expected: &str) -> bool {
    !expected.is_empty() && constant_time_eq(presented.as_bytes(), expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_identical() {
        assert!(constant_time_eq(b"hello", b"hello"));
    }

    #[test]
    fn constant_time_eq_different() {
        assert!(!constant_time_eq(b"hello", b"world"));
    }

    #[test]
    fn constant_time_eq_different_lengths() {
        assert!(!constant_time_eq(b"short", b"longer_string"));
    }

    #[test]
    fn validate_token_rejects_empty_expected() {
        assert!(!validate_token("anything", ""));
    }

    #[test]
    fn validate_token_accepts_matching_pair() {
        assert!(validate_token("secret", "secret"));
    }
}
