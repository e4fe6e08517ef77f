//! Error taxonomy shared by the dispatcher, the stream decoder, and the
//! service facades.
//!
//! Every failure of an outbound call is surfaced as exactly one
//! [`DispatchError`] variant. Nothing in this crate recovers silently: the
//! facades pass errors through unchanged and the store records
//! [`DispatchError::summary`] alongside `status = error`.
//!
//! | Variant | Meaning | Went over the wire? |
//! |---------|---------|---------------------|
//! | `AuthRequired` | no valid credential for an authenticated call | no |
//! | `InvalidRequest` | path or body rejected before send | no |
//! | `Network` | transport failure, no status obtained | maybe |
//! | `Client` | 4xx (or other non-2xx below 500) | yes |
//! | `Server` | 5xx | yes |
//! | `Decode` | success body does not match the expected shape | yes |
//! | `Stream` | streaming channel closed abnormally or was undecodable | yes |

use reqwest::StatusCode;

/// Maximum number of characters of a raw error body kept as detail.
const MAX_DETAIL_CHARS: usize = 512;

/// A classified failure of one dispatched call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The call requires authentication and no valid credential was
    /// available. The request was never sent.
    #[error("authentication required for {path}")]
    AuthRequired { path: String },

    /// The request could not be built: the path does not resolve against
    /// the base address or the body is not representable on the wire.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No response was obtained (connection refused, timeout, reset).
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The server rejected the request.
    #[error("client error {status}: {detail}")]
    Client { status: u16, detail: String },

    /// The server failed while handling the request.
    #[error("server error {status}: {detail}")]
    Server { status: u16, detail: String },

    /// A success response whose body does not match the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The streaming channel closed before completion or carried bytes
    /// that could not be decoded.
    #[error("stream error: {0}")]
    Stream(String),
}

impl DispatchError {
    /// Classify a non-success status and its body.
    ///
    /// 5xx maps to [`DispatchError::Server`]; everything else that is not a
    /// success maps to [`DispatchError::Client`].
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = extract_detail(status, body);
        if status.is_server_error() {
            DispatchError::Server {
                status: status.as_u16(),
                detail,
            }
        } else {
            DispatchError::Client {
                status: status.as_u16(),
                detail,
            }
        }
    }

    /// HTTP status of the failed response, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchError::Client { status, .. } | DispatchError::Server { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// True when a credential refresh could resolve the failure: either no
    /// credential was available or the server answered 401.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            DispatchError::AuthRequired { .. } | DispatchError::Client { status: 401, .. }
        )
    }

    /// Short human-readable description for display.
    pub fn summary(&self) -> String {
        match self {
            DispatchError::AuthRequired { .. } => "Sign in required".to_string(),
            DispatchError::InvalidRequest(msg) => format!("Invalid request: {}", msg),
            DispatchError::Network(_) => "Could not reach the service".to_string(),
            DispatchError::Client { detail, .. } => detail.clone(),
            DispatchError::Server { status, detail } => {
                format!("Service error ({}): {}", status, detail)
            }
            DispatchError::Decode(_) => "Unexpected response from the service".to_string(),
            DispatchError::Stream(msg) => format!("Response stream interrupted: {}", msg),
        }
    }
}

/// Pull the server-provided detail out of an error body.
///
/// Recognised shapes, in order: `{"detail": "..."}`,
/// `{"error": {"message": "..."}}`, `{"message": "..."}`. Anything else
/// falls back to the trimmed body text, or the canonical reason when the
/// body is empty.
fn extract_detail(status: StatusCode, body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let found = json
            .get("detail")
            .and_then(|d| d.as_str())
            .or_else(|| {
                json.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
            })
            .or_else(|| json.get("message").and_then(|m| m.as_str()));
        if let Some(detail) = found {
            return detail.to_string();
        }
        // FastAPI validation errors carry a structured `detail` array
        if let Some(detail) = json.get("detail") {
            return detail.to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
    }
    trimmed.chars().take(MAX_DETAIL_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_4xx_as_client() {
        let err =
            DispatchError::from_status(StatusCode::NOT_FOUND, r#"{"detail":"no such model"}"#);
        match err {
            DispatchError::Client { status, detail } => {
                assert_eq!(status, 404);
                assert_eq!(detail, "no such model");
            }
            other => panic!("expected client error, got {:?}", other),
        }
    }

    #[test]
    fn test_classifies_5xx_as_server() {
        let err = DispatchError::from_status(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(err, DispatchError::Server { status: 502, .. }));
        assert_eq!(err.status(), Some(502));
    }

    #[test]
    fn test_redirect_status_is_client() {
        let err = DispatchError::from_status(StatusCode::NOT_MODIFIED, "");
        assert!(matches!(err, DispatchError::Client { status: 304, .. }));
    }

    #[test]
    fn test_detail_from_nested_error() {
        let detail = extract_detail(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"bad_request","message":"k must be > 0"}}"#,
        );
        assert_eq!(detail, "k must be > 0");
    }

    #[test]
    fn test_detail_from_validation_array() {
        let detail = extract_detail(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"detail":[{"loc":["body","N"],"msg":"field required"}]}"#,
        );
        assert!(detail.contains("field required"));
    }

    #[test]
    fn test_empty_body_uses_reason() {
        let detail = extract_detail(StatusCode::SERVICE_UNAVAILABLE, "  ");
        assert_eq!(detail, "Service Unavailable");
    }

    #[test]
    fn test_long_body_truncated() {
        let body = "x".repeat(2000);
        let detail = extract_detail(StatusCode::BAD_REQUEST, &body);
        assert_eq!(detail.len(), MAX_DETAIL_CHARS);
    }

    #[test]
    fn test_unauthorized_covers_both_forms() {
        let missing = DispatchError::AuthRequired {
            path: "/crops/predict".to_string(),
        };
        let rejected = DispatchError::from_status(StatusCode::UNAUTHORIZED, "");
        let forbidden = DispatchError::from_status(StatusCode::FORBIDDEN, "");
        assert!(missing.is_unauthorized());
        assert!(rejected.is_unauthorized());
        assert!(!forbidden.is_unauthorized());
        assert_eq!(missing.status(), None);
    }

    #[test]
    fn test_client_summary_is_server_detail() {
        let err =
            DispatchError::from_status(StatusCode::BAD_REQUEST, r#"{"detail":"ph out of range"}"#);
        assert_eq!(err.summary(), "ph out of range");
    }
}
