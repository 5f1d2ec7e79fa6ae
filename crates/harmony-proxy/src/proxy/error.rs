//! Client-visible error handling for proxy operations
//!
//! - Request errors: the inbound body is unusable, 400
//! - Network errors: upstream unreachable or timed out, 502
//! - Invalid upstream responses: body is not JSON, 502
//! - Upstream errors: the upstream answered with an error status; JSON bodies
//!   are relayed as-is, anything else becomes a 502
//!
//! Errors inside an active stream never reach this module; the stream is
//! terminated instead (see `streaming`).

use axum::{
    Json,
    body::Body,
    http::{HeaderValue, Response, StatusCode, header},
    response::IntoResponse,
};
use thiserror::Error;

/// Errors that can occur while proxying one request
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    /// Inbound request body missing required structure
    #[error("Request error: {0}")]
    Request(String),

    /// Network-level error (connection, timeout, broken body)
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream answered successfully but the body was unusable
    #[error("Invalid upstream response: {0}")]
    InvalidUpstream(String),

    /// Upstream LLM API returned an error status
    #[error("Upstream error: {status}")]
    Upstream { status: StatusCode, body: String },
}

impl ProxyError {
    /// Map a `reqwest` transport error, distinguishing timeouts and refused connections
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ProxyError::Network(format!("Request timed out: {error}"))
        } else if error.is_connect() {
            ProxyError::Network(format!("Failed to connect to upstream: {error}"))
        } else {
            ProxyError::Network(format!("Request failed: {error}"))
        }
    }

    /// Convert to an HTTP response for the client
    pub fn into_response(self) -> Response<Body> {
        match self {
            ProxyError::Upstream { status, body } => {
                if serde_json::from_str::<serde_json::Value>(&body).is_err() {
                    let message = format!(
                        "Upstream returned {status} with a non-JSON body: {}",
                        excerpt(&body)
                    );
                    return error_response(StatusCode::BAD_GATEWAY, "upstream", &message);
                }

                // Pass through JSON upstream errors as-is
                let mut response = (status, body).into_response();
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                response
            }
            ProxyError::Request(_) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_request", &self.to_string())
            }
            _ => error_response(StatusCode::BAD_GATEWAY, self.category(), &self.to_string()),
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::Request(_) => "request",
            ProxyError::Network(_) => "network",
            ProxyError::InvalidUpstream(_) => "invalid_upstream",
            ProxyError::Upstream { .. } => "upstream",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        self.into_response()
    }
}

/// First few hundred characters of an upstream body, for error messages
fn excerpt(body: &str) -> &str {
    const MAX_EXCERPT_CHARS: usize = 200;

    let body = body.trim();
    match body.char_indices().nth(MAX_EXCERPT_CHARS) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}

/// Create a JSON error response
pub fn error_response(status: StatusCode, error_type: &str, message: &str) -> Response<Body> {
    let body = serde_json::json!({
        "error": {
            "type": error_type,
            "message": message,
        }
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_proxy_error_display() {
        let err = ProxyError::Request("body is not a JSON object".to_string());
        assert_eq!(err.to_string(), "Request error: body is not a JSON object");

        let err = ProxyError::Upstream {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "upstream down".to_string(),
        };
        assert_eq!(err.to_string(), "Upstream error: 503 Service Unavailable");
    }

    #[test]
    fn test_proxy_error_categories() {
        assert_eq!(ProxyError::Request("x".to_string()).category(), "request");
        assert_eq!(ProxyError::Network("x".to_string()).category(), "network");
        assert_eq!(
            ProxyError::InvalidUpstream("x".to_string()).category(),
            "invalid_upstream"
        );
        assert_eq!(
            ProxyError::Upstream {
                status: StatusCode::OK,
                body: String::new()
            }
            .category(),
            "upstream"
        );
    }

    #[tokio::test]
    async fn test_request_error_is_bad_request() {
        let response = ProxyError::Request("missing messages".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "invalid_request");
        assert!(json["error"]["message"].as_str().unwrap().contains("missing messages"));
    }

    #[tokio::test]
    async fn test_network_error_is_server_error() {
        let response = ProxyError::Network("connection refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "network");
    }

    #[tokio::test]
    async fn test_upstream_error_passes_through() {
        let response = ProxyError::Upstream {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: r#"{"error": "rate limited"}"#.to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("rate limited"));
    }

    #[tokio::test]
    async fn test_non_json_upstream_error_is_bad_gateway() {
        let response = ProxyError::Upstream {
            status: StatusCode::NOT_FOUND,
            body: "<html>Not Found</html>".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["type"], "upstream");
        let message = json["error"]["message"].as_str().unwrap();
        assert!(message.contains("404 Not Found"));
        assert!(message.contains("<html>Not Found</html>"));
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(500);
        assert_eq!(excerpt(&long).chars().count(), 200);
        assert_eq!(excerpt("  short  "), "short");
    }
}
