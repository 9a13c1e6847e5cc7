//! Errors surfaced to the caller of the chat endpoint
//!
//! Only backend dispatch failures reach the caller. Once the backend has
//! accepted a turn, stream problems end the relay instead of failing the
//! request, and reaping failures are logged and dropped.

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use thiserror::Error;

/// Errors that can occur while dispatching a turn to the backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProxyError {
    /// Backend answered with a non-success status
    #[error("Backend returned {status}")]
    Upstream { status: u16, body: String },

    /// Network-level error (connection, timeout, etc.)
    #[error("Network error: {0}")]
    Network(String),

    /// Building or sending the request failed locally
    #[error("Request error: {0}")]
    Request(String),
}

impl ProxyError {
    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::Upstream { .. } => "upstream",
            ProxyError::Network(_) => "network",
            ProxyError::Request(_) => "request",
        }
    }

    fn details(&self) -> String {
        match self {
            ProxyError::Upstream { body, .. } => body.clone(),
            ProxyError::Network(msg) | ProxyError::Request(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response<Body> {
        tracing::error!(
            error_type = self.category(),
            error_message = %self,
            "Backend dispatch failed"
        );

        let body = serde_json::json!({
            "error": self.to_string(),
            "details": self.details(),
        });

        Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upstream_error_surfaces_status_and_body() {
        let err = ProxyError::Upstream {
            status: 401,
            body: r#"{"code":"unauthorized"}"#.to_string(),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"], "Backend returned 401");
        assert_eq!(json["details"], r#"{"code":"unauthorized"}"#);
    }

    #[tokio::test]
    async fn test_network_error_is_server_error() {
        let response = ProxyError::Network("connection refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"], "Network error: connection refused");
        assert_eq!(json["details"], "connection refused");
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            ProxyError::Upstream {
                status: 500,
                body: String::new()
            }
            .category(),
            "upstream"
        );
        assert_eq!(ProxyError::Network(String::new()).category(), "network");
        assert_eq!(ProxyError::Request(String::new()).category(), "request");
    }
}
