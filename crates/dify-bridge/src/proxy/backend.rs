//! HTTP client for the portal's chat API

use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::error::ProxyError;
use super::session::ConversationId;
use super::translation::BackendEnvelope;
use crate::auth::CredentialBundle;
use crate::config::BackendConfig;
use crate::error::{BridgeError, Result};

/// Client for the chat-messages and conversations endpoints
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base_url: Url,
    credentials: Arc<CredentialBundle>,
    idle_timeout: Duration,
}

impl BackendClient {
    pub fn new(config: &BackendConfig, credentials: Arc<CredentialBundle>) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| BridgeError::Config(format!("Invalid backend base_url: {e}")))?;
        if base_url.scheme() != "http" && base_url.scheme() != "https" {
            return Err(BridgeError::Config(format!(
                "Unsupported backend scheme '{}': only http and https are allowed",
                base_url.scheme()
            )));
        }

        // No overall timeout; stalls are bounded per read by `idle_timeout`
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| BridgeError::Proxy(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            credentials,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        })
    }

    pub fn credentials(&self) -> &CredentialBundle {
        &self.credentials
    }

    /// Longest wait for response headers or the next body chunk
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Dispatch a turn. On success the returned response body is the
    /// backend's event stream, still unread.
    pub async fn send_chat(
        &self,
        envelope: &BackendEnvelope,
    ) -> std::result::Result<reqwest::Response, ProxyError> {
        let url = self.endpoint(&["chat", "api", "chat-messages"]);
        tracing::debug!("Dispatching chat turn to: {url}");

        let request = self
            .client
            .post(url)
            .headers(self.credentials.request_headers())
            .header(CONTENT_TYPE, "application/json")
            .json(envelope)
            .send();

        let response = tokio::time::timeout(self.idle_timeout, request)
            .await
            .map_err(|_| {
                ProxyError::Network(format!(
                    "Backend did not respond within {}s",
                    self.idle_timeout.as_secs()
                ))
            })?
            .map_err(network_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProxyError::Upstream {
                status: status.as_u16(),
                body: self.error_body(response).await,
            });
        }

        Ok(response)
    }

    /// Delete a conversation on the backend
    pub async fn delete_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<(), ProxyError> {
        let url = self.endpoint(&["chat", "api", "conversations", conversation_id.as_str()]);

        let mut headers = self.credentials.request_headers();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );

        let request = self.client.delete(url).headers(headers).send();
        let response = tokio::time::timeout(self.idle_timeout, request)
            .await
            .map_err(|_| ProxyError::Network("Delete request timed out".to_string()))?
            .map_err(network_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        Err(ProxyError::Upstream {
            status: status.as_u16(),
            body: self.error_body(response).await,
        })
    }

    /// Body of an error response, or empty if it cannot be read within
    /// `idle_timeout`
    async fn error_body(&self, response: reqwest::Response) -> String {
        match tokio::time::timeout(self.idle_timeout, response.text()).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                tracing::debug!("Failed to read error body: {e}");
                String::new()
            }
            Err(_) => {
                tracing::debug!("Error body not received within {:?}", self.idle_timeout);
                String::new()
            }
        }
    }
}

fn network_error(e: reqwest::Error) -> ProxyError {
    if e.is_timeout() {
        ProxyError::Network(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        ProxyError::Network(format!("Failed to connect to backend: {e}"))
    } else {
        ProxyError::Network(format!("Request failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RawBackend, RawReply, test_credentials};

    fn client(base_url: &str) -> Result<BackendClient> {
        let config = BackendConfig {
            base_url: base_url.to_string(),
            ..BackendConfig::default()
        };
        BackendClient::new(&config, Arc::new(test_credentials()))
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let c = client("https://portal.example.edu").unwrap();
        assert_eq!(
            c.endpoint(&["chat", "api", "chat-messages"]).as_str(),
            "https://portal.example.edu/chat/api/chat-messages"
        );
    }

    #[test]
    fn test_endpoint_with_base_path_and_trailing_slash() {
        let c = client("https://portal.example.edu/prefix/").unwrap();
        assert_eq!(
            c.endpoint(&["chat", "api", "conversations", "abc"]).as_str(),
            "https://portal.example.edu/prefix/chat/api/conversations/abc"
        );
    }

    #[test]
    fn test_endpoint_escapes_conversation_id() {
        let c = client("https://portal.example.edu").unwrap();
        let url = c.endpoint(&["chat", "api", "conversations", "a/b c"]);
        assert_eq!(
            url.as_str(),
            "https://portal.example.edu/chat/api/conversations/a%2Fb%20c"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(matches!(client("not a url"), Err(BridgeError::Config(_))));
        assert!(matches!(
            client("ftp://portal.example.edu"),
            Err(BridgeError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_error_body_read_is_bounded() {
        let backend = RawBackend::start(|_| {
            RawReply::truncated("500 Internal Server Error", 100, "partial")
        })
        .await
        .unwrap();
        let config = BackendConfig {
            base_url: backend.uri().to_string(),
            idle_timeout_secs: 1,
            ..BackendConfig::default()
        };
        let c = BackendClient::new(&config, Arc::new(test_credentials())).unwrap();
        let conversation = ConversationId::new("conv-1").unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            c.delete_conversation(&conversation),
        )
        .await
        .expect("delete must give up on a stalled error body");

        assert_eq!(
            result,
            Err(ProxyError::Upstream {
                status: 500,
                body: String::new()
            })
        );
        assert_eq!(backend.count("DELETE"), 1);
    }

    #[tokio::test]
    async fn test_send_chat_error_body_read_is_bounded() {
        let backend = RawBackend::start(|_| RawReply::truncated("502 Bad Gateway", 64, "{\"err"))
            .await
            .unwrap();
        let config = BackendConfig {
            base_url: backend.uri().to_string(),
            idle_timeout_secs: 1,
            ..BackendConfig::default()
        };
        let c = BackendClient::new(&config, Arc::new(test_credentials())).unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            c.send_chat(&BackendEnvelope::new("hi", None)),
        )
        .await
        .expect("dispatch must give up on a stalled error body");

        assert!(matches!(
            result,
            Err(ProxyError::Upstream { status: 502, ref body }) if body.is_empty()
        ));
    }
}
