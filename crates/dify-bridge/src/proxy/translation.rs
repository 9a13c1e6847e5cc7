//! Inbound request → backend envelope

use axum::http::HeaderMap;
use serde::Serialize;
use serde_json::json;

use super::openai::{ChatCompletionRequest, ChatMessage};
use super::session::{ConversationId, SessionKey, SessionStore};

/// Body of `POST {base}/chat/api/chat-messages`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BackendEnvelope {
    pub inputs: serde_json::Value,
    pub query: String,
    /// `null` starts a new conversation
    pub conversation_id: Option<String>,
    pub response_mode: &'static str,
}

impl BackendEnvelope {
    pub fn new(query: impl Into<String>, conversation_id: Option<&ConversationId>) -> Self {
        Self {
            inputs: json!({"web_search": ""}),
            query: query.into(),
            conversation_id: conversation_id.map(|c| c.as_str().to_string()),
            // Buffering for non-streaming callers happens locally
            response_mode: "streaming",
        }
    }
}

/// A translated turn, ready to dispatch
#[derive(Debug, Clone)]
pub struct BackendTurn {
    pub envelope: BackendEnvelope,
    pub session_key: SessionKey,
}

/// Maps inbound chat requests onto the backend's envelope
#[derive(Debug, Clone)]
pub struct RequestTranslator {
    session_header: String,
}

impl RequestTranslator {
    pub fn new(session_header: impl Into<String>) -> Self {
        Self {
            session_header: session_header.into(),
        }
    }

    /// Resolve the session key and build the envelope for this request
    pub async fn translate(
        &self,
        request: &ChatCompletionRequest,
        headers: &HeaderMap,
        sessions: &SessionStore,
    ) -> BackendTurn {
        let session_key = self.session_key(headers);
        let conversation_id = sessions.get(&session_key).await;
        let query = extract_user_query(&request.messages);

        tracing::debug!(
            session = %session_key,
            conversation = ?conversation_id.as_ref().map(|c| c.as_str()),
            query_len = query.len(),
            "Translated chat request"
        );

        BackendTurn {
            envelope: BackendEnvelope::new(query, conversation_id.as_ref()),
            session_key,
        }
    }

    fn session_key(&self, headers: &HeaderMap) -> SessionKey {
        headers
            .get(self.session_header.as_str())
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(SessionKey::from)
            .unwrap_or_else(SessionKey::generate)
    }
}

/// Content of the last user message, or an empty string when there is none
pub fn extract_user_query(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(ChatMessage::text)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn request(messages: serde_json::Value) -> ChatCompletionRequest {
        serde_json::from_value(json!({"messages": messages})).unwrap()
    }

    #[test]
    fn test_extract_last_user_message() {
        let req = request(json!([
            {"role": "system", "content": "be nice"},
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "answer"},
            {"role": "user", "content": "follow-up"},
            {"role": "assistant", "content": "trailing"}
        ]));
        assert_eq!(extract_user_query(&req.messages), "follow-up");
    }

    #[test]
    fn test_extract_without_user_message() {
        let req = request(json!([{"role": "system", "content": "be nice"}]));
        assert_eq!(extract_user_query(&req.messages), "");
        assert_eq!(extract_user_query(&[]), "");
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = BackendEnvelope::new("hi", None);
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "inputs": {"web_search": ""},
                "query": "hi",
                "conversation_id": null,
                "response_mode": "streaming"
            })
        );
    }

    #[tokio::test]
    async fn test_translate_uses_session_header() {
        let sessions = SessionStore::new();
        sessions
            .put(
                SessionKey::from("abc"),
                ConversationId::new("conv-9").unwrap(),
            )
            .await;

        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", HeaderValue::from_static("abc"));

        let translator = RequestTranslator::new("x-session-id");
        let turn = translator
            .translate(
                &request(json!([{"role": "user", "content": "hi"}])),
                &headers,
                &sessions,
            )
            .await;

        assert_eq!(turn.session_key.as_str(), "abc");
        assert_eq!(turn.envelope.conversation_id.as_deref(), Some("conv-9"));
        assert_eq!(turn.envelope.query, "hi");
    }

    #[tokio::test]
    async fn test_translate_header_name_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", HeaderValue::from_static("abc"));

        let translator = RequestTranslator::new("X-Session-Id");
        let turn = translator
            .translate(&request(json!([])), &headers, &SessionStore::new())
            .await;
        assert_eq!(turn.session_key.as_str(), "abc");
    }

    #[tokio::test]
    async fn test_translate_without_header_starts_fresh() {
        let translator = RequestTranslator::new("x-session-id");
        let sessions = SessionStore::new();
        let req = request(json!([{"role": "user", "content": "hi"}]));

        let a = translator.translate(&req, &HeaderMap::new(), &sessions).await;
        let b = translator.translate(&req, &HeaderMap::new(), &sessions).await;

        assert_ne!(a.session_key, b.session_key);
        assert!(a.envelope.conversation_id.is_none());
    }

    #[tokio::test]
    async fn test_translate_empty_header_starts_fresh() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", HeaderValue::from_static(""));

        let translator = RequestTranslator::new("x-session-id");
        let turn = translator
            .translate(&request(json!([])), &headers, &SessionStore::new())
            .await;
        assert!(!turn.session_key.as_str().is_empty());
    }
}
