//! Session tracking for multi-turn conversations
//!
//! Callers identify a session with an opaque key. The backend assigns its own
//! conversation id on the first turn; the store remembers which conversation
//! each session key maps to so later turns continue it.

use std::collections::HashMap;
use tokio::sync::Mutex as TokioMutex;
use uuid::Uuid;

/// Caller-supplied session key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// A fresh, random key. Requests without a session header get one of
    /// these, so they never continue an earlier conversation.
    pub fn generate() -> Self {
        SessionKey(Uuid::new_v4().to_string())
    }

    /// Get the session key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        SessionKey(value.to_string())
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        SessionKey(value)
    }
}

impl AsRef<str> for SessionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend-assigned conversation id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap a backend value; empty strings mean "no conversation"
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            None
        } else {
            Some(ConversationId(value))
        }
    }

    /// Get the conversation id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

impl AsRef<str> for ConversationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-lifetime map from session key to conversation id
///
/// Last write wins and nothing expires. An id removed on the backend side
/// stays mapped until the next `put` for the same key.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: TokioMutex<HashMap<SessionKey, ConversationId>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversation currently mapped to `key`
    pub async fn get(&self, key: &SessionKey) -> Option<ConversationId> {
        self.sessions.lock().await.get(key).cloned()
    }

    /// Map `key` to `conversation_id`, replacing any previous mapping
    pub async fn put(&self, key: SessionKey, conversation_id: ConversationId) {
        let previous = self
            .sessions
            .lock()
            .await
            .insert(key.clone(), conversation_id.clone());

        match previous {
            Some(old) if old != conversation_id => tracing::debug!(
                session = %key,
                old = %old,
                new = %conversation_id,
                "Session moved to a new conversation"
            ),
            Some(_) => {}
            None => tracing::debug!(
                session = %key,
                conversation = %conversation_id,
                "Session bound to conversation"
            ),
        }
    }

    /// Number of tracked sessions
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Returns true if no sessions are tracked
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
