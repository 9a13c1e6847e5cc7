//! Conversation cleanup after each turn
//!
//! Deletion is best-effort: the caller already has its answer, so a failed
//! delete is logged and dropped, never retried.

use std::sync::Arc;
use tracing::{error, info};

use super::backend::BackendClient;
use super::session::ConversationId;

/// What happened when a turn's conversation was reaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// Automatic deletion is turned off
    Disabled,
    /// The turn never learned a conversation id
    NoConversation,
    /// Backend confirmed the deletion
    Deleted,
    /// Deletion failed and was logged
    Failed,
}

/// Deletes backend conversations once a turn ends
#[derive(Debug, Clone)]
pub struct ConversationReaper {
    backend: Arc<BackendClient>,
    enabled: bool,
}

impl ConversationReaper {
    pub fn new(backend: Arc<BackendClient>, enabled: bool) -> Self {
        Self { backend, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Delete the conversation, if enabled and known
    pub async fn reap(&self, conversation_id: Option<&ConversationId>) -> ReapOutcome {
        if !self.enabled {
            return ReapOutcome::Disabled;
        }
        let Some(conversation_id) = conversation_id else {
            return ReapOutcome::NoConversation;
        };

        match self.backend.delete_conversation(conversation_id).await {
            Ok(()) => {
                info!("Successfully deleted conversation: {}", conversation_id);
                ReapOutcome::Deleted
            }
            Err(e) => {
                error!(
                    conversation = %conversation_id,
                    error_type = e.category(),
                    error_message = %e,
                    "Failed to delete conversation"
                );
                ReapOutcome::Failed
            }
        }
    }
}
