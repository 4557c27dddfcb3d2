//! Generation handle and lifecycle types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one in-flight assistant response.
///
/// `message_id` is the local placeholder id. `remote_id` is the id the
/// backend assigned to the reply, bound once the send is acknowledged; streamed
/// chunks are correlated against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationHandle {
    pub id: String,
    pub conversation_id: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl GenerationHandle {
    pub fn new(conversation_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            remote_id: None,
        }
    }

    /// Whether a streamed message id belongs to this generation.
    ///
    /// Before the backend assigned an id any message id is accepted.
    pub fn matches_remote(&self, message_id: &str) -> bool {
        match &self.remote_id {
            Some(remote) => remote == message_id || self.message_id == message_id,
            None => true,
        }
    }
}

/// Lifecycle state of the generation slot of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    #[default]
    Idle,
    Generating,
    Completed,
    Stopped,
    Failed,
}

impl GenerationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

/// Context a generation is started with: the user turn it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptContext {
    pub user_message_id: String,
    pub content: String,
}
