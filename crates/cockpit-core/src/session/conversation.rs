//! Conversation domain model.
//!
//! A conversation is a server-tracked sequence of messages identified by a
//! session id. The client keeps a cached copy per id plus a lightweight
//! summary for the known-set listing.

use super::message::{Message, MessageRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const PREVIEW_CHARS: usize = 80;

/// A conversation with its ordered message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub session_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub last_active_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default)]
    pub escalated: bool,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            last_active_at: Utc::now(),
            rating: None,
            escalated: false,
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn pending_assistant_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.is_pending_assistant())
            .count()
    }

    /// The user turn preceding the most recent assistant message.
    pub fn last_user_turn(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_user())
    }

    pub fn summary(&self) -> ConversationSummary {
        let preview = self
            .messages
            .iter()
            .rev()
            .find(|m| m.from == MessageRole::User)
            .or_else(|| self.messages.last())
            .map(|m| m.content.chars().take(PREVIEW_CHARS).collect())
            .unwrap_or_default();

        ConversationSummary {
            session_id: self.session_id.clone(),
            last_active_at: self.last_active_at,
            message_count: self.messages.len(),
            preview,
            rating: self.rating,
            escalated: self.escalated,
        }
    }

    /// Whether two copies hold the same message log.
    ///
    /// Only id, content and status are compared; timestamps differ between the
    /// optimistic local copy and the server copy.
    pub fn same_messages(&self, other: &Conversation) -> bool {
        self.messages.len() == other.messages.len()
            && self
                .messages
                .iter()
                .zip(other.messages.iter())
                .all(|(a, b)| a.id == b.id && a.content == b.content && a.status == b.status)
    }
}

/// Entry of the known-conversation set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub session_id: String,
    pub last_active_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default)]
    pub preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default)]
    pub escalated: bool,
}
