//! Conversation message types.
//!
//! A message is owned by the conversation store. Its content only changes
//! while it is a `Pending` assistant placeholder; once delivered it is
//! treated as immutable.

use super::attachment::AttachmentRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents the author of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message typed by the dashboard user.
    User,
    /// Message produced by the assistant (or a human agent after escalation).
    Assistant,
}

/// Delivery state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Not yet acknowledged (user) or still generating (assistant).
    Pending,
    /// Acknowledged by the backend or finalized by a terminal generation event.
    Delivered,
    /// Terminal failure; the caller may retry explicitly.
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub from: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    /// Uploaded files folded into this message when it was sent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    /// Quick-reply suggestions; only meaningful on the latest assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

impl Message {
    /// Creates an optimistic user message awaiting acknowledgement.
    pub fn user(
        conversation_id: impl Into<String>,
        content: impl Into<String>,
        attachments: Vec<AttachmentRef>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            from: MessageRole::User,
            content: content.into(),
            timestamp: Utc::now(),
            status: MessageStatus::Pending,
            attachments,
            suggestions: Vec::new(),
        }
    }

    /// Creates an empty assistant placeholder for an in-flight generation.
    pub fn assistant_placeholder(conversation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            from: MessageRole::Assistant,
            content: String::new(),
            timestamp: Utc::now(),
            status: MessageStatus::Pending,
            attachments: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    /// Creates an assistant message that arrived already complete.
    pub fn assistant(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            status: MessageStatus::Delivered,
            content: content.into(),
            ..Self::assistant_placeholder(conversation_id)
        }
    }

    pub fn is_user(&self) -> bool {
        self.from == MessageRole::User
    }

    pub fn is_assistant(&self) -> bool {
        self.from == MessageRole::Assistant
    }

    pub fn is_pending_assistant(&self) -> bool {
        self.is_assistant() && self.status == MessageStatus::Pending
    }

    /// A finished assistant reply that can be regenerated.
    pub fn is_completed_assistant(&self) -> bool {
        self.is_assistant() && self.status == MessageStatus::Delivered
    }
}
