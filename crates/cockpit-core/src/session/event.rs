//! Typed events exchanged with the backend.
//!
//! Inbound payloads are validated once here, at ingestion. Everything
//! downstream works with [`ChannelEvent`] and never sees raw JSON.

use super::attachment::AttachmentRef;
use super::connection::ConnectionStatus;
use super::message::MessageRole;
use crate::error::{CockpitError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_MESSAGE_NEW: &str = "message:new";
pub const EVENT_MESSAGE_CHUNK: &str = "message:chunk";
pub const EVENT_MESSAGE_COMPLETE: &str = "message:complete";
pub const EVENT_TYPING_USER: &str = "typing:user";
pub const EVENT_TYPING_ASSISTANT: &str = "typing:assistant";
const STATUS_PREFIX: &str = "status:";

/// Payload of the `message:*` events.
///
/// `content` is the full text for `message:new`/`message:complete` and a
/// delta for `message:chunk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub conversation_id: String,
    pub message_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<MessageRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Payload of the `typing:*` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub is_typing: bool,
}

/// An event received from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    MessageNew(MessagePayload),
    MessageChunk(MessagePayload),
    MessageComplete(MessagePayload),
    TypingUser(TypingPayload),
    TypingAssistant(TypingPayload),
    Status(ConnectionStatus),
}

impl ChannelEvent {
    /// Parses a named wire event and its payload.
    pub fn parse(event: &str, payload: Value) -> Result<Self> {
        let parsed = match event {
            EVENT_MESSAGE_NEW => Self::MessageNew(decode(event, payload)?),
            EVENT_MESSAGE_CHUNK => Self::MessageChunk(decode(event, payload)?),
            EVENT_MESSAGE_COMPLETE => Self::MessageComplete(decode(event, payload)?),
            EVENT_TYPING_USER => Self::TypingUser(decode(event, payload)?),
            EVENT_TYPING_ASSISTANT => Self::TypingAssistant(decode(event, payload)?),
            other => {
                let status = other
                    .strip_prefix(STATUS_PREFIX)
                    .and_then(ConnectionStatus::parse)
                    .ok_or_else(|| {
                        CockpitError::transport(format!("unknown channel event '{other}'"))
                    })?;
                Self::Status(status)
            }
        };
        Ok(parsed)
    }

    pub fn name(&self) -> String {
        match self {
            Self::MessageNew(_) => EVENT_MESSAGE_NEW.to_string(),
            Self::MessageChunk(_) => EVENT_MESSAGE_CHUNK.to_string(),
            Self::MessageComplete(_) => EVENT_MESSAGE_COMPLETE.to_string(),
            Self::TypingUser(_) => EVENT_TYPING_USER.to_string(),
            Self::TypingAssistant(_) => EVENT_TYPING_ASSISTANT.to_string(),
            Self::Status(status) => format!("{STATUS_PREFIX}{status}"),
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::MessageNew(p) | Self::MessageChunk(p) | Self::MessageComplete(p) => {
                Some(p.conversation_id.as_str())
            }
            Self::TypingUser(p) | Self::TypingAssistant(p) => p.conversation_id.as_deref(),
            Self::Status(_) => None,
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(event: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| CockpitError::Serialization {
        format: "JSON".to_string(),
        message: format!("malformed '{event}' payload: {e}"),
    })
}

/// Request body of a send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: String,
    /// Local id of the optimistic user message; lets the backend deduplicate.
    pub client_message_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
}

/// Request body of a regenerate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateRequest {
    pub conversation_id: String,
    /// The user turn the new response answers.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces_message_id: Option<String>,
}

/// Request body of a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopGenerationRequest {
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// An event sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    SendMessage(SendMessageRequest),
    Regenerate(RegenerateRequest),
    StopGeneration(StopGenerationRequest),
    Typing(TypingPayload),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "message:send",
            Self::Regenerate(_) => "message:regenerate",
            Self::StopGeneration(_) => "generation:stop",
            Self::Typing(_) => EVENT_TYPING_USER,
        }
    }

    pub fn payload(&self) -> Result<Value> {
        let value = match self {
            Self::SendMessage(req) => serde_json::to_value(req)?,
            Self::Regenerate(req) => serde_json::to_value(req)?,
            Self::StopGeneration(req) => serde_json::to_value(req)?,
            Self::Typing(req) => serde_json::to_value(req)?,
        };
        Ok(value)
    }

    /// Typing signals are fire-and-forget and may be dropped.
    pub fn expects_ack(&self) -> bool {
        !matches!(self, Self::Typing(_))
    }
}

/// Acknowledgement of an outbound event.
///
/// When a send is served by the request/response fallback the complete reply
/// travels inside the ack (`reply`); over the streaming channel it arrives as
/// `message:chunk`/`message:complete` events instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}
