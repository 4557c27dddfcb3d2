//! Session domain module.
//!
//! This module contains the domain types of the assistant conversation
//! session engine.
//!
//! # Module Structure
//!
//! - `message`: Conversation message types (`Message`, `MessageRole`, `MessageStatus`)
//! - `conversation`: Conversation log and known-set summary
//! - `attachment`: Pending attachments and the references sent messages keep
//! - `preferences`: Chat preferences and partial updates
//! - `connection`: Streaming channel connection status
//! - `generation`: Generation handle and lifecycle state
//! - `event`: Typed inbound/outbound channel events
//! - `notification`: Error slot and toast notifications
//! - `capabilities`: AI capability status
//! - `repository`: Repository trait for preferences persistence

mod attachment;
mod capabilities;
mod connection;
mod conversation;
mod event;
mod generation;
mod message;
mod notification;
mod preferences;
mod repository;

// Re-export public API
pub use attachment::{Attachment, AttachmentRef};
pub use capabilities::AiCapabilities;
pub use connection::ConnectionStatus;
pub use conversation::{Conversation, ConversationSummary};
pub use event::{
    Ack, ChannelEvent, MessagePayload, OutboundEvent, RegenerateRequest, SendMessageRequest,
    StopGenerationRequest, TypingPayload, EVENT_MESSAGE_CHUNK, EVENT_MESSAGE_COMPLETE,
    EVENT_MESSAGE_NEW, EVENT_TYPING_ASSISTANT, EVENT_TYPING_USER,
};
pub use generation::{GenerationHandle, GenerationState, PromptContext};
pub use message::{Message, MessageRole, MessageStatus};
pub use notification::{Notification, NotificationLevel, SessionError};
pub use preferences::{DEFAULT_RETAIN_DAYS, Preferences, PreferencesPatch};
pub use repository::PreferencesRepository;
