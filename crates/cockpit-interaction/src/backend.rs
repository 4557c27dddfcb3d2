//! Request/response boundary of the assistant backend.

use async_trait::async_trait;
use cockpit_core::Result;
use cockpit_core::session::{
    Ack, AiCapabilities, Conversation, ConversationSummary, RegenerateRequest,
    SendMessageRequest, StopGenerationRequest,
};

/// An abstract client for the assistant's request/response endpoints.
///
/// This is both the fallback path for sends when the streaming channel is
/// unavailable and the only path for conversation management calls.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    /// Sends a user message and waits for the complete reply.
    async fn send_message(&self, request: &SendMessageRequest) -> Result<Ack>;

    /// Asks for a new response to the given user turn.
    async fn regenerate(&self, request: &RegenerateRequest) -> Result<Ack>;

    /// Best-effort notification that the user stopped a generation.
    async fn stop_generation(&self, request: &StopGenerationRequest) -> Result<()>;

    /// Fetches the authoritative copy of a conversation.
    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation>;

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()>;

    async fn rate_conversation(
        &self,
        conversation_id: &str,
        rating: u8,
        feedback: Option<&str>,
    ) -> Result<()>;

    async fn escalate_conversation(&self, conversation_id: &str, reason: &str) -> Result<()>;

    /// Fetches whether AI is enabled and which providers are available.
    async fn fetch_capabilities(&self) -> Result<AiCapabilities>;
}
