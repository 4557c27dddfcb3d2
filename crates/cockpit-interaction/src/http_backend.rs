//! HttpBackend - REST implementation of the request/response boundary.
//!
//! Every endpoint answers with the dashboard's JSON envelope
//! `{ "success": bool, "data": ..., "message": "..." }`.

use crate::backend::ConversationBackend;
use async_trait::async_trait;
use cockpit_core::config::EngineConfig;
use cockpit_core::session::{
    Ack, AiCapabilities, Conversation, ConversationSummary, RegenerateRequest,
    SendMessageRequest, StopGenerationRequest,
};
use cockpit_core::{CockpitError, Result};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

/// Response envelope shared by all dashboard endpoints.
#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default = "default_success")]
    success: bool,
    data: Option<T>,
    message: Option<String>,
}

fn default_success() -> bool {
    true
}

/// Backend implementation that talks to the dashboard REST API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    request_timeout: Duration,
}

impl HttpBackend {
    /// Creates a backend rooted at `base_url` (e.g. `https://host/api`).
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CockpitError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            request_timeout,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(
            config.api_base_url.clone(),
            config.auth_token.clone(),
            config.transport.request_timeout(),
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Sends the request and unwraps the envelope's `data`.
    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &str,
        builder: RequestBuilder,
    ) -> Result<T> {
        let envelope: ApiEnvelope<T> = self.execute_envelope(operation, builder).await?;
        envelope.data.ok_or_else(|| CockpitError::Serialization {
            format: "JSON".to_string(),
            message: format!("{operation}: response envelope carried no data"),
        })
    }

    /// Sends the request, ignoring any `data` in the envelope.
    async fn execute_unit(&self, operation: &str, builder: RequestBuilder) -> Result<()> {
        let _: ApiEnvelope<serde_json::Value> = self.execute_envelope(operation, builder).await?;
        Ok(())
    }

    async fn execute_envelope<T: DeserializeOwned>(
        &self,
        operation: &str,
        builder: RequestBuilder,
    ) -> Result<ApiEnvelope<T>> {
        tracing::debug!("[HttpBackend] {}", operation);

        let response = builder
            .send()
            .await
            .map_err(|e| map_request_error(operation, self.request_timeout, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_request_error(operation, self.request_timeout, e))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or_else(|| body.chars().take(200).collect());
            return Err(CockpitError::transport(format!(
                "{operation} failed with HTTP {}: {message}",
                status.as_u16()
            )));
        }

        let envelope: ApiEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            CockpitError::Serialization {
                format: "JSON".to_string(),
                message: format!("{operation}: {e}"),
            }
        })?;

        if !envelope.success {
            return Err(CockpitError::transport(format!(
                "{operation} rejected: {}",
                envelope.message.as_deref().unwrap_or("unknown error")
            )));
        }

        Ok(envelope)
    }
}

fn map_request_error(operation: &str, timeout: Duration, err: reqwest::Error) -> CockpitError {
    if err.is_timeout() {
        CockpitError::timeout(operation, timeout.as_millis() as u64)
    } else {
        CockpitError::transport(format!("{operation}: {err}"))
    }
}

#[async_trait]
impl ConversationBackend for HttpBackend {
    async fn send_message(&self, request: &SendMessageRequest) -> Result<Ack> {
        self.execute(
            "send_message",
            self.request(Method::POST, "/assistant/chat").json(request),
        )
        .await
    }

    async fn regenerate(&self, request: &RegenerateRequest) -> Result<Ack> {
        self.execute(
            "regenerate",
            self.request(Method::POST, "/assistant/chat/regenerate")
                .json(request),
        )
        .await
    }

    async fn stop_generation(&self, request: &StopGenerationRequest) -> Result<()> {
        self.execute_unit(
            "stop_generation",
            self.request(Method::POST, "/assistant/chat/stop").json(request),
        )
        .await
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.execute(
            "fetch_conversation",
            self.request(
                Method::GET,
                &format!("/assistant/conversations/{conversation_id}"),
            ),
        )
        .await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.execute(
            "list_conversations",
            self.request(Method::GET, "/assistant/conversations"),
        )
        .await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        self.execute_unit(
            "delete_conversation",
            self.request(
                Method::DELETE,
                &format!("/assistant/conversations/{conversation_id}"),
            ),
        )
        .await
    }

    async fn rate_conversation(
        &self,
        conversation_id: &str,
        rating: u8,
        feedback: Option<&str>,
    ) -> Result<()> {
        self.execute_unit(
            "rate_conversation",
            self.request(
                Method::POST,
                &format!("/assistant/conversations/{conversation_id}/rate"),
            )
            .json(&json!({ "rating": rating, "feedback": feedback })),
        )
        .await
    }

    async fn escalate_conversation(&self, conversation_id: &str, reason: &str) -> Result<()> {
        self.execute_unit(
            "escalate_conversation",
            self.request(
                Method::POST,
                &format!("/assistant/conversations/{conversation_id}/escalate"),
            )
            .json(&json!({ "reason": reason })),
        )
        .await
    }

    async fn fetch_capabilities(&self) -> Result<AiCapabilities> {
        self.execute(
            "fetch_capabilities",
            self.request(Method::GET, "/assistant/status"),
        )
        .await
    }
}
