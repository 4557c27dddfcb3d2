//! SessionOrchestrator - user intents in, consistent session state out.
//!
//! Composes the transport, typing coordinator, attachment manager,
//! generation controller and conversation store. All session state lives in
//! one [`SessionState`] behind a tokio mutex; the lock is never held across a
//! network await, so every mutation between two suspension points is atomic.

use super::attachments::{AttachmentManager, PendingFile};
use super::generation::{GenerationController, StartedGeneration};
use super::store::ConversationStore;
use super::typing::{TypingCoordinator, TypingSink};
use chrono::Utc;
use cockpit_core::config::EngineConfig;
use cockpit_core::session::{
    AiCapabilities, Attachment, ChannelEvent, ConnectionStatus, ConversationSummary, Message,
    MessagePayload, MessageRole, MessageStatus, Notification, OutboundEvent, Preferences,
    PreferencesPatch, PreferencesRepository, PromptContext, RegenerateRequest,
    SendMessageRequest, SessionError, StopGenerationRequest, TypingPayload,
};
use cockpit_core::{CockpitError, Result};
use cockpit_interaction::{
    AttachmentUploader, ProgressCallback, TransportAdapter, UploadFile, UploadProgress,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

const NOTIFICATION_CAPACITY: usize = 32;

/// Read model for rendering one frame of the chat.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub active_conversation_id: Option<String>,
    pub messages: Vec<Message>,
    pub conversations: Vec<ConversationSummary>,
    pub input: String,
    pub sending: bool,
    pub generating: bool,
    pub can_stop_generation: bool,
    pub assistant_typing: bool,
    pub suggestions: Vec<String>,
    pub attachments: Vec<Attachment>,
    pub preferences: Preferences,
    pub capabilities: AiCapabilities,
    pub error: Option<SessionError>,
}

#[derive(Default)]
struct SessionState {
    store: ConversationStore,
    generation: GenerationController,
    attachments: AttachmentManager,
    /// Conversation id -> handle id of the send awaiting its ack.
    sending: HashMap<String, String>,
    /// Conversations whose reply is arriving over the stream.
    awaiting_stream: HashSet<String>,
    uploads: HashMap<String, JoinHandle<()>>,
    input: String,
    error: Option<SessionError>,
    assistant_typing: bool,
    preferences: Preferences,
    capabilities: AiCapabilities,
}

impl SessionState {
    fn record_error(&mut self, err: &CockpitError) {
        tracing::warn!("[Orchestrator] {}", err);
        self.error = Some(SessionError::from(err));
    }

    fn ensure_can_send(&self, conversation_id: &str) -> Result<()> {
        if self.sending.contains_key(conversation_id) || self.generation.is_active(conversation_id)
        {
            return Err(CockpitError::conflict(
                "a message is already being sent or answered in this conversation",
            ));
        }
        Ok(())
    }

    fn is_current(&self, conversation_id: &str, handle_id: &str) -> bool {
        self.generation
            .handle(conversation_id)
            .is_some_and(|h| h.id == handle_id)
    }

    fn is_active_conversation(&self, conversation_id: &str) -> bool {
        self.store.active_id() == Some(conversation_id)
    }

    fn apply_retention(&mut self) -> Vec<String> {
        let Some(cutoff) = self.preferences.retention_cutoff(Utc::now()) else {
            return Vec::new();
        };
        let keep = self.store.active_id().map(str::to_string);
        self.store.prune_older_than(cutoff, keep.as_deref())
    }

    fn snapshot(&self, status: ConnectionStatus) -> SessionSnapshot {
        let active = self.store.active_id().map(str::to_string);
        let generating = active
            .as_deref()
            .is_some_and(|id| self.generation.is_active(id));

        SessionSnapshot {
            status,
            messages: active
                .as_deref()
                .map(|id| self.store.messages(id).to_vec())
                .unwrap_or_default(),
            suggestions: active
                .as_deref()
                .map(|id| self.store.suggestions(id).to_vec())
                .unwrap_or_default(),
            sending: active
                .as_deref()
                .is_some_and(|id| self.sending.contains_key(id)),
            active_conversation_id: active,
            conversations: self.store.list_conversations(),
            input: self.input.clone(),
            generating,
            can_stop_generation: generating,
            assistant_typing: self.assistant_typing,
            attachments: self.attachments.list().to_vec(),
            preferences: self.preferences.clone(),
            capabilities: self.capabilities.clone(),
            error: self.error.clone(),
        }
    }
}

struct Inner {
    state: Mutex<SessionState>,
    transport: Arc<TransportAdapter>,
    uploader: Arc<dyn AttachmentUploader>,
    preferences_repository: Arc<dyn PreferencesRepository>,
    typing: TypingCoordinator,
    typing_rx: Mutex<Option<mpsc::UnboundedReceiver<bool>>>,
    notifications: broadcast::Sender<Notification>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    persist_lock: Mutex<()>,
}

impl Inner {
    fn notify(&self, notification: Notification) {
        // No receivers is fine.
        let _ = self.notifications.send(notification);
    }

    async fn handle_event(&self, event: ChannelEvent) {
        tracing::trace!("[Orchestrator] Event {}", event.name());
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        match event {
            ChannelEvent::MessageChunk(payload) => {
                state.generation.apply_chunk(
                    &mut state.store,
                    &payload.conversation_id,
                    &payload.message_id,
                    &payload.content,
                );
            }
            ChannelEvent::MessageComplete(payload) => {
                let conversation_id = payload.conversation_id.clone();
                let content = (!payload.content.is_empty()).then_some(payload.content);
                if state.generation.complete(
                    &mut state.store,
                    &conversation_id,
                    Some(&payload.message_id),
                    content,
                    payload.suggestions,
                ) {
                    state.awaiting_stream.remove(&conversation_id);
                    if state.is_active_conversation(&conversation_id) {
                        state.assistant_typing = false;
                    }
                }
            }
            ChannelEvent::MessageNew(payload) => Self::apply_new_message(state, payload),
            ChannelEvent::TypingAssistant(payload) => {
                let applies = payload
                    .conversation_id
                    .as_deref()
                    .is_none_or(|id| state.is_active_conversation(id));
                if applies {
                    state.assistant_typing = payload.is_typing;
                }
            }
            ChannelEvent::TypingUser(_) => {}
            ChannelEvent::Status(ConnectionStatus::Disconnected) => {
                let interrupted: Vec<String> = state.awaiting_stream.drain().collect();
                for conversation_id in interrupted {
                    if state.generation.fail(&mut state.store, &conversation_id) {
                        state.record_error(&CockpitError::transport(
                            "connection lost while the assistant was responding",
                        ));
                    }
                }
                state.assistant_typing = false;
            }
            ChannelEvent::Status(status) => {
                tracing::debug!("[Orchestrator] Connection {}", status);
            }
        }
    }

    /// A complete message pushed by the backend. It finishes the matching
    /// generation, or is appended as is, e.g. from a human agent.
    fn apply_new_message(state: &mut SessionState, payload: MessagePayload) {
        if payload.from == Some(MessageRole::User) {
            return;
        }
        let conversation_id = payload.conversation_id.clone();
        if state.store.conversation(&conversation_id).is_none() {
            tracing::debug!(
                "[Orchestrator] Ignoring message:new for unloaded conversation {}",
                conversation_id
            );
            return;
        }
        let is_placeholder = state
            .generation
            .handle(&conversation_id)
            .is_some_and(|h| h.message_id == payload.message_id);
        if !is_placeholder
            && state
                .store
                .find_message(&conversation_id, &payload.message_id)
                .is_some()
        {
            return;
        }

        // An unbound generation takes the first assistant message; a bound
        // one only its own server id.
        let answers_generation = state
            .generation
            .handle(&conversation_id)
            .is_some_and(|h| h.matches_remote(&payload.message_id));
        if answers_generation {
            let placeholder_id = state
                .generation
                .handle(&conversation_id)
                .map(|h| h.message_id.clone());
            let completed = state.generation.complete(
                &mut state.store,
                &conversation_id,
                None,
                Some(payload.content),
                payload.suggestions,
            );
            if let (true, Some(placeholder_id)) = (completed, placeholder_id) {
                let server_id = payload.message_id;
                state
                    .store
                    .update_message(&conversation_id, &placeholder_id, |m| m.id = server_id);
            }
            state.awaiting_stream.remove(&conversation_id);
            if state.is_active_conversation(&conversation_id) {
                state.assistant_typing = false;
            }
            return;
        }

        let message = Message {
            id: payload.message_id,
            conversation_id: conversation_id.clone(),
            from: MessageRole::Assistant,
            content: payload.content,
            timestamp: payload.timestamp,
            status: MessageStatus::Delivered,
            attachments: Vec::new(),
            suggestions: payload.suggestions,
        };
        if let Err(e) = state.store.append_message(message) {
            tracing::warn!("[Orchestrator] Dropping message:new: {}", e);
        }
    }

    async fn refresh_conversation(&self, conversation_id: &str) {
        let fetched = self
            .transport
            .backend()
            .fetch_conversation(conversation_id)
            .await;

        let mut state = self.state.lock().await;
        match fetched {
            Ok(conversation) => {
                if state.generation.is_active(conversation_id)
                    || state.sending.contains_key(conversation_id)
                {
                    tracing::debug!(
                        "[Orchestrator] Skipping refresh of {} during generation",
                        conversation_id
                    );
                    return;
                }
                state.store.reconcile(conversation);
            }
            Err(e) if state.store.is_removed(conversation_id) => {
                tracing::debug!(
                    "[Orchestrator] Ignoring failed refresh of removed {}: {}",
                    conversation_id,
                    e
                );
            }
            Err(e) => state.record_error(&e),
        }
    }
}

/// The assistant conversation session of one dashboard user.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    ///
    /// # Arguments
    ///
    /// * `transport` - Streaming channel with request/response fallback
    /// * `uploader` - Attachment upload boundary
    /// * `preferences_repository` - Where preferences are loaded from and saved to
    /// * `config` - Engine configuration (typing idle delay)
    pub fn new(
        transport: Arc<TransportAdapter>,
        uploader: Arc<dyn AttachmentUploader>,
        preferences_repository: Arc<dyn PreferencesRepository>,
        config: &EngineConfig,
    ) -> Self {
        let (typing_tx, typing_rx) = mpsc::unbounded_channel();
        let sink: TypingSink = Arc::new(move |is_typing| {
            let _ = typing_tx.send(is_typing);
        });
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState::default()),
                transport,
                uploader,
                preferences_repository,
                typing: TypingCoordinator::new(config.typing.idle_delay(), sink),
                typing_rx: Mutex::new(Some(typing_rx)),
                notifications,
                tasks: Mutex::new(Vec::new()),
                persist_lock: Mutex::new(()),
            }),
        }
    }

    // ============================================================================
    // Lifecycle
    // ============================================================================

    /// Loads preferences, connects the transport, starts the event pump and
    /// refreshes the conversation list and capability status.
    ///
    /// Calling it again while mounted is a no-op.
    pub async fn mount(&self) {
        {
            let mut tasks = self.inner.tasks.lock().await;
            if !tasks.is_empty() {
                return;
            }

            match self.inner.preferences_repository.load().await {
                Ok(Some(preferences)) => self.inner.state.lock().await.preferences = preferences,
                Ok(None) => {}
                Err(e) => tracing::warn!("[Orchestrator] Using default preferences: {}", e),
            }

            let mut events = self.inner.transport.subscribe().await;
            let inner = self.inner.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    inner.handle_event(event).await;
                }
            }));

            if let Some(mut typing_rx) = self.inner.typing_rx.lock().await.take() {
                let inner = self.inner.clone();
                tasks.push(tokio::spawn(async move {
                    while let Some(is_typing) = typing_rx.recv().await {
                        let conversation_id = inner
                            .state
                            .lock()
                            .await
                            .store
                            .active_id()
                            .map(str::to_string);
                        let event = OutboundEvent::Typing(TypingPayload {
                            conversation_id,
                            is_typing,
                        });
                        if let Err(e) = inner.transport.send(&event).await {
                            tracing::debug!("[Orchestrator] Typing signal dropped: {}", e);
                        }
                    }
                }));
            }
        }

        self.inner.transport.connect().await;
        tracing::info!("[Orchestrator] Mounted");

        if let Err(e) = self.refresh_conversations().await {
            tracing::warn!("[Orchestrator] Initial conversation list failed: {}", e);
        }
        if let Err(e) = self.refresh_capabilities().await {
            tracing::warn!("[Orchestrator] Capability status unavailable: {}", e);
        }
    }

    /// Stops background work and disconnects.
    pub async fn shutdown(&self) {
        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
        {
            let mut state = self.inner.state.lock().await;
            for (_, upload) in state.uploads.drain() {
                upload.abort();
            }
        }
        self.inner.typing.notify_typing(false);
        self.inner.transport.disconnect().await;
        tracing::info!("[Orchestrator] Shut down");
    }

    // ============================================================================
    // Reads
    // ============================================================================

    pub async fn snapshot(&self) -> SessionSnapshot {
        let status = self.inner.transport.status();
        self.inner.state.lock().await.snapshot(status)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.transport.status()
    }

    pub async fn error(&self) -> Option<SessionError> {
        self.inner.state.lock().await.error.clone()
    }

    pub async fn clear_error(&self) {
        self.inner.state.lock().await.error = None;
    }

    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    // ============================================================================
    // Composing
    // ============================================================================

    /// Updates the draft and drives the typing indicator.
    pub async fn handle_input(&self, text: impl Into<String>) {
        let text = text.into();
        let is_typing = !text.trim().is_empty();
        self.inner.state.lock().await.input = text;
        self.inner.typing.notify_typing(is_typing);
    }

    /// Sends `text`, or the current draft when `None`, with the uploaded
    /// attachments.
    ///
    /// The user message and a pending assistant placeholder are appended
    /// before anything goes over the network.
    ///
    /// # Errors
    ///
    /// - `Validation` if there is neither text nor an attachment, or an
    ///   attachment is still uploading
    /// - `Conflict` if a send or generation is already in flight
    /// - `Transport`/`Timeout` if delivery failed; the messages are marked
    ///   failed and [`SessionOrchestrator::retry_last_failed`] can resend
    pub async fn send_message(&self, text: Option<String>) -> Result<()> {
        let (conversation_id, event, started, user_message_id) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            match Self::prepare_send(state, text) {
                Ok(prepared) => prepared,
                Err(err) => {
                    state.record_error(&err);
                    return Err(err);
                }
            }
        };

        self.inner.typing.notify_typing(false);
        tracing::info!("[Orchestrator] Sending message in {}", conversation_id);
        self.dispatch(conversation_id, event, started, Some(user_message_id))
            .await
    }

    fn prepare_send(
        state: &mut SessionState,
        text: Option<String>,
    ) -> Result<(String, OutboundEvent, StartedGeneration, String)> {
        let content = text
            .unwrap_or_else(|| state.input.clone())
            .trim()
            .to_string();
        if content.is_empty() && state.attachments.is_empty() {
            return Err(CockpitError::validation("type a message or attach a file"));
        }
        if let Some(active) = state.store.active_id() {
            state.ensure_can_send(active)?;
        }
        state.attachments.ensure_ready()?;

        let conversation_id = state.store.ensure_active();
        let attachments = state.attachments.take_for_send()?;
        let user = Message::user(&conversation_id, content.clone(), attachments.clone());
        let user_message_id = user.id.clone();
        state.store.append_message(user)?;

        let started = state.generation.start(
            &mut state.store,
            &conversation_id,
            PromptContext {
                user_message_id: user_message_id.clone(),
                content: content.clone(),
            },
        )?;
        state
            .sending
            .insert(conversation_id.clone(), started.handle.id.clone());
        state.input.clear();
        state.error = None;

        let event = OutboundEvent::SendMessage(SendMessageRequest {
            conversation_id: conversation_id.clone(),
            client_message_id: user_message_id.clone(),
            content,
            attachments,
        });
        Ok((conversation_id, event, started, user_message_id))
    }

    /// Delivers a prepared send or regenerate and settles the optimistic state.
    async fn dispatch(
        &self,
        conversation_id: String,
        event: OutboundEvent,
        started: StartedGeneration,
        user_message_id: Option<String>,
    ) -> Result<()> {
        // A user message is always delivered to the end so its status
        // reflects what the backend actually did. Only a regenerate is
        // abandoned on stop.
        let outcome = if user_message_id.is_some() {
            Some(self.inner.transport.send(&event).await)
        } else {
            tokio::select! {
                _ = started.cancel.cancelled() => None,
                result = self.inner.transport.send(&event) => Some(result),
            }
        };

        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;
        if state
            .sending
            .get(&conversation_id)
            .is_some_and(|id| *id == started.handle.id)
        {
            state.sending.remove(&conversation_id);
        }
        let is_current = state.is_current(&conversation_id, &started.handle.id);

        match outcome {
            None => {
                tracing::info!(
                    "[Orchestrator] Abandoned '{}' for {} after stop",
                    event.name(),
                    conversation_id
                );
                Ok(())
            }
            Some(Ok(delivery)) => {
                if let Some(id) = &user_message_id {
                    state
                        .store
                        .set_message_status(&conversation_id, id, MessageStatus::Delivered);
                }
                if !is_current {
                    tracing::debug!(
                        "[Orchestrator] '{}' for {} acknowledged after stop",
                        event.name(),
                        conversation_id
                    );
                    return Ok(());
                }

                if let Some(remote_id) = delivery.ack.assistant_message_id.clone() {
                    state.generation.bind_remote(&conversation_id, remote_id);
                }
                if delivery.carries_reply() {
                    state.generation.complete(
                        &mut state.store,
                        &conversation_id,
                        None,
                        delivery.ack.reply,
                        delivery.ack.suggestions,
                    );
                    if state.is_active_conversation(&conversation_id) {
                        state.assistant_typing = false;
                    }
                } else {
                    state.awaiting_stream.insert(conversation_id);
                }
                Ok(())
            }
            Some(Err(err)) => {
                if let Some(id) = &user_message_id {
                    state
                        .store
                        .set_message_status(&conversation_id, id, MessageStatus::Failed);
                }
                if is_current {
                    state.generation.fail(&mut state.store, &conversation_id);
                    state.awaiting_stream.remove(&conversation_id);
                } else if user_message_id.is_some() {
                    // The stopped placeholder still answers the failed user
                    // message; failing it keeps the send retryable.
                    let placeholder = &started.handle.message_id;
                    if state
                        .store
                        .last_message(&conversation_id)
                        .is_some_and(|m| m.id == *placeholder)
                    {
                        state.store.set_message_status(
                            &conversation_id,
                            placeholder,
                            MessageStatus::Failed,
                        );
                    }
                }
                state.record_error(&err);
                Err(err)
            }
        }
    }

    // ============================================================================
    // Generation control
    // ============================================================================

    /// Stops the active conversation's generation.
    ///
    /// # Returns
    ///
    /// `false` when nothing was generating, so repeated calls are harmless.
    pub async fn stop_generation(&self) -> bool {
        let stopped = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let Some(conversation_id) = state.store.active_id().map(str::to_string) else {
                return false;
            };
            let Some(handle) = state.generation.handle(&conversation_id).cloned() else {
                return false;
            };
            if !state.generation.stop(&mut state.store, &handle) {
                return false;
            }
            state.sending.remove(&conversation_id);
            state.awaiting_stream.remove(&conversation_id);
            state.assistant_typing = false;
            handle
        };

        tracing::info!(
            "[Orchestrator] Stopped generation in {}",
            stopped.conversation_id
        );
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let request = StopGenerationRequest {
                conversation_id: stopped.conversation_id.clone(),
                message_id: stopped.remote_id.clone().or(Some(stopped.message_id.clone())),
            };
            if let Err(e) = inner
                .transport
                .send(&OutboundEvent::StopGeneration(request))
                .await
            {
                tracing::debug!("[Orchestrator] Stop notification failed: {}", e);
            }
        });
        true
    }

    /// Replaces the last assistant reply with a freshly generated one.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the last message is a completed assistant reply
    /// - `Conflict` if a send or generation is in flight
    pub async fn regenerate_last_response(&self) -> Result<()> {
        let (conversation_id, event, started) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            match Self::prepare_restart(state, false) {
                Ok((conversation_id, event, started, _)) => (conversation_id, event, started),
                Err(err) => {
                    state.record_error(&err);
                    return Err(err);
                }
            }
        };

        tracing::info!("[Orchestrator] Regenerating last response in {}", conversation_id);
        self.dispatch(conversation_id, event, started, None).await
    }

    /// Retries the failed turn at the end of the active conversation.
    ///
    /// Resends the user message if it never got through; otherwise asks for
    /// a new response. The failed placeholder is replaced in place.
    pub async fn retry_last_failed(&self) -> Result<()> {
        let (conversation_id, event, started, user_message_id) = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            match Self::prepare_restart(state, true) {
                Ok(prepared) => prepared,
                Err(err) => {
                    state.record_error(&err);
                    return Err(err);
                }
            }
        };

        tracing::info!("[Orchestrator] Retrying last turn in {}", conversation_id);
        self.dispatch(conversation_id, event, started, user_message_id)
            .await
    }

    fn prepare_restart(
        state: &mut SessionState,
        retry: bool,
    ) -> Result<(String, OutboundEvent, StartedGeneration, Option<String>)> {
        let conversation_id = state
            .store
            .active_id()
            .map(str::to_string)
            .ok_or_else(|| CockpitError::invalid_state("no conversation is selected"))?;
        if state
            .store
            .last_message(&conversation_id)
            .is_some_and(Message::is_pending_assistant)
        {
            return Err(CockpitError::invalid_state("the assistant is still responding"));
        }
        state.ensure_can_send(&conversation_id)?;

        let started = if retry {
            state
                .generation
                .retry_failed(&mut state.store, &conversation_id)?
        } else {
            state
                .generation
                .regenerate(&mut state.store, &conversation_id)?
        };

        let failed_user = state
            .store
            .find_message(&conversation_id, &started.prompt.user_message_id)
            .filter(|m| retry && m.status == MessageStatus::Failed)
            .cloned();

        let (event, user_message_id) = match failed_user {
            Some(user) => {
                state.store.set_message_status(
                    &conversation_id,
                    &user.id,
                    MessageStatus::Pending,
                );
                (
                    OutboundEvent::SendMessage(SendMessageRequest {
                        conversation_id: conversation_id.clone(),
                        client_message_id: user.id.clone(),
                        content: user.content,
                        attachments: user.attachments,
                    }),
                    Some(user.id),
                )
            }
            None => (
                OutboundEvent::Regenerate(RegenerateRequest {
                    conversation_id: conversation_id.clone(),
                    prompt: started.prompt.content.clone(),
                    replaces_message_id: started.replaced.as_ref().map(|m| m.id.clone()),
                }),
                None,
            ),
        };

        state
            .sending
            .insert(conversation_id.clone(), started.handle.id.clone());
        state.error = None;
        Ok((conversation_id, event, started, user_message_id))
    }

    // ============================================================================
    // Conversations
    // ============================================================================

    /// Switches to `conversation_id` immediately from cache and refreshes it
    /// from the backend in the background. The fetched copy wins.
    pub async fn select_conversation(&self, conversation_id: &str) -> JoinHandle<()> {
        {
            let mut state = self.inner.state.lock().await;
            state.store.select_conversation(conversation_id);
            state.assistant_typing = false;
            state.error = None;
        }

        let inner = self.inner.clone();
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move { inner.refresh_conversation(&conversation_id).await })
    }

    pub async fn list_conversations(&self) -> Vec<ConversationSummary> {
        self.inner.state.lock().await.store.list_conversations()
    }

    /// Replaces the known set with the backend's listing and applies retention.
    pub async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let listed = self.inner.transport.backend().list_conversations().await;

        let mut state = self.inner.state.lock().await;
        match listed {
            Ok(summaries) => {
                let mut keep = state.generation.active_conversations();
                keep.extend(state.sending.keys().cloned());
                state.store.merge_known(summaries, &keep);
                state.apply_retention();
                Ok(state.store.list_conversations())
            }
            Err(err) => {
                state.record_error(&err);
                Err(err)
            }
        }
    }

    /// Removes the conversation optimistically; restores it if the backend
    /// refuses.
    ///
    /// # Errors
    ///
    /// - `Conflict` while the conversation has a send or generation in flight
    /// - `NotFound` for unknown conversations
    /// - the backend error, after the conversation was restored
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<()> {
        let removed = {
            let mut guard = self.inner.state.lock().await;
            let state = &mut *guard;
            let removed = state.ensure_can_send(conversation_id).and_then(|_| {
                state
                    .store
                    .remove_conversation(conversation_id)
                    .ok_or_else(|| CockpitError::not_found("conversation", conversation_id))
            });
            match removed {
                Ok(removed) => removed,
                Err(err) => {
                    state.record_error(&err);
                    return Err(err);
                }
            }
        };

        match self
            .inner
            .transport
            .backend()
            .delete_conversation(conversation_id)
            .await
        {
            Ok(()) => {
                tracing::info!("[Orchestrator] Deleted conversation {}", conversation_id);
                self.inner.notify(Notification::success(
                    "Conversation deleted",
                    "The conversation was removed.",
                ));
                Ok(())
            }
            Err(err) => {
                let mut state = self.inner.state.lock().await;
                state.store.restore(removed);
                state.record_error(&err);
                self.inner
                    .notify(Notification::error("Delete failed", err.to_string()));
                Err(err)
            }
        }
    }

    /// Deselects the active conversation; the next send starts a new one.
    pub async fn new_conversation(&self) {
        let mut state = self.inner.state.lock().await;
        state.store.new_conversation();
        state.assistant_typing = false;
        state.error = None;
    }

    /// Clears the local message log of the active conversation.
    pub async fn clear_current_messages(&self) -> Result<usize> {
        let mut state = self.inner.state.lock().await;
        if let Some(active) = state.store.active_id().map(str::to_string) {
            if let Err(err) = state.ensure_can_send(&active) {
                state.record_error(&err);
                return Err(err);
            }
        }
        Ok(state.store.clear_current_messages())
    }

    /// Rates the active conversation.
    ///
    /// # Returns
    ///
    /// Whether the backend accepted the rating. Failures are surfaced in the
    /// error slot and are not retried.
    ///
    /// # Errors
    ///
    /// `Validation` for scores outside 1-5, `InvalidState` without an
    /// active conversation.
    pub async fn rate_conversation(&self, score: u8, feedback: Option<String>) -> Result<bool> {
        let conversation_id = {
            let mut state = self.inner.state.lock().await;
            let checked = if (1..=5).contains(&score) {
                state
                    .store
                    .active_id()
                    .map(str::to_string)
                    .ok_or_else(|| CockpitError::invalid_state("no conversation is selected"))
            } else {
                Err(CockpitError::validation(format!(
                    "rating must be between 1 and 5, got {score}"
                )))
            };
            match checked {
                Ok(id) => id,
                Err(err) => {
                    state.record_error(&err);
                    return Err(err);
                }
            }
        };

        let result = self
            .inner
            .transport
            .backend()
            .rate_conversation(&conversation_id, score, feedback.as_deref())
            .await;

        let mut state = self.inner.state.lock().await;
        match result {
            Ok(()) => {
                state.store.set_rating(&conversation_id, score);
                self.inner
                    .notify(Notification::success("Thanks!", "Your rating was recorded."));
                Ok(true)
            }
            Err(err) => {
                state.record_error(&err);
                self.inner
                    .notify(Notification::error("Rating failed", err.to_string()));
                Ok(false)
            }
        }
    }

    /// Hands the active conversation over to a human agent.
    ///
    /// # Returns
    ///
    /// Whether the backend accepted the escalation.
    pub async fn escalate_to_human(&self, reason: &str) -> Result<bool> {
        let conversation_id = {
            let mut state = self.inner.state.lock().await;
            let checked = if reason.trim().is_empty() {
                Err(CockpitError::validation("an escalation reason is required"))
            } else {
                state
                    .store
                    .active_id()
                    .map(str::to_string)
                    .ok_or_else(|| CockpitError::invalid_state("no conversation is selected"))
            };
            match checked {
                Ok(id) => id,
                Err(err) => {
                    state.record_error(&err);
                    return Err(err);
                }
            }
        };

        let result = self
            .inner
            .transport
            .backend()
            .escalate_conversation(&conversation_id, reason.trim())
            .await;

        let mut state = self.inner.state.lock().await;
        match result {
            Ok(()) => {
                state.store.set_escalated(&conversation_id);
                self.inner.notify(Notification::success(
                    "Escalated",
                    "A team member will join the conversation.",
                ));
                Ok(true)
            }
            Err(err) => {
                state.record_error(&err);
                self.inner
                    .notify(Notification::error("Escalation failed", err.to_string()));
                Ok(false)
            }
        }
    }

    // ============================================================================
    // Preferences and capabilities
    // ============================================================================

    /// Merges `patch` and persists the result in the background.
    ///
    /// # Returns
    ///
    /// The merged preferences.
    pub async fn update_preferences(&self, patch: PreferencesPatch) -> Preferences {
        let (preferences, changed) = {
            let mut state = self.inner.state.lock().await;
            let changed = state.preferences.apply(&patch);
            if changed && patch.retain_days.is_some() {
                state.apply_retention();
            }
            (state.preferences.clone(), changed)
        };

        if changed {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                let _serialized = inner.persist_lock.lock().await;
                let latest = inner.state.lock().await.preferences.clone();
                if let Err(e) = inner.preferences_repository.save(&latest).await {
                    tracing::warn!("[Orchestrator] Failed to persist preferences: {}", e);
                    inner.notify(Notification::error(
                        "Preferences not saved",
                        e.to_string(),
                    ));
                }
            });
        }
        preferences
    }

    /// Drops known conversations past the retention window.
    pub async fn apply_retention(&self) -> Vec<String> {
        self.inner.state.lock().await.apply_retention()
    }

    /// Fetches whether AI is enabled and which providers are available.
    pub async fn refresh_capabilities(&self) -> Result<AiCapabilities> {
        let fetched = self.inner.transport.backend().fetch_capabilities().await;
        let mut state = self.inner.state.lock().await;
        match fetched {
            Ok(capabilities) => {
                state.capabilities = capabilities.clone();
                Ok(capabilities)
            }
            Err(err) => {
                state.record_error(&err);
                Err(err)
            }
        }
    }

    // ============================================================================
    // Attachments
    // ============================================================================

    /// Adds files to the pending batch and starts uploading them.
    ///
    /// # Errors
    ///
    /// `Validation` if any name duplicates a pending one; nothing is added.
    pub async fn add_attachments(&self, files: Vec<UploadFile>) -> Result<Vec<Attachment>> {
        let mut guard = self.inner.state.lock().await;
        let state = &mut *guard;

        let pending: Vec<PendingFile> = files
            .iter()
            .map(|f| {
                let file = PendingFile::new(f.name.clone(), f.data.len() as u64);
                if f.mime_type.is_empty() {
                    file
                } else {
                    file.with_mime_type(f.mime_type.clone())
                }
            })
            .collect();

        let added = match state.attachments.add(pending) {
            Ok(added) => added,
            Err(err) => {
                state.record_error(&err);
                return Err(err);
            }
        };

        for (mut file, attachment) in files.into_iter().zip(added.iter()) {
            file.mime_type = attachment.mime_type.clone();
            let name = file.name.clone();
            let handle = tokio::spawn(Self::run_upload(self.inner.clone(), file));
            state.uploads.insert(name, handle);
        }
        Ok(added)
    }

    async fn run_upload(inner: Arc<Inner>, file: UploadFile) {
        let name = file.name.clone();
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<u8>();
        let on_progress: ProgressCallback = Arc::new(move |progress: UploadProgress| {
            let _ = progress_tx.send(progress.percentage);
        });

        let upload = inner.uploader.upload(file, on_progress);
        tokio::pin!(upload);
        let result = loop {
            tokio::select! {
                biased;
                Some(percentage) = progress_rx.recv() => {
                    inner
                        .state
                        .lock()
                        .await
                        .attachments
                        .update_progress(&name, percentage);
                }
                result = &mut upload => break result,
            }
        };

        let mut state = inner.state.lock().await;
        while let Ok(percentage) = progress_rx.try_recv() {
            state.attachments.update_progress(&name, percentage);
        }
        state.uploads.remove(&name);

        match result {
            Ok(url) => {
                tracing::debug!("[Orchestrator] Uploaded '{}'", name);
                state.attachments.mark_uploaded(&name, url);
            }
            Err(err) => {
                if state.attachments.remove(&name).is_some() {
                    state.record_error(&err);
                    inner.notify(Notification::error("Upload failed", err.to_string()));
                }
            }
        }
    }

    /// Removes one pending attachment, cancelling its upload.
    pub async fn remove_attachment(&self, name: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        if let Some(upload) = state.uploads.remove(name) {
            upload.abort();
        }
        state.attachments.remove(name).is_some()
    }

    /// Drops the pending batch, cancelling running uploads.
    pub async fn clear_attachments(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        for (_, upload) in state.uploads.drain() {
            upload.abort();
        }
        state.attachments.clear().len()
    }
}

#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;
