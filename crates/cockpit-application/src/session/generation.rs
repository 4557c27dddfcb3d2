//! GenerationController - lifecycle of in-flight assistant responses.
//!
//! Each conversation has one generation slot moving through
//! `idle -> generating -> (completed | stopped | failed)`. The controller
//! owns the active handles and writes the placeholder transitions into the
//! [`ConversationStore`] it is handed.

use super::store::ConversationStore;
use cockpit_core::session::{
    GenerationHandle, GenerationState, Message, MessageStatus, PromptContext,
};
use cockpit_core::{CockpitError, Result};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// A generation that was just started.
#[derive(Debug, Clone)]
pub struct StartedGeneration {
    pub handle: GenerationHandle,
    /// Cancelled when the generation is stopped.
    pub cancel: CancellationToken,
    pub prompt: PromptContext,
    /// The assistant message replaced in place, for regenerate and retry.
    pub replaced: Option<Message>,
}

#[derive(Debug)]
struct ActiveGeneration {
    handle: GenerationHandle,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct GenerationController {
    active: HashMap<String, ActiveGeneration>,
    states: HashMap<String, GenerationState>,
}

impl GenerationController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.active.contains_key(conversation_id)
    }

    /// Conversations with a generation in flight.
    pub fn active_conversations(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    pub fn handle(&self, conversation_id: &str) -> Option<&GenerationHandle> {
        self.active.get(conversation_id).map(|a| &a.handle)
    }

    pub fn state(&self, conversation_id: &str) -> GenerationState {
        if self.is_active(conversation_id) {
            return GenerationState::Generating;
        }
        self.states
            .get(conversation_id)
            .copied()
            .unwrap_or_default()
    }

    /// Starts a generation answering `prompt`, appending a pending placeholder.
    ///
    /// # Errors
    ///
    /// `Conflict` if a generation is already active for the conversation.
    pub fn start(
        &mut self,
        store: &mut ConversationStore,
        conversation_id: &str,
        prompt: PromptContext,
    ) -> Result<StartedGeneration> {
        self.ensure_idle(conversation_id)?;
        let placeholder = Message::assistant_placeholder(conversation_id);
        let handle = GenerationHandle::new(conversation_id, placeholder.id.clone());
        store.append_message(placeholder)?;
        Ok(self.register(handle, prompt, None))
    }

    /// Replaces the most recent completed assistant message with a fresh
    /// placeholder and starts a generation for the preceding user turn.
    ///
    /// # Errors
    ///
    /// - `Conflict` if a generation is already active.
    /// - `InvalidState` unless the last message is a delivered assistant
    ///   message preceded by a user turn.
    pub fn regenerate(
        &mut self,
        store: &mut ConversationStore,
        conversation_id: &str,
    ) -> Result<StartedGeneration> {
        self.restart(store, conversation_id, Message::is_completed_assistant, "regenerate")
    }

    /// Like [`GenerationController::regenerate`] but for a failed assistant
    /// message.
    pub fn retry_failed(
        &mut self,
        store: &mut ConversationStore,
        conversation_id: &str,
    ) -> Result<StartedGeneration> {
        self.restart(
            store,
            conversation_id,
            |m| m.is_assistant() && m.status == MessageStatus::Failed,
            "retry",
        )
    }

    fn restart(
        &mut self,
        store: &mut ConversationStore,
        conversation_id: &str,
        eligible: impl Fn(&Message) -> bool,
        operation: &str,
    ) -> Result<StartedGeneration> {
        let conversation = store.conversation(conversation_id).ok_or_else(|| {
            CockpitError::invalid_state(format!("cannot {operation}: conversation is not loaded"))
        })?;
        match conversation.last_message() {
            Some(last) if eligible(last) => {}
            Some(last) if last.is_user() => {
                return Err(CockpitError::invalid_state(format!(
                    "cannot {operation}: the most recent message is from the user"
                )));
            }
            Some(last) if last.is_pending_assistant() => {
                return Err(CockpitError::invalid_state(format!(
                    "cannot {operation}: the assistant is still responding"
                )));
            }
            _ => {
                return Err(CockpitError::invalid_state(format!(
                    "cannot {operation}: no eligible assistant message"
                )));
            }
        }

        // A pending placeholder is reported above as InvalidState; any other
        // active generation is a conflict.
        self.ensure_idle(conversation_id)?;

        let user_turn = conversation.last_user_turn().ok_or_else(|| {
            CockpitError::invalid_state(format!("cannot {operation}: no user turn to answer"))
        })?;
        let prompt = PromptContext {
            user_message_id: user_turn.id.clone(),
            content: user_turn.content.clone(),
        };

        let placeholder = Message::assistant_placeholder(conversation_id);
        let handle = GenerationHandle::new(conversation_id, placeholder.id.clone());
        let replaced = store.replace_last_assistant_message(conversation_id, placeholder)?;
        Ok(self.register(handle, prompt, Some(replaced)))
    }

    fn ensure_idle(&self, conversation_id: &str) -> Result<()> {
        if self.is_active(conversation_id) {
            return Err(CockpitError::conflict(format!(
                "a response is already being generated for {conversation_id}"
            )));
        }
        Ok(())
    }

    fn register(
        &mut self,
        handle: GenerationHandle,
        prompt: PromptContext,
        replaced: Option<Message>,
    ) -> StartedGeneration {
        let cancel = CancellationToken::new();
        let conversation_id = handle.conversation_id.clone();
        tracing::debug!(
            "[GenerationController] Started generation {} for {}",
            handle.id,
            conversation_id
        );
        self.active.insert(
            conversation_id.clone(),
            ActiveGeneration {
                handle: handle.clone(),
                cancel: cancel.clone(),
            },
        );
        self.states
            .insert(conversation_id, GenerationState::Generating);
        StartedGeneration {
            handle,
            cancel,
            prompt,
            replaced,
        }
    }

    /// Records the id the backend assigned to the reply.
    pub fn bind_remote(&mut self, conversation_id: &str, remote_id: impl Into<String>) -> bool {
        match self.active.get_mut(conversation_id) {
            Some(active) => {
                active.handle.remote_id = Some(remote_id.into());
                true
            }
            None => false,
        }
    }

    /// Appends a streamed delta to the placeholder.
    ///
    /// # Returns
    ///
    /// `false` when the chunk was discarded (no active generation, or it
    /// belongs to a different message).
    pub fn apply_chunk(
        &mut self,
        store: &mut ConversationStore,
        conversation_id: &str,
        message_id: &str,
        delta: &str,
    ) -> bool {
        let Some(active) = self.active.get(conversation_id) else {
            tracing::trace!(
                "[GenerationController] Discarding chunk for idle conversation {}",
                conversation_id
            );
            return false;
        };
        if !active.handle.matches_remote(message_id) {
            return false;
        }

        store.update_message(conversation_id, &active.handle.message_id, |m| {
            m.content.push_str(delta)
        })
    }

    /// Finalizes the placeholder as delivered.
    ///
    /// `content`, when given, replaces the streamed text.
    pub fn complete(
        &mut self,
        store: &mut ConversationStore,
        conversation_id: &str,
        message_id: Option<&str>,
        content: Option<String>,
        suggestions: Vec<String>,
    ) -> bool {
        let matches = self.active.get(conversation_id).is_some_and(|active| {
            message_id.is_none_or(|id| active.handle.matches_remote(id))
        });
        if !matches {
            return false;
        }

        let Some(active) = self.finish(conversation_id, GenerationState::Completed) else {
            return false;
        };
        store.update_message(conversation_id, &active.handle.message_id, |m| {
            if let Some(content) = content {
                m.content = content;
            }
            m.suggestions = suggestions;
            m.status = MessageStatus::Delivered;
        })
    }

    /// Stops the generation of `handle`.
    ///
    /// The placeholder keeps its partial content and is finalized as
    /// delivered; the handle's token is cancelled. Stopping a handle that is
    /// no longer active is a no-op.
    ///
    /// # Returns
    ///
    /// `true` if this call stopped the generation.
    pub fn stop(&mut self, store: &mut ConversationStore, handle: &GenerationHandle) -> bool {
        let is_current = self
            .active
            .get(&handle.conversation_id)
            .is_some_and(|active| active.handle.id == handle.id);
        if !is_current {
            return false;
        }

        let Some(active) = self.finish(&handle.conversation_id, GenerationState::Stopped) else {
            return false;
        };
        active.cancel.cancel();
        store.set_message_status(
            &handle.conversation_id,
            &active.handle.message_id,
            MessageStatus::Delivered,
        );
        true
    }

    /// Finalizes the placeholder as failed. Never retried automatically.
    pub fn fail(&mut self, store: &mut ConversationStore, conversation_id: &str) -> bool {
        let Some(active) = self.finish(conversation_id, GenerationState::Failed) else {
            return false;
        };
        store.set_message_status(
            conversation_id,
            &active.handle.message_id,
            MessageStatus::Failed,
        )
    }

    fn finish(&mut self, conversation_id: &str, state: GenerationState) -> Option<ActiveGeneration> {
        let active = self.active.remove(conversation_id)?;
        self.states.insert(conversation_id.to_string(), state);
        tracing::debug!(
            "[GenerationController] Generation {} for {} -> {:?}",
            active.handle.id,
            conversation_id,
            state
        );
        Some(active)
    }
}
