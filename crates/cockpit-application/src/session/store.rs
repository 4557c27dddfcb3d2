//! ConversationStore - the single source of truth the UI renders.
//!
//! Holds the cached copy of every conversation the client has touched, the
//! known-conversation set used for listing, and the active pointer. All
//! mutations are plain synchronous transitions; the orchestrator performs
//! them under its session lock.

use chrono::{DateTime, Utc};
use cockpit_core::session::{Conversation, ConversationSummary, Message, MessageStatus};
use cockpit_core::{CockpitError, Result};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Everything needed to undo an optimistic removal.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedConversation {
    pub summary: ConversationSummary,
    pub cached: Option<Conversation>,
    pub was_active: bool,
}

impl RemovedConversation {
    pub fn session_id(&self) -> &str {
        &self.summary.session_id
    }
}

#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<String, Conversation>,
    known: HashMap<String, ConversationSummary>,
    active: Option<String>,
    /// Ids removed locally; late fetches and listings must not revive them.
    removed: HashSet<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.active
            .as_deref()
            .and_then(|id| self.conversations.get(id))
    }

    pub fn conversation(&self, conversation_id: &str) -> Option<&Conversation> {
        self.conversations.get(conversation_id)
    }

    pub fn messages(&self, conversation_id: &str) -> &[Message] {
        self.conversations
            .get(conversation_id)
            .map(|c| c.messages.as_slice())
            .unwrap_or_default()
    }

    pub fn last_message(&self, conversation_id: &str) -> Option<&Message> {
        self.conversations
            .get(conversation_id)
            .and_then(Conversation::last_message)
    }

    pub fn find_message(&self, conversation_id: &str, message_id: &str) -> Option<&Message> {
        self.conversations
            .get(conversation_id)
            .and_then(|c| c.messages.iter().find(|m| m.id == message_id))
    }

    /// Returns the active conversation id, lazily creating a fresh session
    /// when none is selected.
    pub fn ensure_active(&mut self) -> String {
        if let Some(id) = &self.active {
            return id.clone();
        }

        let id = Uuid::new_v4().to_string();
        let conversation = Conversation::new(id.clone());
        self.known.insert(id.clone(), conversation.summary());
        self.conversations.insert(id.clone(), conversation);
        self.active = Some(id.clone());
        tracing::debug!("[ConversationStore] Created session {}", id);
        id
    }

    /// Appends a message to its conversation.
    ///
    /// Appending a user message clears the suggestions of earlier messages.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the message is a pending assistant placeholder and
    /// the conversation already has one.
    pub fn append_message(&mut self, message: Message) -> Result<()> {
        let conversation = self
            .conversations
            .entry(message.conversation_id.clone())
            .or_insert_with(|| Conversation::new(message.conversation_id.clone()));

        if message.is_pending_assistant() && conversation.pending_assistant_count() > 0 {
            return Err(CockpitError::invalid_state(format!(
                "conversation {} already has a pending assistant message",
                conversation.session_id
            )));
        }

        if message.is_user() {
            for existing in &mut conversation.messages {
                existing.suggestions.clear();
            }
        }

        conversation.last_active_at = message.timestamp.max(conversation.last_active_at);
        conversation.messages.push(message);
        let summary = conversation.summary();
        self.known.insert(summary.session_id.clone(), summary);
        Ok(())
    }

    /// Replaces the most recent message in place, which must be an
    /// assistant message.
    ///
    /// # Returns
    ///
    /// The replaced message.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the conversation is unknown, empty, or ends with a
    /// user message.
    pub fn replace_last_assistant_message(
        &mut self,
        conversation_id: &str,
        replacement: Message,
    ) -> Result<Message> {
        let conversation = self
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| CockpitError::invalid_state("conversation is not loaded"))?;

        let last = conversation
            .messages
            .last_mut()
            .ok_or_else(|| CockpitError::invalid_state("conversation has no messages"))?;
        if !last.is_assistant() {
            return Err(CockpitError::invalid_state(
                "most recent message is not an assistant message",
            ));
        }

        let replaced = std::mem::replace(last, replacement);
        conversation.last_active_at = Utc::now();
        let summary = conversation.summary();
        self.known.insert(summary.session_id.clone(), summary);
        Ok(replaced)
    }

    /// Applies `f` to one message.
    ///
    /// # Returns
    ///
    /// `false` if the message does not exist.
    pub fn update_message<F>(&mut self, conversation_id: &str, message_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Message),
    {
        let Some(conversation) = self.conversations.get_mut(conversation_id) else {
            return false;
        };
        let Some(message) = conversation.messages.iter_mut().find(|m| m.id == message_id) else {
            return false;
        };

        f(message);
        let summary = conversation.summary();
        self.known.insert(summary.session_id.clone(), summary);
        true
    }

    pub fn set_message_status(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        status: MessageStatus,
    ) -> bool {
        self.update_message(conversation_id, message_id, |m| m.status = status)
    }

    /// Whether the conversation was removed locally and not restored.
    pub fn is_removed(&self, conversation_id: &str) -> bool {
        self.removed.contains(conversation_id)
    }

    /// Quick replies of the conversation: those on its most recent message,
    /// if that message is from the assistant.
    pub fn suggestions(&self, conversation_id: &str) -> &[String] {
        match self.last_message(conversation_id) {
            Some(last) if last.is_assistant() => &last.suggestions,
            _ => &[],
        }
    }

    /// Makes `conversation_id` active.
    ///
    /// # Returns
    ///
    /// The cached copy, if any. The caller refreshes it from the backend.
    pub fn select_conversation(&mut self, conversation_id: &str) -> Option<&Conversation> {
        self.active = Some(conversation_id.to_string());
        self.conversations.get(conversation_id)
    }

    /// Folds a fetched copy into the cache. The fetched copy wins whenever
    /// it disagrees with the cached one.
    ///
    /// # Returns
    ///
    /// `true` if the cache changed. A removed conversation is never
    /// re-added.
    pub fn reconcile(&mut self, fetched: Conversation) -> bool {
        let id = fetched.session_id.clone();
        if self.removed.contains(&id) {
            tracing::debug!("[ConversationStore] Ignoring fetched copy of removed {}", id);
            return false;
        }
        let unchanged = self.conversations.get(&id).is_some_and(|cached| {
            cached.same_messages(&fetched)
                && cached.rating == fetched.rating
                && cached.escalated == fetched.escalated
        });
        if unchanged {
            return false;
        }

        tracing::debug!(
            "[ConversationStore] Replacing cached copy of {} ({} messages)",
            id,
            fetched.messages.len()
        );
        self.known.insert(id.clone(), fetched.summary());
        self.conversations.insert(id, fetched);
        true
    }

    /// Known conversations, most recently active first.
    pub fn list_conversations(&self) -> Vec<ConversationSummary> {
        let mut list: Vec<_> = self.known.values().cloned().collect();
        list.sort_by(|a, b| {
            b.last_active_at
                .cmp(&a.last_active_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        list
    }

    /// Replaces the known set with a server listing.
    ///
    /// The active conversation and every id in `keep` survive even when the
    /// server does not list them yet. Cached copies of conversations that
    /// disappeared are dropped, and removed conversations stay removed.
    pub fn merge_known(&mut self, summaries: Vec<ConversationSummary>, keep: &[String]) {
        let mut next: HashMap<String, ConversationSummary> = summaries
            .into_iter()
            .filter(|s| !self.removed.contains(&s.session_id))
            .map(|s| (s.session_id.clone(), s))
            .collect();

        let retained: HashSet<&str> = self
            .active
            .as_deref()
            .into_iter()
            .chain(keep.iter().map(String::as_str))
            .collect();
        for id in &retained {
            if let Some(local) = self.known.get(*id) {
                next.entry((*id).to_string()).or_insert_with(|| local.clone());
            }
        }

        self.conversations
            .retain(|id, _| next.contains_key(id) || retained.contains(id.as_str()));
        self.known = next;
    }

    /// Optimistically removes a conversation.
    ///
    /// # Returns
    ///
    /// A snapshot for [`ConversationStore::restore`], or `None` if the
    /// conversation is unknown.
    pub fn remove_conversation(&mut self, conversation_id: &str) -> Option<RemovedConversation> {
        let cached = self.conversations.remove(conversation_id);
        let summary = self
            .known
            .remove(conversation_id)
            .or_else(|| cached.as_ref().map(Conversation::summary))?;

        let was_active = self.active.as_deref() == Some(conversation_id);
        if was_active {
            self.active = None;
        }
        self.removed.insert(conversation_id.to_string());

        Some(RemovedConversation {
            summary,
            cached,
            was_active,
        })
    }

    /// Undoes [`ConversationStore::remove_conversation`].
    ///
    /// The active pointer is only restored if nothing else was selected in
    /// the meantime.
    pub fn restore(&mut self, removed: RemovedConversation) {
        let id = removed.summary.session_id.clone();
        self.removed.remove(&id);
        self.known.insert(id.clone(), removed.summary);
        if let Some(cached) = removed.cached {
            self.conversations.insert(id.clone(), cached);
        }
        if removed.was_active && self.active.is_none() {
            self.active = Some(id);
        }
    }

    /// Deselects the active conversation without deleting anything.
    pub fn new_conversation(&mut self) {
        self.active = None;
    }

    /// Clears the local message log of the active conversation.
    ///
    /// # Returns
    ///
    /// The number of messages removed.
    pub fn clear_current_messages(&mut self) -> usize {
        let Some(id) = self.active.clone() else {
            return 0;
        };
        let Some(conversation) = self.conversations.get_mut(&id) else {
            return 0;
        };

        let removed = conversation.messages.len();
        conversation.messages.clear();
        let summary = conversation.summary();
        self.known.insert(id, summary);
        removed
    }

    pub fn set_rating(&mut self, conversation_id: &str, rating: u8) {
        if let Some(conversation) = self.conversations.get_mut(conversation_id) {
            conversation.rating = Some(rating);
        }
        if let Some(summary) = self.known.get_mut(conversation_id) {
            summary.rating = Some(rating);
        }
    }

    pub fn set_escalated(&mut self, conversation_id: &str) {
        if let Some(conversation) = self.conversations.get_mut(conversation_id) {
            conversation.escalated = true;
        }
        if let Some(summary) = self.known.get_mut(conversation_id) {
            summary.escalated = true;
        }
    }

    /// Drops known conversations last active before `cutoff`, except `keep`.
    ///
    /// # Returns
    ///
    /// The ids that were dropped.
    pub fn prune_older_than(&mut self, cutoff: DateTime<Utc>, keep: Option<&str>) -> Vec<String> {
        let expired: Vec<String> = self
            .known
            .values()
            .filter(|s| s.last_active_at < cutoff && Some(s.session_id.as_str()) != keep)
            .map(|s| s.session_id.clone())
            .collect();

        for id in &expired {
            self.known.remove(id);
            self.conversations.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!(
                "[ConversationStore] Pruned {} conversation(s) past retention",
                expired.len()
            );
        }
        expired
    }
}
