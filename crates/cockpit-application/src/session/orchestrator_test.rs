use super::*;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use cockpit_core::ErrorKind;
use cockpit_core::config::TransportConfig;
use cockpit_core::session::{Ack, Conversation, NotificationLevel};
use cockpit_interaction::{ConversationBackend, StreamingChannel};
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

// ============================================================================
// Mocks
// ============================================================================

struct MockChannel {
    open_ok: bool,
    /// Whether acks name the assistant message the server will stream.
    binds_reply: bool,
    emitted: StdMutex<Vec<OutboundEvent>>,
    events: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl MockChannel {
    fn new(open_ok: bool) -> Arc<Self> {
        Arc::new(Self {
            open_ok,
            binds_reply: true,
            emitted: StdMutex::new(Vec::new()),
            events: Mutex::new(None),
        })
    }

    /// A connected channel whose acks carry no assistant message id.
    fn without_reply_ids() -> Arc<Self> {
        Arc::new(Self {
            open_ok: true,
            binds_reply: false,
            emitted: StdMutex::new(Vec::new()),
            events: Mutex::new(None),
        })
    }

    async fn push(&self, event: ChannelEvent) {
        if let Some(tx) = self.events.lock().await.as_ref() {
            tx.send(event).unwrap();
        }
    }

    fn emitted(&self) -> Vec<OutboundEvent> {
        self.emitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamingChannel for MockChannel {
    async fn open(&self, events: mpsc::UnboundedSender<ChannelEvent>) -> Result<()> {
        if !self.open_ok {
            return Err(CockpitError::transport("connection refused"));
        }
        *self.events.lock().await = Some(events);
        Ok(())
    }

    async fn emit(&self, event: &OutboundEvent) -> Result<Ack> {
        self.emitted.lock().unwrap().push(event.clone());
        let assistant_message_id = match event {
            OutboundEvent::SendMessage(_) | OutboundEvent::Regenerate(_) if self.binds_reply => {
                Some("srv-1".to_string())
            }
            _ => None,
        };
        Ok(Ack {
            assistant_message_id,
            ..Ack::default()
        })
    }

    async fn close(&self) {
        self.events.lock().await.take();
    }
}

#[derive(Default)]
struct MockBackend {
    summaries: Vec<ConversationSummary>,
    fetched: StdMutex<Option<Conversation>>,
    send_gate: Option<Arc<Notify>>,
    fetch_gate: Option<Arc<Notify>>,
    fail_send: AtomicBool,
    fail_delete: bool,
    fail_escalate: bool,
    sends: AtomicUsize,
    /// Sends that made it past the gate and succeeded.
    accepted: AtomicUsize,
    regenerates: AtomicUsize,
    deletes: AtomicUsize,
}

#[async_trait]
impl ConversationBackend for MockBackend {
    async fn send_message(&self, request: &SendMessageRequest) -> Result<Ack> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.send_gate {
            gate.notified().await;
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(CockpitError::transport("HTTP 503"));
        }
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(Ack {
            conversation_id: Some(request.conversation_id.clone()),
            user_message_id: Some(request.client_message_id.clone()),
            reply: Some("Your next checkride is on Friday.".to_string()),
            suggestions: vec!["Show my schedule".to_string()],
            ..Ack::default()
        })
    }

    async fn regenerate(&self, request: &RegenerateRequest) -> Result<Ack> {
        self.regenerates.fetch_add(1, Ordering::SeqCst);
        Ok(Ack {
            conversation_id: Some(request.conversation_id.clone()),
            reply: Some("Friday at 09:00 with your examiner.".to_string()),
            ..Ack::default()
        })
    }

    async fn stop_generation(&self, _request: &StopGenerationRequest) -> Result<()> {
        Ok(())
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        if let Some(gate) = &self.fetch_gate {
            gate.notified().await;
        }
        self.fetched
            .lock()
            .unwrap()
            .clone()
            .filter(|c| c.session_id == conversation_id)
            .ok_or_else(|| CockpitError::not_found("conversation", conversation_id))
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.summaries.clone())
    }

    async fn delete_conversation(&self, _conversation_id: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete {
            return Err(CockpitError::transport("HTTP 500"));
        }
        Ok(())
    }

    async fn rate_conversation(&self, _: &str, _: u8, _: Option<&str>) -> Result<()> {
        Ok(())
    }

    async fn escalate_conversation(&self, _: &str, _: &str) -> Result<()> {
        if self.fail_escalate {
            return Err(CockpitError::transport("HTTP 502"));
        }
        Ok(())
    }

    async fn fetch_capabilities(&self) -> Result<AiCapabilities> {
        Ok(AiCapabilities {
            ai_enabled: true,
            providers: [("openai".to_string(), true)].into_iter().collect(),
        })
    }
}

#[derive(Default)]
struct MockUploader {
    gate: Option<Arc<Notify>>,
    fail: bool,
}

#[async_trait]
impl AttachmentUploader for MockUploader {
    async fn upload(&self, file: UploadFile, on_progress: ProgressCallback) -> Result<String> {
        for percentage in [20, 50, 35, 80] {
            on_progress(UploadProgress { percentage });
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(CockpitError::transport("upload rejected"));
        }
        Ok(format!("https://cdn.test/{}", file.name))
    }
}

#[derive(Default)]
struct MockPreferences {
    saved: StdMutex<Vec<Preferences>>,
}

#[async_trait]
impl PreferencesRepository for MockPreferences {
    async fn load(&self) -> Result<Option<Preferences>> {
        Ok(None)
    }

    async fn save(&self, preferences: &Preferences) -> Result<()> {
        self.saved.lock().unwrap().push(preferences.clone());
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    orchestrator: SessionOrchestrator,
    transport: Arc<TransportAdapter>,
    channel: Arc<MockChannel>,
    backend: Arc<MockBackend>,
    preferences: Arc<MockPreferences>,
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        transport: TransportConfig {
            ack_timeout_ms: 500,
            reconnect_base_ms: 50,
            reconnect_max_ms: 200,
            reconnect_jitter: 0.0,
            ..TransportConfig::default()
        },
        ..EngineConfig::default()
    }
}

async fn mounted(
    channel: Arc<MockChannel>,
    backend: MockBackend,
    uploader: MockUploader,
) -> Harness {
    let backend = Arc::new(backend);
    let preferences = Arc::new(MockPreferences::default());
    let config = engine_config();
    let transport = Arc::new(TransportAdapter::new(
        channel.clone(),
        backend.clone(),
        &config.transport,
    ));
    let orchestrator = SessionOrchestrator::new(
        transport.clone(),
        Arc::new(uploader),
        preferences.clone(),
        &config,
    );
    orchestrator.mount().await;

    let expected = if channel.open_ok {
        ConnectionStatus::Connected
    } else {
        ConnectionStatus::Disconnected
    };
    let mut status = transport.status_watch();
    tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| *s == expected))
        .await
        .expect("connection status never settled")
        .unwrap();

    Harness {
        orchestrator,
        transport,
        channel,
        backend,
        preferences,
    }
}

async fn offline() -> Harness {
    mounted(MockChannel::new(false), MockBackend::default(), MockUploader::default()).await
}

async fn online() -> Harness {
    mounted(MockChannel::new(true), MockBackend::default(), MockUploader::default()).await
}

async fn eventually<F>(orchestrator: &SessionOrchestrator, check: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    for _ in 0..500 {
        let snapshot = orchestrator.snapshot().await;
        if check(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "condition never reached: {:#?}",
        orchestrator.snapshot().await
    );
}

fn payload(conversation_id: &str, message_id: &str, content: &str) -> MessagePayload {
    MessagePayload {
        conversation_id: conversation_id.to_string(),
        message_id: message_id.to_string(),
        content: content.to_string(),
        timestamp: Utc::now(),
        from: Some(MessageRole::Assistant),
        suggestions: vec![],
    }
}

fn summary(id: &str, days_ago: i64) -> ConversationSummary {
    ConversationSummary {
        session_id: id.to_string(),
        last_active_at: Utc::now() - ChronoDuration::days(days_ago),
        message_count: 2,
        preview: "Night currency requirements".to_string(),
        rating: None,
        escalated: false,
    }
}

// ============================================================================
// Sending
// ============================================================================

#[tokio::test]
async fn test_send_while_disconnected_completes_from_fallback_reply() {
    let h = offline().await;

    h.orchestrator
        .send_message(Some("When is my next checkride?".to_string()))
        .await
        .unwrap();

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.messages.len(), 2);
    assert!(snapshot.messages[0].is_user());
    assert_eq!(snapshot.messages[0].status, MessageStatus::Delivered);
    assert_eq!(snapshot.messages[1].status, MessageStatus::Delivered);
    assert_eq!(
        snapshot.messages[1].content,
        "Your next checkride is on Friday."
    );
    assert_eq!(snapshot.suggestions, vec!["Show my schedule".to_string()]);
    assert!(!snapshot.sending);
    assert!(!snapshot.generating);
    assert!(snapshot.error.is_none());
    assert_eq!(h.backend.sends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_send_is_a_validation_error() {
    let h = offline().await;

    let err = h
        .orchestrator
        .send_message(Some("   ".to_string()))
        .await
        .unwrap_err();

    assert!(err.is_validation());
    let snapshot = h.orchestrator.snapshot().await;
    assert!(snapshot.messages.is_empty());
    assert!(snapshot.active_conversation_id.is_none());
    assert_eq!(snapshot.error.unwrap().kind, ErrorKind::Validation);
    assert_eq!(h.backend.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_send_uses_draft_when_no_text_given() {
    let h = offline().await;

    h.orchestrator.handle_input("Is my medical still valid?").await;
    h.orchestrator.send_message(None).await.unwrap();

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.messages[0].content, "Is my medical still valid?");
    assert!(snapshot.input.is_empty());
}

#[tokio::test]
async fn test_second_send_while_first_in_flight_conflicts() {
    let gate = Arc::new(Notify::new());
    let h = mounted(
        MockChannel::new(false),
        MockBackend {
            send_gate: Some(gate.clone()),
            ..MockBackend::default()
        },
        MockUploader::default(),
    )
    .await;

    let first = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.send_message(Some("first".to_string())).await }
    });
    eventually(&h.orchestrator, |s| s.sending).await;

    let err = h
        .orchestrator
        .send_message(Some("second".to_string()))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(
        snapshot
            .messages
            .iter()
            .filter(|m| m.is_pending_assistant())
            .count(),
        1
    );

    gate.notify_one();
    first.await.unwrap().unwrap();
    assert_eq!(h.backend.sends.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_new_conversation_then_send_creates_exactly_one_conversation() {
    let h = offline().await;
    h.orchestrator
        .send_message(Some("Earlier question".to_string()))
        .await
        .unwrap();
    let earlier = h.orchestrator.snapshot().await.active_conversation_id;

    h.orchestrator.new_conversation().await;
    assert!(h.orchestrator.snapshot().await.messages.is_empty());
    h.orchestrator
        .send_message(Some("hi".to_string()))
        .await
        .unwrap();

    let snapshot = h.orchestrator.snapshot().await;
    assert_ne!(snapshot.active_conversation_id, earlier);
    assert_eq!(snapshot.conversations.len(), 2);
    let users: Vec<_> = snapshot.messages.iter().filter(|m| m.is_user()).collect();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].content, "hi");
}

#[tokio::test]
async fn test_failed_send_can_be_retried() {
    let h = offline().await;
    h.backend.fail_send.store(true, Ordering::SeqCst);

    let err = h
        .orchestrator
        .send_message(Some("Book the simulator".to_string()))
        .await
        .unwrap_err();
    assert!(err.is_transport());

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.messages[0].status, MessageStatus::Failed);
    assert_eq!(snapshot.messages[1].status, MessageStatus::Failed);
    assert!(snapshot.error.as_ref().is_some_and(|e| e.retryable));
    assert!(!snapshot.generating);

    h.backend.fail_send.store(false, Ordering::SeqCst);
    h.orchestrator.retry_last_failed().await.unwrap();

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.messages.len(), 2);
    assert!(
        snapshot
            .messages
            .iter()
            .all(|m| m.status == MessageStatus::Delivered)
    );
    assert_eq!(
        snapshot.messages[1].content,
        "Your next checkride is on Friday."
    );
    assert!(snapshot.error.is_none());
    assert_eq!(h.backend.sends.load(Ordering::SeqCst), 2);
    assert_eq!(h.backend.regenerates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stop_during_send_still_delivers_the_message() {
    let gate = Arc::new(Notify::new());
    let h = mounted(
        MockChannel::new(false),
        MockBackend {
            send_gate: Some(gate.clone()),
            ..MockBackend::default()
        },
        MockUploader::default(),
    )
    .await;

    let first = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.send_message(Some("Cancel my Tuesday slot".to_string())).await }
    });
    eventually(&h.orchestrator, |s| s.sending).await;
    assert!(h.orchestrator.stop_generation().await);

    gate.notify_one();
    first.await.unwrap().unwrap();

    assert_eq!(h.backend.accepted.load(Ordering::SeqCst), 1);
    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[0].status, MessageStatus::Delivered);
    assert_eq!(snapshot.messages[1].status, MessageStatus::Delivered);
    assert!(snapshot.messages[1].content.is_empty());
    assert!(!snapshot.sending);
    assert!(!snapshot.generating);
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn test_stop_during_failing_send_leaves_it_retryable() {
    let gate = Arc::new(Notify::new());
    let h = mounted(
        MockChannel::new(false),
        MockBackend {
            send_gate: Some(gate.clone()),
            ..MockBackend::default()
        },
        MockUploader::default(),
    )
    .await;
    h.backend.fail_send.store(true, Ordering::SeqCst);

    let first = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.send_message(Some("Book the simulator".to_string())).await }
    });
    eventually(&h.orchestrator, |s| s.sending).await;
    assert!(h.orchestrator.stop_generation().await);

    gate.notify_one();
    assert!(first.await.unwrap().unwrap_err().is_transport());

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.messages[0].status, MessageStatus::Failed);
    assert_eq!(snapshot.messages[1].status, MessageStatus::Failed);
    assert!(snapshot.error.as_ref().is_some_and(|e| e.retryable));

    h.backend.fail_send.store(false, Ordering::SeqCst);
    gate.notify_one();
    h.orchestrator.retry_last_failed().await.unwrap();

    let snapshot = h.orchestrator.snapshot().await;
    assert_eq!(snapshot.messages.len(), 2);
    assert!(
        snapshot
            .messages
            .iter()
            .all(|m| m.status == MessageStatus::Delivered)
    );
    assert_eq!(h.backend.accepted.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Regenerate
// ============================================================================

#[tokio::test]
async fn test_regenerate_replaces_last_reply_in_place() {
    let h = offline().await;
    h.orchestrator
        .send_message(Some("When is my next checkride?".to_string()))
        .await
        .unwrap();
    let before = h.orchestrator.snapshot().await.messages;

    h.orchestrator.regenerate_last_response().await.unwrap();

    let after = h.orchestrator.snapshot().await.messages;
    assert_eq!(after.len(), 2);
    assert_eq!(after[0], before[0]);
    assert_ne!(after[1].id, before[1].id);
    assert_eq!(after[1].content, "Friday at 09:00 with your examiner.");
    assert_eq!(after[1].status, MessageStatus::Delivered);
    assert_eq!(h.backend.regenerates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_regenerate_rejected_when_last_message_is_from_user() {
    let h = offline().await;
    let mut conversation = Conversation::new("conv-b");
    conversation.messages.push(Message {
        status: MessageStatus::Delivered,
        ..Message::user("conv-b", "Unanswered question", vec![])
    });
    *h.backend.fetched.lock().unwrap() = Some(conversation);

    h.orchestrator
        .select_conversation("conv-b")
        .await
        .await
        .unwrap();
    let before = h.orchestrator.snapshot().await.messages;
    assert_eq!(before.len(), 1);

    let err = h.orchestrator.regenerate_last_response().await.unwrap_err();

    assert!(err.is_invalid_state());
    assert_eq!(h.orchestrator.snapshot().await.messages, before);
    assert_eq!(h.backend.regenerates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_regenerate_while_streaming_is_invalid_state() {
    let h = online().await;
    h.orchestrator
        .send_message(Some("Explain the VFR minimums".to_string()))
        .await
        .unwrap();
    let before = h.orchestrator.snapshot().await;
    assert!(before.generating);

    let err = h.orchestrator.regenerate_last_response().await.unwrap_err();
    assert!(err.is_invalid_state());
    let err = h.orchestrator.retry_last_failed().await.unwrap_err();
    assert!(err.is_invalid_state());

    let after = h.orchestrator.snapshot().await;
    assert_eq!(after.messages, before.messages);
    assert!(after.generating);
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_streamed_reply_completes_with_suggestions() {
    let h = online().await;
    h.orchestrator
        .send_message(Some("Explain VFR minima".to_string()))
        .await
        .unwrap();
    let conversation_id = h
        .orchestrator
        .snapshot()
        .await
        .active_conversation_id
        .unwrap();

    h.channel
        .push(ChannelEvent::MessageChunk(payload(&conversation_id, "srv-1", "Class C: ")))
        .await;
    h.channel
        .push(ChannelEvent::MessageChunk(payload(&conversation_id, "srv-1", "5 km")))
        .await;
    eventually(&h.orchestrator, |s| {
        s.messages.last().is_some_and(|m| m.content == "Class C: 5 km")
    })
    .await;

    let mut complete = payload(&conversation_id, "srv-1", "");
    complete.suggestions = vec!["What about class G?".to_string()];
    h.channel.push(ChannelEvent::MessageComplete(complete)).await;

    let snapshot = eventually(&h.orchestrator, |s| !s.generating).await;
    let reply = snapshot.messages.last().unwrap();
    assert_eq!(reply.content, "Class C: 5 km");
    assert_eq!(reply.status, MessageStatus::Delivered);
    assert_eq!(snapshot.suggestions, vec!["What about class G?".to_string()]);
    assert_eq!(h.backend.sends.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stop_generation_keeps_partial_text_and_is_idempotent() {
    let h = online().await;
    h.orchestrator
        .send_message(Some("Summarize my logbook".to_string()))
        .await
        .unwrap();
    let conversation_id = h
        .orchestrator
        .snapshot()
        .await
        .active_conversation_id
        .unwrap();
    h.channel
        .push(ChannelEvent::MessageChunk(payload(&conversation_id, "srv-1", "You logged")))
        .await;
    eventually(&h.orchestrator, |s| {
        s.messages.last().is_some_and(|m| !m.content.is_empty())
    })
    .await;

    assert!(h.orchestrator.stop_generation().await);
    assert!(!h.orchestrator.stop_generation().await);

    h.channel
        .push(ChannelEvent::MessageChunk(payload(&conversation_id, "srv-1", " 42 hours")))
        .await;
    let stop_sent = |events: &[OutboundEvent]| {
        events
            .iter()
            .any(|e| matches!(e, OutboundEvent::StopGeneration(r) if r.message_id.as_deref() == Some("srv-1")))
    };
    for _ in 0..100 {
        if stop_sent(&h.channel.emitted()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(stop_sent(&h.channel.emitted()));

    let snapshot = h.orchestrator.snapshot().await;
    let reply = snapshot.messages.last().unwrap();
    assert_eq!(reply.content, "You logged");
    assert_eq!(reply.status, MessageStatus::Delivered);
    assert!(!snapshot.generating);
    assert!(!snapshot.can_stop_generation);
}

#[tokio::test]
async fn test_channel_drop_mid_stream_fails_the_generation() {
    let h = online().await;
    h.orchestrator
        .send_message(Some("Weather at EGLL?".to_string()))
        .await
        .unwrap();

    h.channel
        .push(ChannelEvent::Status(ConnectionStatus::Disconnected))
        .await;

    let snapshot = eventually(&h.orchestrator, |s| !s.generating).await;
    assert_eq!(snapshot.messages[1].status, MessageStatus::Failed);
    let error = snapshot.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Transport);
    assert!(error.retryable);
}

#[tokio::test]
async fn test_message_new_from_agent_is_appended_once() {
    let h = online().await;
    h.orchestrator
        .send_message(Some("I need a human".to_string()))
        .await
        .unwrap();
    let conversation_id = h
        .orchestrator
        .snapshot()
        .await
        .active_conversation_id
        .unwrap();
    h.channel
        .push(ChannelEvent::MessageComplete(payload(
            &conversation_id,
            "srv-1",
            "Connecting you now.",
        )))
        .await;
    eventually(&h.orchestrator, |s| !s.generating).await;

    let agent = payload(&conversation_id, "agent-1", "Hi, this is your instructor.");
    h.channel.push(ChannelEvent::MessageNew(agent.clone())).await;
    h.channel.push(ChannelEvent::MessageNew(agent)).await;

    let snapshot = eventually(&h.orchestrator, |s| s.messages.len() == 3).await;
    assert_eq!(snapshot.messages[2].id, "agent-1");
    assert_eq!(snapshot.messages[2].status, MessageStatus::Delivered);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.orchestrator.snapshot().await.messages.len(), 3);
}

#[tokio::test]
async fn test_assistant_typing_follows_active_conversation() {
    let h = online().await;
    h.orchestrator
        .send_message(Some("Hello".to_string()))
        .await
        .unwrap();
    let conversation_id = h
        .orchestrator
        .snapshot()
        .await
        .active_conversation_id
        .unwrap();

    h.channel
        .push(ChannelEvent::TypingAssistant(TypingPayload {
            conversation_id: Some("someone-else".to_string()),
            is_typing: true,
        }))
        .await;
    h.channel
        .push(ChannelEvent::TypingAssistant(TypingPayload {
            conversation_id: Some(conversation_id),
            is_typing: true,
        }))
        .await;

    eventually(&h.orchestrator, |s| s.assistant_typing).await;
    h.orchestrator.new_conversation().await;
    assert!(!h.orchestrator.snapshot().await.assistant_typing);
}

#[tokio::test]
async fn test_typing_signals_go_over_the_stream() {
    let h = online().await;

    h.orchestrator.handle_input("Wh").await;
    h.orchestrator.handle_input("What").await;
    h.orchestrator.handle_input("").await;

    let typing = || {
        h.channel
            .emitted()
            .into_iter()
            .filter_map(|e| match e {
                OutboundEvent::Typing(p) => Some(p.is_typing),
                _ => None,
            })
            .collect::<Vec<_>>()
    };
    for _ in 0..100 {
        if typing().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(typing(), vec![true, false]);
}

#[tokio::test]
async fn test_message_new_completes_unbound_generation() {
    let h = mounted(
        MockChannel::without_reply_ids(),
        MockBackend::default(),
        MockUploader::default(),
    )
    .await;
    h.orchestrator
        .send_message(Some("Who is on the roster tomorrow?".to_string()))
        .await
        .unwrap();
    let conversation_id = h
        .orchestrator
        .snapshot()
        .await
        .active_conversation_id
        .unwrap();

    let reply = payload(&conversation_id, "srv-9", "Three instructors are on duty.");
    h.channel.push(ChannelEvent::MessageNew(reply.clone())).await;
    let snapshot = eventually(&h.orchestrator, |s| !s.generating).await;

    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].id, "srv-9");
    assert_eq!(snapshot.messages[1].content, "Three instructors are on duty.");
    assert_eq!(snapshot.messages[1].status, MessageStatus::Delivered);

    h.channel.push(ChannelEvent::MessageNew(reply)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.orchestrator.snapshot().await.messages.len(), 2);

    h.orchestrator
        .send_message(Some("And the day after?".to_string()))
        .await
        .unwrap();
    assert_eq!(h.orchestrator.snapshot().await.messages.len(), 4);
}

#[tokio::test]
async fn test_background_generation_survives_list_refresh() {
    let h = online().await;
    h.orchestrator
        .send_message(Some("Draft the Part 61 quiz".to_string()))
        .await
        .unwrap();
    let conversation_id = h
        .orchestrator
        .snapshot()
        .await
        .active_conversation_id
        .unwrap();

    h.orchestrator.new_conversation().await;
    let listed = h.orchestrator.refresh_conversations().await.unwrap();
    assert!(listed.iter().any(|s| s.session_id == conversation_id));

    h.channel
        .push(ChannelEvent::MessageComplete(payload(
            &conversation_id,
            "srv-1",
            "The quiz has ten questions.",
        )))
        .await;

    h.orchestrator
        .select_conversation(&conversation_id)
        .await
        .await
        .unwrap();
    let snapshot = eventually(&h.orchestrator, |s| {
        s.messages.last().is_some_and(|m| !m.is_pending_assistant())
    })
    .await;
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].content, "The quiz has ten questions.");
    assert_eq!(snapshot.messages[1].status, MessageStatus::Delivered);
    assert!(!snapshot.generating);
}

// ============================================================================
// Conversations
// ============================================================================

#[tokio::test]
async fn test_failed_delete_restores_conversation() {
    let h = mounted(
        MockChannel::new(false),
        MockBackend {
            summaries: vec![summary("conv-d", 1)],
            fail_delete: true,
            ..MockBackend::default()
        },
        MockUploader::default(),
    )
    .await;
    let mut notifications = h.orchestrator.notifications();
    assert_eq!(h.orchestrator.list_conversations().await.len(), 1);

    let err = h.orchestrator.delete_conversation("conv-d").await.unwrap_err();

    assert!(err.is_transport());
    let listed = h.orchestrator.list_conversations().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id, "conv-d");
    assert!(h.orchestrator.error().await.is_some());
    assert_eq!(notifications.recv().await.unwrap().level, NotificationLevel::Error);
    assert_eq!(h.backend.deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_refresh_landing_after_delete_does_not_revive() {
    let gate = Arc::new(Notify::new());
    let mut fetched = Conversation::new("conv-x");
    fetched
        .messages
        .push(Message::user("conv-x", "Old question", vec![]));
    let h = mounted(
        MockChannel::new(false),
        MockBackend {
            summaries: vec![summary("conv-x", 1)],
            fetched: StdMutex::new(Some(fetched)),
            fetch_gate: Some(gate.clone()),
            ..MockBackend::default()
        },
        MockUploader::default(),
    )
    .await;

    let refresh = h.orchestrator.select_conversation("conv-x").await;
    h.orchestrator.delete_conversation("conv-x").await.unwrap();

    gate.notify_one();
    refresh.await.unwrap();

    let snapshot = h.orchestrator.snapshot().await;
    assert!(snapshot.conversations.is_empty());
    assert!(snapshot.active_conversation_id.is_none());
    assert!(snapshot.messages.is_empty());

    let listed = h.orchestrator.refresh_conversations().await.unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_delete_unknown_conversation_is_not_found() {
    let h = offline().await;

    let err = h.orchestrator.delete_conversation("ghost").await.unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(h.backend.deletes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_delete_rejected_while_generating() {
    let h = online().await;
    h.orchestrator
        .send_message(Some("Long answer please".to_string()))
        .await
        .unwrap();
    let conversation_id = h
        .orchestrator
        .snapshot()
        .await
        .active_conversation_id
        .unwrap();

    let err = h
        .orchestrator
        .delete_conversation(&conversation_id)
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(h.orchestrator.list_conversations().await.len(), 1);
}

#[tokio::test]
async fn test_clear_current_messages_keeps_conversation() {
    let h = offline().await;
    h.orchestrator
        .send_message(Some("Scratch this".to_string()))
        .await
        .unwrap();

    assert_eq!(h.orchestrator.clear_current_messages().await.unwrap(), 2);

    let snapshot = h.orchestrator.snapshot().await;
    assert!(snapshot.messages.is_empty());
    assert!(snapshot.active_conversation_id.is_some());
}

#[tokio::test]
async fn test_rate_conversation_validates_and_records() {
    let h = offline().await;
    h.orchestrator
        .send_message(Some("Thanks".to_string()))
        .await
        .unwrap();

    let err = h.orchestrator.rate_conversation(0, None).await.unwrap_err();
    assert!(err.is_validation());

    assert!(
        h.orchestrator
            .rate_conversation(5, Some("Very helpful".to_string()))
            .await
            .unwrap()
    );
    assert_eq!(h.orchestrator.list_conversations().await[0].rating, Some(5));
}

#[tokio::test]
async fn test_escalation_failure_is_reported_not_raised() {
    let h = mounted(
        MockChannel::new(false),
        MockBackend {
            fail_escalate: true,
            ..MockBackend::default()
        },
        MockUploader::default(),
    )
    .await;
    h.orchestrator
        .send_message(Some("Talk to a person".to_string()))
        .await
        .unwrap();

    let accepted = h
        .orchestrator
        .escalate_to_human("Billing question")
        .await
        .unwrap();

    assert!(!accepted);
    assert!(!h.orchestrator.list_conversations().await[0].escalated);
    assert_eq!(
        h.orchestrator.error().await.unwrap().kind,
        ErrorKind::Transport
    );
}

// ============================================================================
// Preferences, capabilities, attachments
// ============================================================================

#[tokio::test]
async fn test_mount_loads_list_and_capabilities() {
    let h = mounted(
        MockChannel::new(false),
        MockBackend {
            summaries: vec![summary("recent", 1), summary("stale", 90)],
            ..MockBackend::default()
        },
        MockUploader::default(),
    )
    .await;

    let snapshot = h.orchestrator.snapshot().await;
    let ids: Vec<_> = snapshot
        .conversations
        .iter()
        .map(|c| c.session_id.as_str())
        .collect();
    assert_eq!(ids, vec!["recent"]);
    assert!(snapshot.capabilities.provider_enabled("openai"));
    assert_eq!(snapshot.status, ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn test_update_preferences_persists_and_applies_retention() {
    let h = mounted(
        MockChannel::new(false),
        MockBackend {
            summaries: vec![summary("recent", 1), summary("older", 10)],
            ..MockBackend::default()
        },
        MockUploader::default(),
    )
    .await;
    assert_eq!(h.orchestrator.list_conversations().await.len(), 2);

    let updated = h
        .orchestrator
        .update_preferences(PreferencesPatch {
            retain_days: Some(7),
            ..PreferencesPatch::default()
        })
        .await;

    assert_eq!(updated.retain_days, 7);
    assert!(updated.show_timestamps);
    assert_eq!(h.orchestrator.list_conversations().await.len(), 1);

    for _ in 0..100 {
        if !h.preferences.saved.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.preferences.saved.lock().unwrap().last().unwrap().retain_days, 7);
}

#[tokio::test]
async fn test_attachment_upload_then_send() {
    let h = offline().await;

    h.orchestrator
        .add_attachments(vec![UploadFile {
            name: "logbook.pdf".to_string(),
            mime_type: String::new(),
            data: vec![0; 2048],
        }])
        .await
        .unwrap();
    let snapshot = eventually(&h.orchestrator, |s| {
        s.attachments.first().is_some_and(|a| a.uploaded)
    })
    .await;
    assert_eq!(snapshot.attachments[0].progress, 100);
    assert_eq!(snapshot.attachments[0].mime_type, "application/pdf");

    h.orchestrator
        .send_message(Some("See attached".to_string()))
        .await
        .unwrap();

    let snapshot = h.orchestrator.snapshot().await;
    assert!(snapshot.attachments.is_empty());
    let sent = &snapshot.messages[0].attachments;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].url, "https://cdn.test/logbook.pdf");
}

#[tokio::test]
async fn test_send_blocked_while_attachment_uploads() {
    let gate = Arc::new(Notify::new());
    let h = mounted(
        MockChannel::new(false),
        MockBackend::default(),
        MockUploader {
            gate: Some(gate.clone()),
            fail: false,
        },
    )
    .await;

    h.orchestrator
        .add_attachments(vec![UploadFile {
            name: "medical.png".to_string(),
            mime_type: "image/png".to_string(),
            data: vec![1; 512],
        }])
        .await
        .unwrap();
    eventually(&h.orchestrator, |s| {
        s.attachments.first().is_some_and(|a| a.progress == 80)
    })
    .await;

    let err = h
        .orchestrator
        .send_message(Some("Here it is".to_string()))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(h.orchestrator.snapshot().await.messages.is_empty());

    let duplicate = h
        .orchestrator
        .add_attachments(vec![UploadFile {
            name: "medical.png".to_string(),
            mime_type: "image/png".to_string(),
            data: vec![1; 512],
        }])
        .await
        .unwrap_err();
    assert!(duplicate.is_validation());

    assert!(h.orchestrator.remove_attachment("medical.png").await);
    assert!(h.orchestrator.snapshot().await.attachments.is_empty());
}

#[tokio::test]
async fn test_failed_upload_removes_attachment() {
    let h = mounted(
        MockChannel::new(false),
        MockBackend::default(),
        MockUploader {
            gate: None,
            fail: true,
        },
    )
    .await;

    h.orchestrator
        .add_attachments(vec![UploadFile {
            name: "scan.jpg".to_string(),
            mime_type: String::new(),
            data: vec![2; 128],
        }])
        .await
        .unwrap();

    let snapshot = eventually(&h.orchestrator, |s| s.attachments.is_empty()).await;
    assert!(snapshot.error.is_some());
}

#[tokio::test]
async fn test_shutdown_disconnects() {
    let h = online().await;

    h.orchestrator.shutdown().await;

    assert_eq!(h.transport.status(), ConnectionStatus::Disconnected);
    assert_eq!(h.orchestrator.connection_status(), ConnectionStatus::Disconnected);
}
