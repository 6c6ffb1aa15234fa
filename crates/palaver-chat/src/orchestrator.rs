//! Turn orchestration.
//!
//! `ChatState` is the single reducer over the conversation state, driven by
//! the closed [`ChatEvent`] set; every mutation of the log, the identity, and
//! the processing machine goes through `apply`, which is what makes the merge
//! and ordering invariants testable without a UI harness.
//!
//! `TurnOrchestrator` is the composition root for one user turn: it reserves
//! the conversation id, appends the optimistic user message, starts the
//! processing machine, races the outbound request against a minimum-duration
//! phase timeline, interprets the response, and finalizes the turn.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use palaver_core::config::{AgentPreferences, ChatConfig};
use palaver_core::events::ChatEvent;
use palaver_core::types::{
    Attachment, ConversationId, Message, MessageMetadata, MessageRole, Phase, ToolCategory,
    ToolInfo, ToolStatus, TurnFailure,
};

use crate::categorize;
use crate::clock::{Clock, TokioClock};
use crate::error::ChatError;
use crate::identity::ConversationIdentity;
use crate::log::{LocalId, MergeOutcome, MessageLog};
use crate::processing::ProcessingStateMachine;
use crate::realtime::{MessageSink, RealtimeChannel, RealtimeSync};
use crate::store::{self, ConversationStore};
use crate::transport::{AgentRequest, AgentTransport, TurnResponse};

// =============================================================================
// ChatState reducer
// =============================================================================

/// What applying an event did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    TurnStarted { user_local: LocalId, slot: LocalId },
    Advanced,
    Completed,
    Merged(MergeOutcome),
    Failed { rolled_back: bool },
    Switched,
}

/// The complete chat state for the active conversation.
#[derive(Debug)]
pub struct ChatState {
    pub identity: ConversationIdentity,
    pub log: MessageLog,
    pub processing: ProcessingStateMachine,
}

impl ChatState {
    pub fn new(max_log_messages: usize) -> Self {
        Self {
            identity: ConversationIdentity::new(),
            log: MessageLog::new(max_log_messages),
            processing: ProcessingStateMachine::new(),
        }
    }

    /// Apply one event. The only mutation path into the chat state.
    pub fn apply(&mut self, event: ChatEvent, now: DateTime<Utc>) -> Result<Applied, ChatError> {
        match event {
            ChatEvent::UserSubmitted { message } => {
                if self.processing.is_open() {
                    return Err(ChatError::TurnInProgress);
                }
                let conversation_id = message.conversation_id;
                let user_local = self.log.append(message);
                let slot =
                    self.processing
                        .start(&mut self.log, conversation_id, user_local, now)?;
                Ok(Applied::TurnStarted { user_local, slot })
            }
            ChatEvent::PhaseAdvanced { phase, tool, .. } => {
                self.processing.advance(phase, tool, now)?;
                Ok(Applied::Advanced)
            }
            ChatEvent::ResponseReceived { text, .. } => {
                self.processing
                    .complete_with_response(&mut self.log, text, now)?;
                Ok(Applied::Completed)
            }
            ChatEvent::RealtimeMessageArrived { message } => {
                let role = message.role;
                let outcome = self.log.merge(message);
                if role == MessageRole::Assistant {
                    // Covers the pushed answer arriving before the HTTP
                    // response the same client is awaiting.
                    self.processing.observe_remote_assistant(&mut self.log, now);
                }
                Ok(Applied::Merged(outcome))
            }
            ChatEvent::TurnFailed { reason, .. } => {
                let user_local = self.processing.fail(&mut self.log, reason, now)?;
                // Roll back the optimistic user message only when the write
                // is known to never have reached the server: a transport
                // failure. An aborted request may have landed, so the input
                // is kept rather than lost.
                let rolled_back = match (reason, user_local) {
                    (TurnFailure::Transport, Some(local)) => self.log.remove_unresolved(local),
                    _ => false,
                };
                Ok(Applied::Failed { rolled_back })
            }
            ChatEvent::ConversationSwitched { conversation_id } => {
                self.identity.switch_to(conversation_id);
                self.log.reset();
                self.processing.force_reset();
                Ok(Applied::Switched)
            }
        }
    }
}

// =============================================================================
// TurnOrchestrator
// =============================================================================

/// How a submitted turn ended, as reported to the caller.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnReport {
    Completed { text: String },
    /// Soft outcome: the substitute guidance is already in the log.
    ContextOverflow { message: String },
    /// No error banner; the turn was retired quietly.
    Cancelled,
}

/// Composition root for the chat engine.
pub struct TurnOrchestrator {
    state: Arc<Mutex<ChatState>>,
    transport: Arc<dyn AgentTransport>,
    store: Arc<dyn ConversationStore>,
    realtime: tokio::sync::Mutex<RealtimeSync>,
    clock: Arc<dyn Clock>,
    config: ChatConfig,
    preferences: AgentPreferences,
    agent_id: String,
    user_id: String,
    events: broadcast::Sender<ChatEvent>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl TurnOrchestrator {
    pub fn new(
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
        config: ChatConfig,
        preferences: AgentPreferences,
        transport: Arc<dyn AgentTransport>,
        store: Arc<dyn ConversationStore>,
        channel: Arc<dyn RealtimeChannel>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(ChatState::new(config.engine.max_log_messages))),
            transport,
            store,
            realtime: tokio::sync::Mutex::new(RealtimeSync::new(channel)),
            clock: Arc::new(TokioClock),
            config,
            preferences,
            agent_id: agent_id.into(),
            user_id: user_id.into(),
            events,
            cancel: Mutex::new(None),
        }
    }

    /// Replace the clock (tests use a clock whose sleeps return instantly).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run one user turn to completion.
    ///
    /// Any turn still in flight is aborted first. Returns how the turn ended;
    /// transport failures surface as errors after the state is cleaned up.
    pub async fn submit(
        &self,
        text: impl Into<String>,
        attachments: Vec<Attachment>,
    ) -> Result<TurnReport, ChatError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let max_len = self.config.engine.max_message_length;
        if text.chars().count() > max_len {
            return Err(ChatError::MessageTooLong(max_len));
        }

        self.cancel_active();

        let active = self.state()?.identity.ensure_active();
        let conversation_id = active.conversation_id;
        self.ensure_subscribed(conversation_id).await?;

        let mut message = Message::user(
            conversation_id,
            text.clone(),
            self.user_id.clone(),
            self.clock.now(),
        );
        if !attachments.is_empty() {
            message.metadata = Some(MessageMetadata {
                attachments: attachments.clone(),
                is_completed: None,
            });
        }
        self.apply(ChatEvent::UserSubmitted { message })?;
        tracing::info!(conversation_id = %conversation_id, "Turn submitted");

        let token = CancellationToken::new();
        self.set_cancel_token(token.clone())?;

        let request = AgentRequest::new(
            self.agent_id.clone(),
            self.user_id.clone(),
            conversation_id,
            active.session_id,
            text.clone(),
            &attachments,
            &self.preferences,
            self.config.engine.max_context_messages,
        );

        // The request and the display timeline are independent waits; both
        // are joined so the phase display keeps its minimum duration even
        // when the network returns instantly.
        let outcome = {
            let send = self.transport.send(request);
            let timeline = self.run_timeline(conversation_id, &text);
            tokio::select! {
                _ = token.cancelled() => None,
                (response, ()) = async { tokio::join!(send, timeline) } => Some(response),
            }
        };

        let report = match outcome {
            None => {
                self.apply(ChatEvent::TurnFailed {
                    conversation_id,
                    reason: TurnFailure::Cancelled,
                })?;
                tracing::info!(conversation_id = %conversation_id, "Turn cancelled");
                Ok(TurnReport::Cancelled)
            }
            Some(Ok(TurnResponse::Answer(reply))) => {
                let answer = reply.text().to_string();
                self.apply(ChatEvent::ResponseReceived {
                    conversation_id,
                    text: answer.clone(),
                })?;
                if active.is_ephemeral {
                    self.persist_first_write(conversation_id, &text).await?;
                }
                Ok(TurnReport::Completed { text: answer })
            }
            Some(Ok(TurnResponse::ContextOverflow { message })) => {
                let guidance = overflow_guidance(&message);
                self.apply(ChatEvent::ResponseReceived {
                    conversation_id,
                    text: guidance.clone(),
                })?;
                Ok(TurnReport::ContextOverflow { message: guidance })
            }
            Some(Err(e)) => {
                self.apply(ChatEvent::TurnFailed {
                    conversation_id,
                    reason: TurnFailure::Transport,
                })?;
                tracing::warn!(conversation_id = %conversation_id, error = %e, "Turn failed");
                Err(e)
            }
        };

        // Let the completed/failed phase linger, then return to idle.
        self.clock
            .sleep(Duration::from_millis(self.config.timeline.completed_linger_ms))
            .await;
        if let Ok(mut state) = self.state.lock() {
            state.processing.reset_display();
        }

        report
    }

    /// Abort any in-flight request. The open slot is retired through the
    /// failure path, never silently.
    pub fn cancel_active(&self) {
        if let Ok(mut guard) = self.cancel.lock() {
            if let Some(token) = guard.take() {
                token.cancel();
            }
        }
    }

    /// Switch the active conversation: fail any open turn, tear down the
    /// previous log and channel, adopt the new id, and resubscribe.
    pub async fn switch_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), ChatError> {
        self.cancel_active();

        let open_in = {
            let state = self.state()?;
            state
                .processing
                .is_open()
                .then(|| state.identity.active_id())
                .flatten()
        };
        if let Some(previous) = open_in {
            // A turn left open in a backgrounded conversation never survives.
            self.apply(ChatEvent::TurnFailed {
                conversation_id: previous,
                reason: TurnFailure::Abandoned,
            })?;
        }

        self.apply(ChatEvent::ConversationSwitched { conversation_id })?;
        let mut realtime = self.realtime.lock().await;
        realtime.start(conversation_id, self.message_sink()).await?;
        tracing::info!(conversation_id = %conversation_id, "Conversation switched");
        Ok(())
    }

    /// Archive the active conversation and stop its channel.
    pub async fn archive_conversation(&self) -> Result<(), ChatError> {
        self.cancel_active();
        let archived = self.state()?.identity.archive();
        if let Some(conversation_id) = archived {
            if let Err(e) = self.store.archive(conversation_id).await {
                tracing::warn!(error = %e, "Conversation archive write failed");
            }
        }
        self.realtime.lock().await.stop();
        Ok(())
    }

    /// The rendered transcript.
    pub fn transcript(&self) -> Result<Vec<Message>, ChatError> {
        Ok(self.state()?.log.render())
    }

    /// The phase currently shown, `None` when idle.
    pub fn current_phase(&self) -> Result<Option<Phase>, ChatError> {
        Ok(self.state()?.processing.phase())
    }

    /// The active conversation id, if any.
    pub fn active_conversation(&self) -> Result<Option<ConversationId>, ChatError> {
        Ok(self.state()?.identity.active_id())
    }

    /// Subscribe to the stream of applied events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    // -- Private helpers --

    fn state(&self) -> Result<MutexGuard<'_, ChatState>, ChatError> {
        self.state
            .lock()
            .map_err(|e| ChatError::State(format!("chat state lock poisoned: {}", e)))
    }

    fn set_cancel_token(&self, token: CancellationToken) -> Result<(), ChatError> {
        let mut guard = self
            .cancel
            .lock()
            .map_err(|e| ChatError::State(format!("cancel lock poisoned: {}", e)))?;
        *guard = Some(token);
        Ok(())
    }

    /// Apply an event to the state and publish it to observers.
    fn apply(&self, event: ChatEvent) -> Result<Applied, ChatError> {
        let now = self.clock.now();
        let applied = self.state()?.apply(event.clone(), now)?;
        let _ = self.events.send(event);
        Ok(applied)
    }

    /// Walk the display phases on a minimum-duration timeline. Tool phases
    /// are included only when the categorizer infers a tool from the text.
    async fn run_timeline(&self, conversation_id: ConversationId, text: &str) {
        let min = Duration::from_millis(self.config.timeline.min_phase_ms);
        let inferred = categorize::categorize_text(text)
            .first()
            .map(|category| ToolInfo {
                tool_name: representative_tool(*category).to_string(),
                provider: None,
                status: ToolStatus::Running,
            });

        let mut plan: Vec<(Phase, Option<ToolInfo>)> = vec![(Phase::AnalyzingTools, None)];
        if let Some(tool) = inferred {
            plan.push((Phase::ExecutingTool, Some(tool)));
            plan.push((Phase::ProcessingResults, None));
        }
        plan.push((Phase::GeneratingResponse, None));

        for (phase, tool) in plan {
            self.clock.sleep(min).await;
            let advanced = self.apply(ChatEvent::PhaseAdvanced {
                conversation_id,
                phase,
                tool,
            });
            if advanced.is_err() {
                // The turn was already retired (remote completion); the
                // remaining display phases are moot.
                break;
            }
        }
        self.clock.sleep(min).await;
    }

    async fn persist_first_write(
        &self,
        conversation_id: ConversationId,
        first_message: &str,
    ) -> Result<(), ChatError> {
        self.state()?.identity.promote(conversation_id);
        let record = store::initial_record(
            conversation_id,
            self.agent_id.clone(),
            self.user_id.clone(),
            first_message,
            self.clock.now(),
        );
        if let Err(e) = self.store.upsert(record).await {
            // Opportunistic write; the turn already succeeded.
            tracing::warn!(error = %e, "Conversation record write failed");
        }
        Ok(())
    }

    async fn ensure_subscribed(&self, conversation_id: ConversationId) -> Result<(), ChatError> {
        let mut realtime = self.realtime.lock().await;
        if realtime.conversation() != Some(conversation_id) {
            realtime.start(conversation_id, self.message_sink()).await?;
        }
        Ok(())
    }

    fn message_sink(&self) -> MessageSink {
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let clock = Arc::clone(&self.clock);
        Arc::new(move |message: Message| {
            let event = ChatEvent::RealtimeMessageArrived { message };
            match state.lock() {
                Ok(mut state) => {
                    if state.apply(event.clone(), clock.now()).is_ok() {
                        let _ = events.send(event);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Chat state lock poisoned in realtime sink");
                }
            }
        })
    }
}

/// A stand-in tool name for a category inferred from free text.
fn representative_tool(category: ToolCategory) -> &'static str {
    match category {
        ToolCategory::Email => "mail",
        ToolCategory::Web => "web_search",
        ToolCategory::Docs => "docs",
        ToolCategory::Calendar => "calendar",
        ToolCategory::Messaging => "slack",
        ToolCategory::Files => "drive",
    }
}

/// The substitute assistant message for an oversized-context response.
fn overflow_guidance(message: &str) -> String {
    format!(
        "That request didn't fit in the agent's context window ({}). \
         Try narrowing it down, trimming attachments, or starting a fresh conversation.",
        message.trim().trim_end_matches('.')
    )
}

// =============================================================================
// Tests
// =============================================================================
