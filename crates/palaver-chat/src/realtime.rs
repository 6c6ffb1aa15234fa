//! Realtime message ingestion.
//!
//! Subscribes to a push channel scoped to the active conversation, normalizes
//! inbound events to messages, and feeds them to the log. Channel drops are
//! transient: the loop silently resubscribes. Correctness relies on the log's
//! merge dedup, not on exactly-once delivery from the transport.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use palaver_core::types::{ConversationId, Message, MessageRole};

use crate::error::ChatError;

/// A row-change notification from the durable message store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sender_user_id: Option<String>,
    #[serde(default)]
    pub sender_agent_id: Option<String>,
}

impl RealtimeEvent {
    /// Normalize the wire event into a [`Message`]. Unknown roles are
    /// treated as user messages.
    pub fn normalize(&self, conversation_id: ConversationId) -> Message {
        let role = match self.role.as_str() {
            "assistant" => MessageRole::Assistant,
            "thinking" => MessageRole::Thinking,
            _ => MessageRole::User,
        };
        Message {
            id: Some(self.id.clone()),
            role,
            content: self.content.clone(),
            timestamp: self.created_at,
            conversation_id,
            sender_user_id: self.sender_user_id.clone(),
            sender_agent_id: self.sender_agent_id.clone(),
            metadata: None,
            process_details: None,
        }
    }
}

/// Receiver half of a conversation-scoped subscription.
pub type EventReceiver = broadcast::Receiver<(ConversationId, RealtimeEvent)>;

/// A push transport that can open a channel scoped to one conversation.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn subscribe(&self, conversation_id: ConversationId) -> Result<EventReceiver, ChatError>;
}

/// In-process channel over a tokio broadcast sender.
///
/// Events for every conversation share one fabric; the receive loop filters
/// to the subscribed conversation.
#[derive(Clone)]
pub struct BroadcastRealtimeChannel {
    tx: broadcast::Sender<(ConversationId, RealtimeEvent)>,
}

impl BroadcastRealtimeChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event; returns the number of live subscribers.
    pub fn publish(&self, conversation_id: ConversationId, event: RealtimeEvent) -> usize {
        self.tx.send((conversation_id, event)).unwrap_or(0)
    }
}

impl Default for BroadcastRealtimeChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl RealtimeChannel for BroadcastRealtimeChannel {
    async fn subscribe(&self, _conversation_id: ConversationId) -> Result<EventReceiver, ChatError> {
        Ok(self.tx.subscribe())
    }
}

/// Callback receiving normalized messages for the active conversation.
pub type MessageSink = Arc<dyn Fn(Message) + Send + Sync>;

/// Manages the subscription lifecycle across conversation switches and
/// reconnects.
pub struct RealtimeSync {
    channel: Arc<dyn RealtimeChannel>,
    active: Option<ActiveSubscription>,
}

struct ActiveSubscription {
    conversation_id: ConversationId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RealtimeSync {
    pub fn new(channel: Arc<dyn RealtimeChannel>) -> Self {
        Self {
            channel,
            active: None,
        }
    }

    /// The conversation currently subscribed, if any.
    pub fn conversation(&self) -> Option<ConversationId> {
        self.active.as_ref().map(|a| a.conversation_id)
    }

    /// Subscribe to `conversation_id`, tearing down any previous channel.
    /// Every inbound event for the conversation is normalized and handed to
    /// `sink`.
    pub async fn start(
        &mut self,
        conversation_id: ConversationId,
        sink: MessageSink,
    ) -> Result<(), ChatError> {
        self.stop();

        let rx = self.channel.subscribe(conversation_id).await?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(receive_loop(
            Arc::clone(&self.channel),
            conversation_id,
            rx,
            sink,
            cancel.clone(),
        ));
        tracing::debug!(conversation_id = %conversation_id, "Realtime channel subscribed");
        self.active = Some(ActiveSubscription {
            conversation_id,
            cancel,
            task,
        });
        Ok(())
    }

    /// Tear down the channel (conversation switch or component teardown).
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            active.task.abort();
            tracing::debug!(conversation_id = %active.conversation_id, "Realtime channel unsubscribed");
        }
    }
}

impl Drop for RealtimeSync {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn receive_loop(
    channel: Arc<dyn RealtimeChannel>,
    conversation_id: ConversationId,
    mut rx: EventReceiver,
    sink: MessageSink,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok((event_conversation, event)) => {
                    if event_conversation == conversation_id {
                        sink(event.normalize(conversation_id));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Missed deliveries are recovered by merge dedup on the
                    // next copies; nothing to surface.
                    tracing::debug!(skipped, "Realtime receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    match channel.subscribe(conversation_id).await {
                        Ok(new_rx) => {
                            tracing::debug!(conversation_id = %conversation_id, "Realtime channel resubscribed");
                            rx = new_rx;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Realtime resubscription failed; retrying");
                            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                            rx = match channel.subscribe(conversation_id).await {
                                Ok(new_rx) => new_rx,
                                Err(_) => continue,
                            };
                        }
                    }
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
