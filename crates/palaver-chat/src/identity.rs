//! Conversation identity lifecycle.
//!
//! Owns the active conversation id from ephemeral (client-generated, not yet
//! persisted) through persisted/active to archived. Pure bookkeeping: none of
//! these operations touch the network and none can fail.

use palaver_core::types::{ConversationId, ConversationLifecycle, SessionId};

/// The conversation the chat surface is currently attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveConversation {
    pub conversation_id: ConversationId,
    pub session_id: SessionId,
    /// True when the id was just generated client-side. Signals the caller
    /// to reflect the id in the navigable location so reload/share keep it.
    pub is_ephemeral: bool,
}

#[derive(Clone, Copy, Debug)]
struct Current {
    id: ConversationId,
    session_id: SessionId,
    lifecycle: ConversationLifecycle,
}

/// Tracks which conversation is active and where it is in its lifecycle.
#[derive(Debug, Default)]
pub struct ConversationIdentity {
    current: Option<Current>,
}

impl ConversationIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the active conversation, generating a fresh ephemeral one if
    /// none is active.
    pub fn ensure_active(&mut self) -> ActiveConversation {
        match self.current {
            Some(current) => ActiveConversation {
                conversation_id: current.id,
                session_id: current.session_id,
                is_ephemeral: current.lifecycle == ConversationLifecycle::Ephemeral,
            },
            None => {
                let current = Current {
                    id: ConversationId::new(),
                    session_id: SessionId::new(),
                    lifecycle: ConversationLifecycle::Ephemeral,
                };
                tracing::debug!(conversation_id = %current.id, "Ephemeral conversation created");
                self.current = Some(current);
                ActiveConversation {
                    conversation_id: current.id,
                    session_id: current.session_id,
                    is_ephemeral: true,
                }
            }
        }
    }

    /// Flip an ephemeral conversation to persisted after its first confirmed
    /// write. Idempotent; ids that are not the active conversation are
    /// ignored.
    pub fn promote(&mut self, conversation_id: ConversationId) {
        if let Some(current) = self.current.as_mut() {
            if current.id == conversation_id
                && current.lifecycle == ConversationLifecycle::Ephemeral
            {
                current.lifecycle = ConversationLifecycle::Persisted;
                tracing::debug!(conversation_id = %conversation_id, "Conversation promoted");
            }
        }
    }

    /// Adopt an existing conversation as persisted and active. Teardown of
    /// the previous conversation's log and realtime channel is coordinated
    /// by the orchestrator.
    pub fn switch_to(&mut self, conversation_id: ConversationId) {
        self.current = Some(Current {
            id: conversation_id,
            session_id: SessionId::new(),
            lifecycle: ConversationLifecycle::Active,
        });
    }

    /// Archive the active conversation, if any.
    pub fn archive(&mut self) -> Option<ConversationId> {
        let current = self.current.as_mut()?;
        current.lifecycle = ConversationLifecycle::Archived;
        Some(current.id)
    }

    /// The active conversation id, if one exists.
    pub fn active_id(&self) -> Option<ConversationId> {
        self.current.map(|c| c.id)
    }

    /// The active conversation's lifecycle, if one exists.
    pub fn lifecycle(&self) -> Option<ConversationLifecycle> {
        self.current.map(|c| c.lifecycle)
    }
}

// =============================================================================
// Tests
// =============================================================================
