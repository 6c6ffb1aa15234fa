use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, Message, Phase, ToolInfo, TurnFailure};

/// The closed set of events that drive chat state.
///
/// Every mutation of the chat state goes through exactly one of these, which
/// makes the merge and ordering invariants testable without a UI harness.
/// Applied events are also published on a broadcast channel for host-app
/// observability (process inspectors, debug overlays).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ChatEvent {
    /// The user submitted a message; the optimistic append and the turn
    /// start happen together.
    UserSubmitted { message: Message },

    /// The in-flight turn's display advanced to a new phase.
    PhaseAdvanced {
        conversation_id: ConversationId,
        phase: Phase,
        tool: Option<ToolInfo>,
    },

    /// The agent backend answered the outstanding request.
    ResponseReceived {
        conversation_id: ConversationId,
        text: String,
    },

    /// A push-delivered message arrived on the realtime channel.
    RealtimeMessageArrived { message: Message },

    /// The in-flight turn was retired without an answer.
    TurnFailed {
        conversation_id: ConversationId,
        reason: TurnFailure,
    },

    /// The active conversation changed; previous state is torn down.
    ConversationSwitched { conversation_id: ConversationId },
}

impl ChatEvent {
    /// The conversation this event belongs to.
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            ChatEvent::UserSubmitted { message } => message.conversation_id,
            ChatEvent::PhaseAdvanced {
                conversation_id, ..
            } => *conversation_id,
            ChatEvent::ResponseReceived {
                conversation_id, ..
            } => *conversation_id,
            ChatEvent::RealtimeMessageArrived { message } => message.conversation_id,
            ChatEvent::TurnFailed {
                conversation_id, ..
            } => *conversation_id,
            ChatEvent::ConversationSwitched { conversation_id } => *conversation_id,
        }
    }
}
