//! Conversation synchronization and turn processing.
//!
//! Reconciles three independently arriving views of one conversation — the
//! optimistic local append, the HTTP response to the user's own request, and
//! the realtime event stream — while driving the visible multi-phase
//! processing state machine whose final step replaces the thinking
//! placeholder with the real answer, exactly once.

pub mod categorize;
pub mod clock;
pub mod error;
pub mod identity;
pub mod log;
pub mod orchestrator;
pub mod processing;
pub mod realtime;
pub mod store;
pub mod transport;

pub use clock::{Clock, InstantClock, TokioClock};
pub use error::ChatError;
pub use identity::{ActiveConversation, ConversationIdentity};
pub use log::{LocalId, MergeOutcome, MessageLog};
pub use orchestrator::{Applied, ChatState, TurnOrchestrator, TurnReport};
pub use processing::ProcessingStateMachine;
pub use realtime::{
    BroadcastRealtimeChannel, MessageSink, RealtimeChannel, RealtimeEvent, RealtimeSync,
};
pub use store::{ConversationStore, MemoryConversationStore};
pub use transport::{AgentReply, AgentRequest, AgentTransport, HttpAgentTransport, TurnResponse};
