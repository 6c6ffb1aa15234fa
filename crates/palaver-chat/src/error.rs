//! Error types for the chat engine.

use palaver_core::error::PalaverError;
use palaver_core::types::Phase;

/// Errors from the chat engine.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("a turn is already in flight for this conversation")]
    TurnInProgress,
    #[error("no turn is in flight")]
    NoActiveTurn,
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidPhase { from: Phase, to: Phase },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("realtime channel error: {0}")]
    Channel(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("state error: {0}")]
    State(String),
}

impl From<PalaverError> for ChatError {
    fn from(err: PalaverError) -> Self {
        match err {
            PalaverError::Transport(msg) => ChatError::Transport(msg),
            PalaverError::Realtime(msg) => ChatError::Channel(msg),
            PalaverError::Storage(msg) => ChatError::Storage(msg),
            other => ChatError::State(other.to_string()),
        }
    }
}
