use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The human on this side of the conversation.
    User,
    /// The agent's finalized answer.
    Assistant,
    /// The in-progress placeholder for a turn that has not finished.
    Thinking,
}

/// Lifecycle of a conversation identifier.
///
/// `Ephemeral` ids are client-generated and not yet confirmed written to
/// durable storage. Once the lifecycle leaves `Ephemeral`, the id is
/// immutable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationLifecycle {
    /// Client-generated id, no durable write confirmed yet.
    Ephemeral,
    /// First message confirmed written.
    Persisted,
    /// Persisted and currently selected in the UI.
    Active,
    /// No longer selectable; kept for history.
    Archived,
}

/// Status of the persisted conversation record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Active,
    Abandoned,
}

/// The visible phases of one in-flight turn.
///
/// Phases model a pipeline: understand the request, decide whether a tool is
/// needed, run it, interpret the result, produce text. `ExecutingTool` and
/// `ProcessingResults` are skipped when no tool is inferred for the turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Thinking,
    AnalyzingTools,
    ExecutingTool,
    ProcessingResults,
    GeneratingResponse,
    Completed,
    Failed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Thinking => "thinking",
            Phase::AnalyzingTools => "analyzing_tools",
            Phase::ExecutingTool => "executing_tool",
            Phase::ProcessingResults => "processing_results",
            Phase::GeneratingResponse => "generating_response",
            Phase::Completed => "completed",
            Phase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

impl Phase {
    /// Returns whether a transition from `self` to `target` is valid.
    ///
    /// The progression is linear; the only branch is skipping the tool pair
    /// (`AnalyzingTools -> GeneratingResponse`). Any non-terminal phase may
    /// transition to `Failed`.
    pub fn can_advance_to(&self, target: &Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if *target == Phase::Failed {
            return true;
        }
        matches!(
            (self, target),
            (Phase::Thinking, Phase::AnalyzingTools)
                | (Phase::AnalyzingTools, Phase::ExecutingTool)
                | (Phase::AnalyzingTools, Phase::GeneratingResponse)
                | (Phase::ExecutingTool, Phase::ProcessingResults)
                | (Phase::ProcessingResults, Phase::GeneratingResponse)
                | (Phase::GeneratingResponse, Phase::Completed)
        )
    }

    /// Completed and Failed accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

/// Outcome of a tool invocation as reported for the process inspector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Succeeded,
    Failed,
}

/// Semantic category a tool or request falls into.
///
/// Used only to produce human-readable phase labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Email,
    Web,
    Docs,
    Calendar,
    Messaging,
    Files,
}

/// Why a turn was retired without an answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnFailure {
    /// Network error or a non-2xx response other than 413.
    Transport,
    /// User-initiated abort or navigation away.
    Cancelled,
    /// The turn was still open when its conversation was switched away.
    Abandoned,
}

// =============================================================================
// Newtype Wrappers - Identity
// =============================================================================

/// Unique identifier for a conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a chat session (one UI attachment to a conversation).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A document reference attached to a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub document_id: String,
    pub name: String,
}

/// Message metadata carried alongside the content.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// `Some(true)` once the turn this message belongs to is finalized.
    /// A thinking message with any other value is the open turn slot.
    #[serde(default)]
    pub is_completed: Option<bool>,
}

/// One entry in the conversation transcript.
///
/// `id` is `None` until the server assigns one; optimistic inserts start
/// without an id and are resolved in place when the authoritative copy
/// arrives.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub sender_user_id: Option<String>,
    #[serde(default)]
    pub sender_agent_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<MessageMetadata>,
    #[serde(default)]
    pub process_details: Option<Vec<ProcessStep>>,
}

impl Message {
    /// Build an optimistic user message (no server id yet).
    pub fn user(
        conversation_id: ConversationId,
        content: impl Into<String>,
        sender_user_id: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            role: MessageRole::User,
            content: content.into(),
            timestamp,
            conversation_id,
            sender_user_id: Some(sender_user_id.into()),
            sender_agent_id: None,
            metadata: None,
            process_details: None,
        }
    }

    /// Build the thinking placeholder that holds a turn's slot open.
    pub fn thinking(conversation_id: ConversationId, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            role: MessageRole::Thinking,
            content: String::new(),
            timestamp,
            conversation_id,
            sender_user_id: None,
            sender_agent_id: None,
            metadata: Some(MessageMetadata {
                attachments: Vec::new(),
                is_completed: Some(false),
            }),
            process_details: None,
        }
    }

    /// Build an assistant message (used when merging a response without an
    /// open slot to resolve).
    pub fn assistant(
        conversation_id: ConversationId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp,
            conversation_id,
            sender_user_id: None,
            sender_agent_id: None,
            metadata: Some(MessageMetadata {
                attachments: Vec::new(),
                is_completed: Some(true),
            }),
            process_details: None,
        }
    }

    /// Whether this is the open thinking slot for its conversation.
    pub fn is_open_slot(&self) -> bool {
        self.role == MessageRole::Thinking
            && self
                .metadata
                .as_ref()
                .and_then(|m| m.is_completed)
                != Some(true)
    }
}

// =============================================================================
// Process steps
// =============================================================================

/// Tool detail recorded on an `ExecutingTool` step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub tool_name: String,
    #[serde(default)]
    pub provider: Option<String>,
    pub status: ToolStatus,
}

/// One recorded phase of a turn's history.
///
/// The ordered `ProcessStep` sequence is attached to the thinking message
/// while the turn runs and frozen onto the final message when it completes
/// or fails.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessStep {
    pub phase: Phase,
    pub label: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    pub completed: bool,
    #[serde(default)]
    pub tool_info: Option<ToolInfo>,
}

impl ProcessStep {
    /// Open a new step at `start_time`.
    pub fn open(
        phase: Phase,
        label: impl Into<String>,
        start_time: DateTime<Utc>,
        tool_info: Option<ToolInfo>,
    ) -> Self {
        Self {
            phase,
            label: label.into(),
            start_time,
            duration_ms: None,
            completed: false,
            tool_info,
        }
    }

    /// Close the step, recording its duration.
    pub fn close(&mut self, now: DateTime<Utc>) {
        if !self.completed {
            self.completed = true;
            self.duration_ms = Some((now - self.start_time).num_milliseconds().max(0));
        }
    }
}

// =============================================================================
// Conversation record
// =============================================================================

/// The row written opportunistically to the external conversation store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: ConversationId,
    pub agent_id: String,
    pub user_id: String,
    pub title: String,
    pub status: ConversationStatus,
    pub last_active: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Thinking.to_string(), "thinking");
        assert_eq!(Phase::AnalyzingTools.to_string(), "analyzing_tools");
        assert_eq!(Phase::ExecutingTool.to_string(), "executing_tool");
        assert_eq!(Phase::ProcessingResults.to_string(), "processing_results");
        assert_eq!(Phase::GeneratingResponse.to_string(), "generating_response");
        assert_eq!(Phase::Completed.to_string(), "completed");
        assert_eq!(Phase::Failed.to_string(), "failed");
    }

    #[test]
    fn test_phase_forward_transitions() {
        assert!(Phase::Thinking.can_advance_to(&Phase::AnalyzingTools));
        assert!(Phase::AnalyzingTools.can_advance_to(&Phase::ExecutingTool));
        assert!(Phase::ExecutingTool.can_advance_to(&Phase::ProcessingResults));
        assert!(Phase::ProcessingResults.can_advance_to(&Phase::GeneratingResponse));
        assert!(Phase::GeneratingResponse.can_advance_to(&Phase::Completed));
    }

    #[test]
    fn test_phase_skip_branch() {
        // Tool pair skipped when no tool is inferred.
        assert!(Phase::AnalyzingTools.can_advance_to(&Phase::GeneratingResponse));
        // But individual tool phases cannot be skipped once entered.
        assert!(!Phase::ExecutingTool.can_advance_to(&Phase::GeneratingResponse));
    }

    #[test]
    fn test_phase_invalid_transitions() {
        assert!(!Phase::Thinking.can_advance_to(&Phase::ExecutingTool));
        assert!(!Phase::Thinking.can_advance_to(&Phase::GeneratingResponse));
        assert!(!Phase::GeneratingResponse.can_advance_to(&Phase::Thinking));
        assert!(!Phase::ProcessingResults.can_advance_to(&Phase::ExecutingTool));
    }

    #[test]
    fn test_phase_failure_from_any_non_terminal() {
        assert!(Phase::Thinking.can_advance_to(&Phase::Failed));
        assert!(Phase::AnalyzingTools.can_advance_to(&Phase::Failed));
        assert!(Phase::ExecutingTool.can_advance_to(&Phase::Failed));
        assert!(Phase::ProcessingResults.can_advance_to(&Phase::Failed));
        assert!(Phase::GeneratingResponse.can_advance_to(&Phase::Failed));
    }

    #[test]
    fn test_phase_terminal_states() {
        assert!(Phase::Completed.is_terminal());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Completed.can_advance_to(&Phase::Thinking));
        assert!(!Phase::Failed.can_advance_to(&Phase::Failed));
    }

    #[test]
    fn test_conversation_id_unique() {
        assert_ne!(ConversationId::new(), ConversationId::new());
    }

    #[test]
    fn test_message_user_constructor() {
        let cid = ConversationId::new();
        let msg = Message::user(cid, "hello", "user-1", Utc::now());
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(msg.content, "hello");
        assert!(msg.id.is_none());
        assert_eq!(msg.conversation_id, cid);
        assert_eq!(msg.sender_user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn test_thinking_message_is_open_slot() {
        let msg = Message::thinking(ConversationId::new(), Utc::now());
        assert!(msg.is_open_slot());
    }

    #[test]
    fn test_completed_thinking_message_is_not_open_slot() {
        let mut msg = Message::thinking(ConversationId::new(), Utc::now());
        msg.metadata = Some(MessageMetadata {
            attachments: Vec::new(),
            is_completed: Some(true),
        });
        assert!(!msg.is_open_slot());
    }

    #[test]
    fn test_assistant_message_is_not_open_slot() {
        let msg = Message::assistant(ConversationId::new(), "done", Utc::now());
        assert!(!msg.is_open_slot());
    }

    #[test]
    fn test_thinking_without_metadata_is_open_slot() {
        let mut msg = Message::thinking(ConversationId::new(), Utc::now());
        msg.metadata = None;
        assert!(msg.is_open_slot());
    }

    #[test]
    fn test_process_step_close_records_duration() {
        let start = Utc::now();
        let mut step = ProcessStep::open(Phase::Thinking, "Thinking", start, None);
        assert!(!step.completed);
        step.close(start + chrono::Duration::milliseconds(120));
        assert!(step.completed);
        assert_eq!(step.duration_ms, Some(120));
    }

    #[test]
    fn test_process_step_close_is_idempotent() {
        let start = Utc::now();
        let mut step = ProcessStep::open(Phase::Thinking, "Thinking", start, None);
        step.close(start + chrono::Duration::milliseconds(50));
        step.close(start + chrono::Duration::milliseconds(5000));
        assert_eq!(step.duration_ms, Some(50));
    }

    #[test]
    fn test_process_step_duration_never_negative() {
        let start = Utc::now();
        let mut step = ProcessStep::open(Phase::Thinking, "Thinking", start, None);
        step.close(start - chrono::Duration::milliseconds(10));
        assert_eq!(step.duration_ms, Some(0));
    }

    #[test]
    fn test_enum_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&MessageRole::Assistant).unwrap(),
            "\"assistant\""
        );
        assert_eq!(
            serde_json::to_string(&Phase::AnalyzingTools).unwrap(),
            "\"analyzing_tools\""
        );
        assert_eq!(
            serde_json::to_string(&ConversationLifecycle::Ephemeral).unwrap(),
            "\"ephemeral\""
        );
        assert_eq!(
            serde_json::to_string(&TurnFailure::Abandoned).unwrap(),
            "\"abandoned\""
        );
    }

    #[test]
    fn test_message_round_trips_through_json() {
        let msg = Message::user(ConversationId::new(), "hi there", "u-9", Utc::now());
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
