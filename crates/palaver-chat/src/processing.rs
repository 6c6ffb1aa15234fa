//! Turn processing state machine.
//!
//! Tracks the phases of one in-flight turn, maintains the single thinking
//! placeholder in the message log, and retires it exactly once: into the
//! final assistant answer on success, or finalized in place on failure.
//!
//! Valid progression:
//! - idle -> thinking -> analyzing_tools -> (executing_tool ->
//!   processing_results)? -> generating_response -> completed | failed -> idle
//! - The tool pair is skipped when no tool is inferred for the turn.

use chrono::{DateTime, Utc};

use palaver_core::types::{
    ConversationId, Message, MessageRole, Phase, ProcessStep, ToolInfo, TurnFailure,
};

use crate::categorize::phase_label;
use crate::error::ChatError;
use crate::log::{LocalId, MessageLog};

#[derive(Debug)]
struct OpenTurn {
    /// The thinking placeholder's log entry.
    slot: LocalId,
    /// The optimistic user message that opened the turn.
    user_local: LocalId,
    phase: Phase,
    steps: Vec<ProcessStep>,
}

/// Drives one turn's phase progression and its thinking slot.
#[derive(Debug, Default)]
pub struct ProcessingStateMachine {
    turn: Option<OpenTurn>,
    /// Phase currently shown in the UI; lingers on completed/failed until
    /// the orchestrator clears it back to idle.
    display: Option<Phase>,
}

impl ProcessingStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a turn: insert the thinking placeholder and open the first step.
    ///
    /// Refuses while a slot is already open; callers must await completion
    /// or failure of the previous turn first.
    pub fn start(
        &mut self,
        log: &mut MessageLog,
        conversation_id: ConversationId,
        user_local: LocalId,
        now: DateTime<Utc>,
    ) -> Result<LocalId, ChatError> {
        if self.turn.is_some() || log.open_slot().is_some() {
            return Err(ChatError::TurnInProgress);
        }

        let slot = log.append(Message::thinking(conversation_id, now));
        let steps = vec![ProcessStep::open(
            Phase::Thinking,
            phase_label(Phase::Thinking, None),
            now,
            None,
        )];
        self.turn = Some(OpenTurn {
            slot,
            user_local,
            phase: Phase::Thinking,
            steps,
        });
        self.display = Some(Phase::Thinking);
        tracing::debug!(conversation_id = %conversation_id, "Turn started");
        Ok(slot)
    }

    /// Advance to a display phase.
    ///
    /// First visit closes the previous phase's step and opens a new one;
    /// a repeated visit to the current phase updates the open step in place
    /// (a second tool call reuses the executing step).
    pub fn advance(
        &mut self,
        phase: Phase,
        tool: Option<ToolInfo>,
        now: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        let turn = self.turn.as_mut().ok_or(ChatError::NoActiveTurn)?;

        if phase == turn.phase {
            if let Some(step) = turn.steps.last_mut() {
                step.label = phase_label(phase, tool.as_ref());
                step.tool_info = tool;
            }
            return Ok(());
        }

        if phase.is_terminal() || !turn.phase.can_advance_to(&phase) {
            return Err(ChatError::InvalidPhase {
                from: turn.phase,
                to: phase,
            });
        }

        if let Some(step) = turn.steps.last_mut() {
            step.close(now);
        }
        tracing::debug!("Turn phase: {} -> {}", turn.phase, phase);
        turn.steps.push(ProcessStep::open(
            phase,
            phase_label(phase, tool.as_ref()),
            now,
            tool,
        ));
        turn.phase = phase;
        self.display = Some(phase);
        Ok(())
    }

    /// Finish the turn with the agent's answer: close all open steps and
    /// resolve the thinking slot into a `role = assistant` message carrying
    /// the accumulated phase history.
    ///
    /// If the slot was already retired by a realtime delivery, this is a
    /// no-op; the answer is already in the log.
    pub fn complete_with_response(
        &mut self,
        log: &mut MessageLog,
        text: String,
        now: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        let mut turn = match self.turn.take() {
            Some(turn) => turn,
            None => return Ok(()),
        };

        Self::freeze_steps(&mut turn.steps, Phase::Completed, now);
        match log.get(turn.slot).map(|m| m.role) {
            Some(MessageRole::Thinking) => {
                log.resolve_slot(turn.slot, text, turn.steps);
            }
            Some(_) => {
                // Realtime resolved the slot first; its content is
                // authoritative, only the phase history is ours to attach.
                log.attach_process_details(turn.slot, turn.steps);
            }
            None => {
                tracing::warn!("Thinking slot vanished before completion");
            }
        }
        self.display = Some(Phase::Completed);
        Ok(())
    }

    /// Retire the turn without an answer. The thinking message is finalized
    /// in place, role unchanged, so the transcript renders it as a
    /// failed/aborted turn.
    ///
    /// Returns the optimistic user message's entry so the caller can decide
    /// whether to roll it back.
    pub fn fail(
        &mut self,
        log: &mut MessageLog,
        reason: TurnFailure,
        now: DateTime<Utc>,
    ) -> Result<Option<LocalId>, ChatError> {
        let mut turn = match self.turn.take() {
            Some(turn) => turn,
            None => return Ok(None),
        };

        Self::freeze_steps(&mut turn.steps, Phase::Failed, now);
        log.fail_slot(turn.slot, turn.steps);
        self.display = Some(Phase::Failed);
        tracing::debug!(reason = ?reason, "Turn retired without an answer");
        Ok(Some(turn.user_local))
    }

    /// Note that a realtime-delivered assistant message resolved the open
    /// slot (the push beat the HTTP response). Freezes the phase history
    /// onto the resolved entry and retires the turn.
    ///
    /// Returns whether a turn was retired.
    pub fn observe_remote_assistant(&mut self, log: &mut MessageLog, now: DateTime<Utc>) -> bool {
        let resolved = self
            .turn
            .as_ref()
            .and_then(|turn| log.get(turn.slot))
            .map(|message| message.role == MessageRole::Assistant)
            .unwrap_or(false);
        if !resolved {
            return false;
        }

        let mut turn = match self.turn.take() {
            Some(turn) => turn,
            None => return false,
        };
        Self::freeze_steps(&mut turn.steps, Phase::Completed, now);
        log.attach_process_details(turn.slot, turn.steps);
        self.display = Some(Phase::Completed);
        tracing::debug!("Open turn retired by realtime delivery");
        true
    }

    /// The phase currently shown, `None` when idle.
    pub fn phase(&self) -> Option<Phase> {
        self.display
    }

    /// Whether a turn is in flight.
    pub fn is_open(&self) -> bool {
        self.turn.is_some()
    }

    /// Return the display to idle after the completed/failed linger.
    pub fn reset_display(&mut self) {
        if self.turn.is_none() {
            self.display = None;
        }
    }

    /// Drop any turn state without touching the log (conversation switch,
    /// after the open turn has been failed).
    pub fn force_reset(&mut self) {
        self.turn = None;
        self.display = None;
    }

    /// Close all open steps and append the terminal step.
    fn freeze_steps(steps: &mut Vec<ProcessStep>, terminal: Phase, now: DateTime<Utc>) {
        for step in steps.iter_mut() {
            step.close(now);
        }
        let mut last = ProcessStep::open(terminal, phase_label(terminal, None), now, None);
        last.close(now);
        steps.push(last);
    }
}

// =============================================================================
// Tests
// =============================================================================
