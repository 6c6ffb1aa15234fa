//! The conversation message log.
//!
//! An ordered, deduplicated sequence of messages for one conversation; the
//! single source of truth the transcript renders from. Three producers feed
//! it: the optimistic local append, the HTTP response to the user's own
//! request, and the realtime event stream. `merge` reconciles them so each
//! logical message appears exactly once no matter which copy lands first.

use palaver_core::types::{Message, MessageMetadata, MessageRole, ProcessStep};

/// Log-internal identity for one entry, assigned in arrival order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalId(u64);

/// What `merge` did with an incoming message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No plausible local counterpart; the message was appended.
    Inserted(LocalId),
    /// An unresolved optimistic entry was resolved in place.
    Resolved(LocalId),
    /// A message with the same server id already exists; no-op.
    Duplicate,
}

#[derive(Clone, Debug)]
struct Entry {
    local: LocalId,
    message: Message,
}

/// Ordered, deduplicated message collection for one conversation.
#[derive(Debug)]
pub struct MessageLog {
    entries: Vec<Entry>,
    next_local: u64,
    max_entries: usize,
}

impl MessageLog {
    /// Create an empty log bounded to `max_entries` rendered messages.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            next_local: 0,
            max_entries,
        }
    }

    /// Optimistic insert. The message carries no server id yet.
    pub fn append(&mut self, message: Message) -> LocalId {
        let local = self.push(message);
        self.evict();
        local
    }

    /// Merge a message from an authoritative producer (HTTP response echo or
    /// realtime event).
    ///
    /// Same server id already present: no-op. An unresolved optimistic entry
    /// that plausibly matches: resolved in place (the server id is attached)
    /// rather than duplicated. Anything else: appended.
    pub fn merge(&mut self, incoming: Message) -> MergeOutcome {
        if let Some(id) = incoming.id.as_deref() {
            if self
                .entries
                .iter()
                .any(|e| e.message.id.as_deref() == Some(id))
            {
                tracing::debug!(message_id = id, "Duplicate delivery absorbed");
                return MergeOutcome::Duplicate;
            }
        }

        if let Some(index) = self.find_match(&incoming) {
            let entry = &mut self.entries[index];
            let local = entry.local;
            let message = &mut entry.message;

            if message.role == MessageRole::Thinking {
                // The open slot resolves into the pushed assistant answer.
                message.role = MessageRole::Assistant;
                message.content = incoming.content;
                metadata_mut(message).is_completed = Some(true);
            }
            if message.id.is_none() {
                message.id = incoming.id;
            }
            if message.sender_user_id.is_none() {
                message.sender_user_id = incoming.sender_user_id;
            }
            if message.sender_agent_id.is_none() {
                message.sender_agent_id = incoming.sender_agent_id;
            }
            // The optimistic timestamp is kept: the rendered order must not
            // jump under the user's cursor once the server copy lands.
            return MergeOutcome::Resolved(local);
        }

        MergeOutcome::Inserted(self.append(incoming))
    }

    /// The transcript, sorted by timestamp ascending; ties broken by
    /// arrival order.
    pub fn render(&self) -> Vec<Message> {
        let mut entries: Vec<&Entry> = self.entries.iter().collect();
        entries.sort_by_key(|e| (e.message.timestamp, e.local.0));
        entries.into_iter().map(|e| e.message.clone()).collect()
    }

    /// Clear the log (conversation switch).
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The open thinking slot, if one exists.
    pub fn open_slot(&self) -> Option<LocalId> {
        self.entries
            .iter()
            .find(|e| e.message.is_open_slot())
            .map(|e| e.local)
    }

    /// Look up one entry's message.
    pub fn get(&self, local: LocalId) -> Option<&Message> {
        self.entries
            .iter()
            .find(|e| e.local == local)
            .map(|e| &e.message)
    }

    /// Resolve the thinking slot into the final assistant answer. The single
    /// success retirement point for a turn.
    pub fn resolve_slot(&mut self, local: LocalId, text: String, steps: Vec<ProcessStep>) -> bool {
        match self.entries.iter_mut().find(|e| e.local == local) {
            Some(entry) => {
                let message = &mut entry.message;
                message.role = MessageRole::Assistant;
                message.content = text;
                message.process_details = Some(steps);
                metadata_mut(message).is_completed = Some(true);
                true
            }
            None => false,
        }
    }

    /// Mark the thinking slot finalized without converting its role; the
    /// transcript renders it as a failed/aborted turn.
    pub fn fail_slot(&mut self, local: LocalId, steps: Vec<ProcessStep>) -> bool {
        match self.entries.iter_mut().find(|e| e.local == local) {
            Some(entry) => {
                entry.message.process_details = Some(steps);
                metadata_mut(&mut entry.message).is_completed = Some(true);
                true
            }
            None => false,
        }
    }

    /// Attach a turn's phase history to an already-resolved entry (the
    /// realtime copy may have retired the slot before the HTTP response).
    pub fn attach_process_details(&mut self, local: LocalId, steps: Vec<ProcessStep>) -> bool {
        match self.entries.iter_mut().find(|e| e.local == local) {
            Some(entry) => {
                entry.message.process_details = Some(steps);
                true
            }
            None => false,
        }
    }

    /// Roll back an optimistic entry that never acquired a server id.
    /// Entries that were resolved are left in place.
    pub fn remove_unresolved(&mut self, local: LocalId) -> bool {
        let index = self
            .entries
            .iter()
            .position(|e| e.local == local && e.message.id.is_none());
        match index {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    // -- Private helpers --

    fn push(&mut self, message: Message) -> LocalId {
        let local = LocalId(self.next_local);
        self.next_local += 1;
        self.entries.push(Entry { local, message });
        local
    }

    /// Find the unresolved optimistic entry an incoming authoritative copy
    /// should resolve, if any. Returns the entry index.
    fn find_match(&self, incoming: &Message) -> Option<usize> {
        match incoming.role {
            MessageRole::User => self.entries.iter().position(|e| {
                e.message.id.is_none()
                    && e.message.role == MessageRole::User
                    && e.message.conversation_id == incoming.conversation_id
                    && e.message.content == incoming.content
            }),
            MessageRole::Assistant => {
                // The open thinking slot is the expected landing place for a
                // pushed assistant answer; a content-equal unresolved
                // assistant covers the case where the HTTP response already
                // resolved the slot and the realtime copy arrives later.
                let slot = self.entries.iter().position(|e| {
                    e.message.is_open_slot()
                        && e.message.conversation_id == incoming.conversation_id
                });
                slot.or_else(|| {
                    self.entries.iter().position(|e| {
                        e.message.id.is_none()
                            && e.message.role == MessageRole::Assistant
                            && e.message.conversation_id == incoming.conversation_id
                            && e.message.content == incoming.content
                    })
                })
            }
            MessageRole::Thinking => None,
        }
    }

    /// Drop the oldest resolved entries once the bound is exceeded. The open
    /// slot and unresolved optimistic entries are never evicted.
    fn evict(&mut self) {
        while self.entries.len() > self.max_entries {
            let victim = self
                .entries
                .iter()
                .filter(|e| e.message.id.is_some() && !e.message.is_open_slot())
                .min_by_key(|e| (e.message.timestamp, e.local.0))
                .map(|e| e.local);
            match victim {
                Some(local) => {
                    tracing::debug!("Evicting oldest resolved message from log");
                    self.entries.retain(|e| e.local != local);
                }
                None => break,
            }
        }
    }
}

fn metadata_mut(message: &mut Message) -> &mut MessageMetadata {
    message.metadata.get_or_insert_with(MessageMetadata::default)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use palaver_core::types::{ConversationId, Phase, ProcessStep};

    fn cid() -> ConversationId {
        ConversationId::new()
    }

    fn server_user(conversation_id: ConversationId, content: &str, id: &str) -> Message {
        let mut msg = Message::user(conversation_id, content, "user-1", Utc::now());
        msg.id = Some(id.to_string());
        msg
    }

    fn server_assistant(conversation_id: ConversationId, content: &str, id: &str) -> Message {
        let mut msg = Message::assistant(conversation_id, content, Utc::now());
        msg.id = Some(id.to_string());
        msg.sender_agent_id = Some("agent-1".to_string());
        msg
    }

    fn steps() -> Vec<ProcessStep> {
        vec![ProcessStep::open(Phase::Thinking, "Thinking", Utc::now(), None)]
    }

    // ---- Append / render ----

    #[test]
    fn test_append_and_render() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        log.append(Message::user(conversation, "first", "u", Utc::now()));
        log.append(Message::user(conversation, "second", "u", Utc::now()));

        let rendered = log.render();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].content, "first");
        assert_eq!(rendered[1].content, "second");
    }

    #[test]
    fn test_render_sorted_by_timestamp() {
        let conversation = cid();
        let now = Utc::now();
        let mut log = MessageLog::new(100);
        log.append(Message::user(conversation, "later", "u", now + Duration::seconds(5)));
        log.append(Message::user(conversation, "earlier", "u", now));

        let rendered = log.render();
        assert_eq!(rendered[0].content, "earlier");
        assert_eq!(rendered[1].content, "later");
    }

    #[test]
    fn test_render_ties_broken_by_arrival() {
        let conversation = cid();
        let now = Utc::now();
        let mut log = MessageLog::new(100);
        log.append(Message::user(conversation, "a", "u", now));
        log.append(Message::user(conversation, "b", "u", now));
        log.append(Message::user(conversation, "c", "u", now));

        let rendered: Vec<String> = log.render().into_iter().map(|m| m.content).collect();
        assert_eq!(rendered, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reset_clears_log() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        log.append(Message::user(conversation, "hello", "u", Utc::now()));
        log.reset();
        assert!(log.is_empty());
        assert!(log.open_slot().is_none());
    }

    // ---- Merge: duplicates ----

    #[test]
    fn test_merge_same_server_id_is_duplicate() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        log.merge(server_assistant(conversation, "answer", "m-1"));
        let outcome = log.merge(server_assistant(conversation, "answer", "m-1"));
        assert_eq!(outcome, MergeOutcome::Duplicate);
        assert_eq!(log.render().len(), 1);
    }

    #[test]
    fn test_merge_idempotence() {
        // For any message m, merging twice yields the same render as once.
        let conversation = cid();
        let mut log = MessageLog::new(100);
        log.append(Message::user(conversation, "hi", "u", Utc::now()));

        let m = server_user(conversation, "hi", "m-7");
        log.merge(m.clone());
        let once = log.render();
        log.merge(m);
        assert_eq!(log.render(), once);
    }

    // ---- Merge: optimistic user resolution ----

    #[test]
    fn test_merge_resolves_optimistic_user_message() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        let local = log.append(Message::user(conversation, "hello", "u", Utc::now()));

        let outcome = log.merge(server_user(conversation, "hello", "m-1"));
        assert_eq!(outcome, MergeOutcome::Resolved(local));

        let rendered = log.render();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].id.as_deref(), Some("m-1"));
    }

    #[test]
    fn test_merge_user_requires_content_equality() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        log.append(Message::user(conversation, "hello", "u", Utc::now()));

        let outcome = log.merge(server_user(conversation, "different text", "m-2"));
        assert!(matches!(outcome, MergeOutcome::Inserted(_)));
        assert_eq!(log.render().len(), 2);
    }

    #[test]
    fn test_merge_ignores_other_conversations() {
        let mut log = MessageLog::new(100);
        log.append(Message::user(cid(), "hello", "u", Utc::now()));

        let outcome = log.merge(server_user(cid(), "hello", "m-3"));
        assert!(matches!(outcome, MergeOutcome::Inserted(_)));
        assert_eq!(log.render().len(), 2);
    }

    #[test]
    fn test_merge_keeps_optimistic_timestamp() {
        let conversation = cid();
        let now = Utc::now();
        let mut log = MessageLog::new(100);
        log.append(Message::user(conversation, "hello", "u", now));

        let mut server = server_user(conversation, "hello", "m-4");
        server.timestamp = now + Duration::seconds(30);
        log.merge(server);

        assert_eq!(log.render()[0].timestamp, now);
    }

    // ---- Merge: assistant into the open slot ----

    #[test]
    fn test_merge_assistant_resolves_open_slot() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        let slot = log.append(Message::thinking(conversation, Utc::now()));

        let outcome = log.merge(server_assistant(conversation, "the answer", "m-9"));
        assert_eq!(outcome, MergeOutcome::Resolved(slot));
        assert!(log.open_slot().is_none());

        let rendered = log.render();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].role, MessageRole::Assistant);
        assert_eq!(rendered[0].content, "the answer");
        assert_eq!(rendered[0].id.as_deref(), Some("m-9"));
        assert_eq!(
            rendered[0].metadata.as_ref().unwrap().is_completed,
            Some(true)
        );
    }

    #[test]
    fn test_merge_assistant_without_slot_appends() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        let outcome = log.merge(server_assistant(conversation, "hello there", "m-1"));
        assert!(matches!(outcome, MergeOutcome::Inserted(_)));
    }

    #[test]
    fn test_merge_assistant_matches_content_equal_resolved_twin() {
        // HTTP response resolved the slot first; the realtime copy arrives
        // later and must not duplicate.
        let conversation = cid();
        let mut log = MessageLog::new(100);
        let slot = log.append(Message::thinking(conversation, Utc::now()));
        log.resolve_slot(slot, "final answer".to_string(), steps());

        let outcome = log.merge(server_assistant(conversation, "final answer", "m-5"));
        assert_eq!(outcome, MergeOutcome::Resolved(slot));

        let rendered = log.render();
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].id.as_deref(), Some("m-5"));
    }

    #[test]
    fn test_merge_commutativity_of_realtime_and_response() {
        // Either order of (realtime assistant event, HTTP completion with the
        // same text) yields exactly one assistant message.
        let conversation = cid();

        // Order 1: realtime first, then completion.
        let mut log1 = MessageLog::new(100);
        log1.append(Message::user(conversation, "q", "u", Utc::now()));
        let slot1 = log1.append(Message::thinking(conversation, Utc::now()));
        log1.merge(server_assistant(conversation, "same text", "m-1"));
        // Completion path sees the slot already assistant and only attaches steps.
        assert!(log1.open_slot().is_none());
        log1.attach_process_details(slot1, steps());

        // Order 2: completion first, then realtime.
        let mut log2 = MessageLog::new(100);
        log2.append(Message::user(conversation, "q", "u", Utc::now()));
        let slot2 = log2.append(Message::thinking(conversation, Utc::now()));
        log2.resolve_slot(slot2, "same text".to_string(), steps());
        log2.merge(server_assistant(conversation, "same text", "m-1"));

        let assistants = |log: &MessageLog| {
            log.render()
                .into_iter()
                .filter(|m| m.role == MessageRole::Assistant)
                .count()
        };
        assert_eq!(assistants(&log1), 1);
        assert_eq!(assistants(&log2), 1);
    }

    // ---- Slot operations ----

    #[test]
    fn test_open_slot_tracking() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        assert!(log.open_slot().is_none());

        let slot = log.append(Message::thinking(conversation, Utc::now()));
        assert_eq!(log.open_slot(), Some(slot));

        log.resolve_slot(slot, "done".to_string(), steps());
        assert!(log.open_slot().is_none());
    }

    #[test]
    fn test_fail_slot_keeps_role() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        let slot = log.append(Message::thinking(conversation, Utc::now()));
        assert!(log.fail_slot(slot, steps()));

        let message = log.get(slot).unwrap();
        assert_eq!(message.role, MessageRole::Thinking);
        assert_eq!(message.metadata.as_ref().unwrap().is_completed, Some(true));
        assert!(log.open_slot().is_none());
    }

    #[test]
    fn test_resolve_slot_attaches_steps() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        let slot = log.append(Message::thinking(conversation, Utc::now()));
        log.resolve_slot(slot, "answer".to_string(), steps());

        let message = log.get(slot).unwrap();
        assert!(message.process_details.is_some());
        assert_eq!(message.content, "answer");
    }

    #[test]
    fn test_slot_operations_on_missing_entry() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        let slot = log.append(Message::thinking(conversation, Utc::now()));
        log.reset();
        assert!(!log.resolve_slot(slot, "x".to_string(), vec![]));
        assert!(!log.fail_slot(slot, vec![]));
        assert!(!log.attach_process_details(slot, vec![]));
    }

    // ---- Rollback ----

    #[test]
    fn test_remove_unresolved_rolls_back() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        let local = log.append(Message::user(conversation, "oops", "u", Utc::now()));
        assert!(log.remove_unresolved(local));
        assert!(log.is_empty());
    }

    #[test]
    fn test_remove_unresolved_keeps_resolved_entries() {
        let conversation = cid();
        let mut log = MessageLog::new(100);
        let local = log.append(Message::user(conversation, "kept", "u", Utc::now()));
        log.merge(server_user(conversation, "kept", "m-1"));
        assert!(!log.remove_unresolved(local));
        assert_eq!(log.render().len(), 1);
    }

    // ---- Eviction ----

    #[test]
    fn test_eviction_drops_oldest_resolved() {
        let conversation = cid();
        let now = Utc::now();
        let mut log = MessageLog::new(3);
        for i in 0..5 {
            let mut msg = Message::user(
                conversation,
                format!("msg {}", i),
                "u",
                now + Duration::seconds(i),
            );
            msg.id = Some(format!("m-{}", i));
            log.append(msg);
        }

        let rendered = log.render();
        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[0].content, "msg 2");
        assert_eq!(rendered[2].content, "msg 4");
    }

    #[test]
    fn test_eviction_never_drops_open_slot_or_unresolved() {
        let conversation = cid();
        let now = Utc::now();
        let mut log = MessageLog::new(1);
        // Oldest entries are protected: an unresolved optimistic message and
        // the open slot.
        log.append(Message::user(conversation, "pending", "u", now));
        log.append(Message::thinking(conversation, now + Duration::seconds(1)));
        let mut resolved = Message::user(conversation, "old", "u", now + Duration::seconds(2));
        resolved.id = Some("m-1".to_string());
        log.append(resolved);

        // Only the resolved entry was evictable.
        let rendered = log.render();
        assert_eq!(rendered.len(), 2);
        assert!(rendered.iter().any(|m| m.content == "pending"));
        assert!(log.open_slot().is_some());
    }

    // ---- Interleaving ----

    #[test]
    fn test_any_interleaving_keeps_each_message_once() {
        let conversation = cid();
        let now = Utc::now();

        // Producer copies of the same logical turn.
        let optimistic = Message::user(conversation, "question", "u", now);
        let user_echo = server_user(conversation, "question", "srv-u");
        let assistant_push = server_assistant(conversation, "reply", "srv-a");

        // Interleaving 1: append, echo, thinking, push.
        let mut log = MessageLog::new(100);
        log.append(optimistic.clone());
        log.merge(user_echo.clone());
        log.append(Message::thinking(conversation, now + Duration::seconds(1)));
        log.merge(assistant_push.clone());
        log.merge(assistant_push.clone());
        assert_eq!(log.render().len(), 2);

        // Interleaving 2: echo before the optimistic copy ever resolves.
        let mut log = MessageLog::new(100);
        log.merge(user_echo.clone());
        log.append(Message::thinking(conversation, now + Duration::seconds(1)));
        log.merge(assistant_push.clone());
        log.merge(user_echo);
        assert_eq!(log.render().len(), 2);
    }
}
