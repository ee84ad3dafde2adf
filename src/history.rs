//! Append-only conversation history (spec §2, §4.1).
//!
//! The teacher keeps history as a plain `Vec<Message>` owned by whichever
//! caller happens to hold it. This crate routes all mutation through a
//! single adapter so the "at most one system message" invariant and the
//! agent loop's read/commit phases have one place to live, per spec §8's
//! "History adapter is mutated exclusively by the agent loop" invariant.

use crate::message::{BaseMessage, ContentPart};

/// Owns the message list for one conversation. Only the agent loop is
/// expected to call the mutating methods; other callers should treat
/// `messages()` as a read-only snapshot.
#[derive(Debug, Clone, Default)]
pub struct History {
    messages: Vec<BaseMessage>,
    system_enqueued: bool,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a system message. Ignored (not an error) if one was already
    /// enqueued, per spec §4.1's "subsequent enqueues are ignored".
    pub fn enqueue_system(&mut self, parts: Vec<ContentPart>) {
        if self.system_enqueued {
            return;
        }
        self.system_enqueued = true;
        // The system message always leads the transcript regardless of
        // what has already been enqueued (there is nothing before it in
        // practice, since callers enqueue it before the first user turn).
        self.messages.insert(0, BaseMessage::System { content: parts });
    }

    pub fn enqueue_user(&mut self, parts: Vec<ContentPart>) {
        self.messages.push(BaseMessage::user_parts(parts));
    }

    pub fn enqueue_user_text(&mut self, text: impl Into<String>) {
        self.enqueue_user(vec![ContentPart::text(text)]);
    }

    pub fn enqueue_tool_result(&mut self, message: BaseMessage) {
        debug_assert!(matches!(message, BaseMessage::Tool { .. }));
        self.messages.push(message);
    }

    /// Commits the messages a provider call returned (assistant text,
    /// tool-call requests, reasoning items) to history in order.
    pub fn commit_response(&mut self, messages: Vec<BaseMessage>) {
        self.messages.extend(messages);
    }

    /// The full transcript, in order, for preparing the next invocation
    /// input. Returned as a slice: no copy, per spec §8's "no copying
    /// semantics guarantees" remark — callers must not assume a snapshot
    /// survives across a subsequent mutation.
    pub fn messages(&self) -> &[BaseMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Replaces the message at `index` in place. Used by the tool-output
    /// cache and compaction service to rewrite history without disturbing
    /// ordering or unrelated messages.
    pub fn replace_at(&mut self, index: usize, message: BaseMessage) {
        self.messages[index] = message;
    }

    /// Replaces the entire transcript, preserving the system message if one
    /// was enqueued and `new_messages` doesn't lead with one itself. Used
    /// by compaction's history rewrite.
    pub fn replace_all(&mut self, new_messages: Vec<BaseMessage>) {
        self.messages = new_messages;
    }

    pub fn has_system_message(&self) -> bool {
        self.system_enqueued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_system_enqueue_is_ignored() {
        let mut h = History::new();
        h.enqueue_system(vec![ContentPart::text("first")]);
        h.enqueue_system(vec![ContentPart::text("second")]);
        let systems: Vec<_> = h
            .messages()
            .iter()
            .filter(|m| matches!(m, BaseMessage::System { .. }))
            .collect();
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].text(), "first");
    }

    #[test]
    fn commit_response_appends_in_order() {
        let mut h = History::new();
        h.enqueue_user_text("hi");
        h.commit_response(vec![BaseMessage::assistant_text("hello")]);
        assert_eq!(h.len(), 2);
        assert_eq!(h.messages()[1].text(), "hello");
    }

    #[test]
    fn replace_at_preserves_other_entries() {
        let mut h = History::new();
        h.enqueue_user_text("a");
        h.enqueue_user_text("b");
        h.replace_at(0, BaseMessage::user_text("replaced"));
        assert_eq!(h.messages()[0].text(), "replaced");
        assert_eq!(h.messages()[1].text(), "b");
    }
}
