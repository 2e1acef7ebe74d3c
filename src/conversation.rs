//! Conversation state for one chat view.
//!
//! Messages are append-only. At most one assistant message is in flight; it is
//! the only message whose text changes, and it is always the last one.

use crate::error::{ChatError, ChatResult};
use crate::models::{ChatMessage, HistoryEntry, MessageStatus, Sender};
use crate::stream::join_into;

/// Opening message of a fresh chat view.
pub const DEFAULT_GREETING: &str = "Hello! How can I help you with your exam preparation today?";

/// Immutable copy of the conversation handed to the display layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationSnapshot {
    pub messages: Vec<ChatMessage>,
    pub busy: bool,
}

impl ConversationSnapshot {
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

#[derive(Debug, Default)]
pub struct ConversationState {
    messages: Vec<ChatMessage>,
    in_flight: Option<usize>, // index into `messages`
    next_id: u64,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            in_flight: None,
            next_id: 1,
        }
    }

    /// Starts the conversation with a completed assistant greeting.
    pub fn with_greeting(greeting: &str) -> Self {
        let mut state = Self::new();
        state.append(Sender::Assistant, greeting.to_string(), MessageStatus::Complete);
        state
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<&ChatMessage> {
        self.in_flight.map(|idx| &self.messages[idx])
    }

    /// Appends a user message. Rejected when blank or while a reply is in flight.
    pub fn push_user(&mut self, text: &str) -> ChatResult<ChatMessage> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.is_busy() {
            return Err(ChatError::Busy);
        }
        let idx = self.append(Sender::User, text.to_string(), MessageStatus::Complete);
        Ok(self.messages[idx].clone())
    }

    /// Appends the empty assistant placeholder and marks it in flight.
    pub fn begin_assistant(&mut self) -> ChatResult<u64> {
        if self.is_busy() {
            return Err(ChatError::Busy);
        }
        let idx = self.append(Sender::Assistant, String::new(), MessageStatus::Streaming);
        self.in_flight = Some(idx);
        Ok(self.messages[idx].id)
    }

    /// Joins a delta onto the in-flight message. Returns false if nothing is in flight.
    pub fn apply_delta(&mut self, delta: &str) -> bool {
        let Some(idx) = self.in_flight else {
            return false;
        };
        join_into(&mut self.messages[idx].text, delta);
        true
    }

    /// Replaces the in-flight text in one shot (non-streaming replies).
    pub fn set_reply(&mut self, text: String) -> bool {
        let Some(idx) = self.in_flight else {
            return false;
        };
        self.messages[idx].text = text;
        true
    }

    /// Ends the in-flight message normally.
    pub fn complete(&mut self) -> Option<ChatMessage> {
        self.finish(MessageStatus::Complete, None)
    }

    /// Ends the in-flight message with `failure_text` in place of its content.
    pub fn fail(&mut self, failure_text: &str) -> Option<ChatMessage> {
        self.finish(MessageStatus::Failed, Some(failure_text))
    }

    /// Prior exchange for `previous_messages`. Skips the in-flight placeholder
    /// and the text of failed replies.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|m| m.status == MessageStatus::Complete)
            .map(|m| HistoryEntry {
                role: m.sender.role().to_string(),
                content: m.text.clone(),
            })
            .collect()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            messages: self.messages.clone(),
            busy: self.is_busy(),
        }
    }

    fn append(&mut self, sender: Sender, text: String, status: MessageStatus) -> usize {
        let id = self.next_id.max(1);
        self.next_id = id + 1;
        self.messages.push(ChatMessage::new(id, sender, text, status));
        self.messages.len() - 1
    }

    fn finish(&mut self, status: MessageStatus, replacement: Option<&str>) -> Option<ChatMessage> {
        let idx = self.in_flight.take()?;
        let message = &mut self.messages[idx];
        if let Some(text) = replacement {
            message.text = text.to_string();
        }
        message.status = status;
        Some(message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_is_first_and_complete() {
        let state = ConversationState::with_greeting(DEFAULT_GREETING);
        assert_eq!(state.messages().len(), 1);
        assert_eq!(state.messages()[0].id, 1);
        assert_eq!(state.messages()[0].sender, Sender::Assistant);
        assert!(!state.is_busy());
    }

    #[test]
    fn test_exchange_lifecycle() {
        let mut state = ConversationState::new();
        let user = state.push_user("What is entropy?").unwrap();
        assert_eq!(user.id, 1);
        let assistant_id = state.begin_assistant().unwrap();
        assert_eq!(assistant_id, 2);
        assert!(state.is_busy());

        assert!(state.apply_delta("Entropy"));
        assert!(state.apply_delta("measures"));
        assert!(state.apply_delta("disorder."));
        assert_eq!(state.in_flight().unwrap().text, "Entropy measures disorder.");

        let done = state.complete().unwrap();
        assert_eq!(done.status, MessageStatus::Complete);
        assert!(!state.is_busy());
        assert!(!state.apply_delta("late"));
        assert_eq!(state.messages()[1].text, "Entropy measures disorder.");
    }

    #[test]
    fn test_rejects_blank_and_busy_submissions() {
        let mut state = ConversationState::new();
        assert!(matches!(state.push_user("   "), Err(ChatError::EmptyMessage)));
        state.push_user("first").unwrap();
        state.begin_assistant().unwrap();
        assert!(matches!(state.push_user("second"), Err(ChatError::Busy)));
        assert!(matches!(state.begin_assistant(), Err(ChatError::Busy)));
        assert_eq!(state.messages().len(), 2);
    }

    #[test]
    fn test_failure_keeps_prior_messages() {
        let mut state = ConversationState::with_greeting(DEFAULT_GREETING);
        state.push_user("question").unwrap();
        state.begin_assistant().unwrap();
        state.apply_delta("half an");
        let failed = state.fail("Sorry, something went wrong.").unwrap();
        assert_eq!(failed.text, "Sorry, something went wrong.");
        assert_eq!(failed.status, MessageStatus::Failed);
        assert_eq!(state.messages()[0].text, DEFAULT_GREETING);
        assert_eq!(state.messages()[1].text, "question");
        assert!(!state.is_busy());
        assert!(state.push_user("again").is_ok());
    }

    #[test]
    fn test_history_skips_in_flight_and_failed() {
        let mut state = ConversationState::with_greeting("Hi");
        state.push_user("q1").unwrap();
        state.begin_assistant().unwrap();
        state.fail("error text");
        state.push_user("q2").unwrap();
        state.begin_assistant().unwrap();
        state.apply_delta("partial");

        let history = state.history();
        let roles: Vec<_> = history.iter().map(|h| h.role.as_str()).collect();
        let contents: Vec<_> = history.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(roles, vec!["assistant", "user", "user"]);
        assert_eq!(contents, vec!["Hi", "q1", "q2"]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut state = ConversationState::new();
        state.push_user("q").unwrap();
        state.begin_assistant().unwrap();
        let before = state.snapshot();
        state.apply_delta("grows");
        assert!(before.busy);
        assert_eq!(before.last().unwrap().text, "");
        assert_eq!(state.snapshot().last().unwrap().text, "grows");
    }

    #[test]
    fn test_set_reply_replaces_text() {
        let mut state = ConversationState::new();
        state.push_user("q").unwrap();
        state.begin_assistant().unwrap();
        assert!(state.set_reply("Whole answer".to_string()));
        assert_eq!(state.complete().unwrap().text, "Whole answer");
    }
}
