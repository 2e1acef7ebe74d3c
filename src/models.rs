use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

// Who wrote a message
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    /// Role string used in `previous_messages` on the wire.
    pub fn role(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }
}

// Lifecycle of a message. Only the in-flight assistant message is ever `Streaming`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Streaming,
    Complete,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MessageStatus::Streaming)
    }
}

// Represents a single message in a conversation
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub id: u64, // Sequence number within the conversation, starts at 1
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>, // Fixed at creation
    pub status: MessageStatus,
}

impl ChatMessage {
    pub fn new(id: u64, sender: Sender, text: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id,
            text: text.into(),
            sender,
            timestamp: Utc::now(),
            status,
        }
    }

    /// Creation time as `HH:MM` in local time.
    pub fn display_time(&self) -> String {
        self.timestamp.with_timezone(&Local).format("%H:%M").to_string()
    }
}

// --- Wire types for the exam chat endpoint ---

// One prior message as sent in `previous_messages`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ChatRequest {
    pub message: String,
    pub reference_ids: Vec<String>,
    // The endpoint path already carries the exam, the body copy is optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_id: Option<String>,
    #[serde(default)]
    pub previous_messages: Vec<HistoryEntry>,
}

// Non-streaming reply body
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub message: String,
}

// Error body on a non-2xx status. The proxy sends `error`, the backend sends `detail`.
#[derive(Deserialize, Debug, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        if let Some(error) = self.error {
            return Some(error);
        }
        match self.detail? {
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }
}
