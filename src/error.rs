//! Error types for the chat client.

use thiserror::Error;

/// Result type for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;

/// Errors that can occur while submitting or streaming a chat exchange.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Submitted text was blank.
    #[error("Message cannot be empty")]
    EmptyMessage,

    /// An assistant reply is still streaming.
    #[error("An assistant reply is still in progress")]
    Busy,

    /// HTTP request failed before or while reading the response.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint answered with a non-2xx status.
    #[error("Chat request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// Non-streaming body was not the expected JSON.
    #[error("Malformed response body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    /// The event stream was unreadable or carried an error event.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ChatError {
    /// Rejections happen before anything is appended to the conversation.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ChatError::EmptyMessage | ChatError::Busy)
    }
}
