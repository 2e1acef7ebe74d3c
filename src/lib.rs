// Streaming chat client for the exam preparation assistant

pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod models;
pub mod state;
pub mod stream;

pub use api::{ChatResponse, ChatTransport, HttpTransport};
pub use config::ChatConfig;
pub use conversation::{ConversationSnapshot, ConversationState};
pub use error::{ChatError, ChatResult};
pub use models::{ChatMessage, MessageStatus, Sender};
pub use state::ChatController;
pub use stream::{join, sse_events, SseFramer, StreamEvent};
