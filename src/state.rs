use crate::api::{ChatResponse, ChatTransport};
use crate::config::ChatConfig;
use crate::conversation::{ConversationSnapshot, ConversationState};
use crate::error::{ChatError, ChatResult};
use crate::models::{ChatMessage, ChatRequest};
use crate::stream::{sse_events, StreamEvent};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

// Drives one chat view: owns the conversation and runs one exchange at a time
#[derive(Clone)]
pub struct ChatController {
    // Single writer: only submissions append, only the running exchange updates the last message
    conversation: Arc<Mutex<ConversationState>>,
    transport: Arc<dyn ChatTransport>,
    updates: Arc<watch::Sender<ConversationSnapshot>>, // Snapshot after every mutation
    reference_ids: Arc<Vec<String>>,
    exam_id: Option<String>,
    failure_message: Arc<str>,
}

// Captured at submission, read-only while the reply streams
struct PendingExchange {
    id: Uuid,
    message_id: u64,
    request: ChatRequest,
}

impl ChatController {
    pub fn new(config: &ChatConfig, transport: Arc<dyn ChatTransport>) -> Self {
        let conversation = ConversationState::with_greeting(config.greeting());
        let (updates, _) = watch::channel(conversation.snapshot());
        Self {
            conversation: Arc::new(Mutex::new(conversation)),
            transport,
            updates: Arc::new(updates),
            reference_ids: Arc::new(config.reference_ids.clone()),
            exam_id: Some(config.exam_id.clone()).filter(|id| !id.is_empty()),
            failure_message: Arc::from(config.failure_message.as_str()),
        }
    }

    /// Receiver for conversation snapshots. Starts with the current state.
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        self.updates.borrow().clone()
    }

    /// True while an assistant reply is in flight; new submissions are rejected.
    pub fn is_busy(&self) -> bool {
        self.updates.borrow().busy
    }

    /// Appends the user message and starts the reply in the background.
    /// Returns the user message immediately.
    pub async fn send_message(&self, content: &str) -> ChatResult<ChatMessage> {
        let (user_message, pending) = self.begin(content).await?;

        let controller = self.clone();
        tokio::spawn(async move {
            if let Err(e) = controller.run_exchange(pending).await {
                log::error!("Background exchange ended without a reply: {:?}", e);
            }
        });

        Ok(user_message)
    }

    /// Appends the user message and waits for the reply to reach a terminal state.
    pub async fn exchange(&self, content: &str) -> ChatResult<ChatMessage> {
        let (_, pending) = self.begin(content).await?;
        self.run_exchange(pending).await
    }

    async fn begin(&self, content: &str) -> ChatResult<(ChatMessage, PendingExchange)> {
        let mut conversation = self.conversation.lock().await;

        // History is what precedes this message; the backend appends `message` itself
        let previous_messages = conversation.history();
        let user_message = match conversation.push_user(content) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Submission rejected: {}", e);
                return Err(e);
            }
        };
        let message_id = conversation.begin_assistant()?;
        self.publish(&conversation);

        let pending = PendingExchange {
            id: Uuid::new_v4(),
            message_id,
            request: ChatRequest {
                message: content.to_string(),
                reference_ids: self.reference_ids.to_vec(),
                exam_id: self.exam_id.clone(),
                previous_messages,
            },
        };
        log::info!(
            "Exchange {} started: user message {}, reply message {}",
            pending.id,
            user_message.id,
            pending.message_id
        );
        Ok((user_message, pending))
    }

    async fn run_exchange(&self, pending: PendingExchange) -> ChatResult<ChatMessage> {
        let outcome = self.drive(&pending).await;

        let mut conversation = self.conversation.lock().await;
        let finished = match outcome {
            Ok(()) => conversation.complete(),
            Err(e) => {
                log::error!("Exchange {} failed: {}", pending.id, e);
                conversation.fail(&self.failure_message)
            }
        };
        self.publish(&conversation);

        let message = finished.ok_or_else(|| {
            ChatError::Stream(format!("reply message {} was no longer in flight", pending.message_id))
        })?;
        log::info!(
            "Exchange {} finished as {:?} ({} chars)",
            pending.id,
            message.status,
            message.text.len()
        );
        Ok(message)
    }

    async fn drive(&self, pending: &PendingExchange) -> ChatResult<()> {
        match self.transport.send(&pending.request).await? {
            ChatResponse::Reply(reply) => {
                let mut conversation = self.conversation.lock().await;
                conversation.set_reply(reply.message);
                self.publish(&conversation);
                Ok(())
            }
            ChatResponse::Stream(bytes) => {
                let mut events = Box::pin(sse_events(bytes));
                let mut deltas = 0usize;
                while let Some(event) = events.next().await {
                    match event? {
                        StreamEvent::Delta(text) => {
                            deltas += 1;
                            let mut conversation = self.conversation.lock().await;
                            conversation.apply_delta(&text);
                            self.publish(&conversation);
                        }
                        StreamEvent::Done => {
                            log::info!("Exchange {}: stream finished with [DONE] after {} deltas", pending.id, deltas);
                            return Ok(());
                        }
                        StreamEvent::Error(message) => return Err(ChatError::Stream(message)),
                    }
                }
                log::warn!("Exchange {}: stream closed without [DONE] after {} deltas", pending.id, deltas);
                Ok(())
            }
        }
    }

    // Works with no subscribers too; late subscribers see the latest snapshot
    fn publish(&self, conversation: &ConversationState) {
        self.updates.send_replace(conversation.snapshot());
    }
}
