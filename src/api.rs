use crate::config::ChatConfig;
use crate::error::{ChatError, ChatResult};
use crate::models::{ChatReply, ChatRequest, ErrorBody};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use std::pin::Pin;
use std::time::Duration;

// Alias for the raw body stream of a streaming reply
pub type ByteStream = Pin<Box<dyn Stream<Item = ChatResult<Bytes>> + Send>>;

const EVENT_STREAM_MIME: &str = "text/event-stream";

// What the endpoint answered with
pub enum ChatResponse {
    Stream(ByteStream), // text/event-stream body, not yet read
    Reply(ChatReply),   // whole JSON reply
}

impl std::fmt::Debug for ChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatResponse::Stream(_) => f.write_str("ChatResponse::Stream(..)"),
            ChatResponse::Reply(reply) => f.debug_tuple("ChatResponse::Reply").field(reply).finish(),
        }
    }
}

// Trait defining the boundary between the chat controller and the network
#[async_trait]
pub trait ChatTransport: Send + Sync {
    // Resolves once response headers are in. Streaming bodies are read lazily.
    async fn send(&self, request: &ChatRequest) -> ChatResult<ChatResponse>;
}

// --- HTTP transport for the exam chat endpoint ---

pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    connect_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ChatConfig, api_key: Option<String>) -> ChatResult<Self> {
        config.validate()?;
        // No overall request timeout: it would also cut off long streams
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: chat_endpoint(&config.api_url, &config.exam_id),
            api_key,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

pub fn chat_endpoint(api_url: &str, exam_id: &str) -> String {
    format!("{}/api/v1/exams/{}/chat", api_url.trim_end_matches('/'), exam_id)
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> ChatResult<ChatResponse> {
        log::info!(
            "Sending chat request to {} ({} references, {} prior messages)",
            self.endpoint,
            request.reference_ids.len(),
            request.previous_messages.len()
        );

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, "text/event-stream, application/json")
            .json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        // Only waiting for headers is bounded; the body may stream for much longer
        let response = match tokio::time::timeout(self.connect_timeout, builder.send()).await {
            Ok(result) => result?,
            Err(_) => {
                log::error!("Chat request timed out waiting for response headers after {:?}", self.connect_timeout);
                return Err(ChatError::Stream(format!(
                    "timed out waiting for response headers after {:?}",
                    self.connect_timeout
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<Failed to read error body>".to_string());
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(ErrorBody::into_message)
                .unwrap_or(body);
            log::error!("Chat request failed with status {}: {}", status, message);
            return Err(ChatError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains(EVENT_STREAM_MIME));

        if is_event_stream {
            log::debug!("Response is an event stream");
            let stream = response.bytes_stream().map_err(ChatError::from);
            return Ok(ChatResponse::Stream(Box::pin(stream)));
        }

        // Non-streaming fallback: whole-body JSON
        let body = response.bytes().await?;
        let reply: ChatReply = serde_json::from_slice(&body)?;
        Ok(ChatResponse::Reply(reply))
    }
}
