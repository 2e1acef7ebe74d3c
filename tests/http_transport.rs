use exam_chat::api::{ChatResponse, ChatTransport, HttpTransport};
use exam_chat::models::ChatRequest;
use exam_chat::{ChatConfig, ChatController, ChatError, MessageStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

// Serves one HTTP response, writing `parts` as separate TCP writes.
// Resolves to the raw request that was received.
async fn serve_once(head: &str, parts: Vec<&'static str>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let head = head.to_string();

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(head.as_bytes()).await.unwrap();
        // The client may hang up early once it has seen [DONE]
        for part in parts {
            if socket.write_all(part.as_bytes()).await.is_err() {
                break;
            }
            let _ = socket.flush().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{}", addr), handle)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending a full request");
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                return text;
            }
        }
    }
}

fn config(api_url: String) -> ChatConfig {
    ChatConfig {
        api_url,
        exam_id: "exam-1".to_string(),
        reference_ids: vec!["ref-a".to_string()],
        ..ChatConfig::default()
    }
}

fn request() -> ChatRequest {
    ChatRequest {
        message: "Explain photosynthesis".to_string(),
        reference_ids: vec!["ref-a".to_string()],
        exam_id: Some("exam-1".to_string()),
        previous_messages: Vec::new(),
    }
}

const SSE_HEAD: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n";

#[tokio::test]
async fn streams_reply_through_controller() {
    let (url, server) = serve_once(
        SSE_HEAD,
        vec!["data: Hel", "lo\n\ndata: world\n", "\ndata: [DONE]\n\n"],
    )
    .await;
    let transport = HttpTransport::new(&config(url), None).unwrap();
    let controller = ChatController::new(&config("http://unused".to_string()), Arc::new(transport));

    let reply = controller.exchange("Say hello").await.unwrap();
    assert_eq!(reply.text, "Hello world");
    assert_eq!(reply.status, MessageStatus::Complete);

    let raw = server.await.unwrap();
    assert!(raw.starts_with("POST /api/v1/exams/exam-1/chat HTTP/1.1"));
    assert!(raw.to_ascii_lowercase().contains("content-type: application/json"));
    assert!(raw.contains("\"reference_ids\":[\"ref-a\"]"));
    assert!(raw.contains("\"message\":\"Say hello\""));
}

#[tokio::test]
async fn json_reply_is_returned_whole() {
    let body = r#"{"message":"Chlorophyll absorbs light."}"#;
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let (url, server) = serve_once(&head, vec![]).await;
    let transport = HttpTransport::new(&config(url), None).unwrap();

    match transport.send(&request()).await.unwrap() {
        ChatResponse::Reply(reply) => assert_eq!(reply.message, "Chlorophyll absorbs light."),
        other => panic!("expected a JSON reply, got {:?}", other),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn error_status_carries_backend_detail() {
    let body = r#"{"detail":"Exam with ID exam-1 not found."}"#;
    let head = format!(
        "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let (url, server) = serve_once(&head, vec![]).await;
    let transport = HttpTransport::new(&config(url), None).unwrap();

    match transport.send(&request()).await {
        Err(ChatError::Status { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "Exam with ID exam-1 not found.");
        }
        other => panic!("expected status error, got {:?}", other),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn malformed_json_reply_is_an_error() {
    let (url, server) = serve_once(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 6\r\nConnection: close\r\n\r\n<html>",
        vec![],
    )
    .await;
    let transport = HttpTransport::new(&config(url), None).unwrap();

    let result = transport.send(&request()).await;
    assert!(matches!(result, Err(ChatError::MalformedBody(_))));
    server.await.unwrap();
}

#[tokio::test]
async fn bearer_key_is_sent_when_configured() {
    let (url, server) = serve_once(SSE_HEAD, vec!["data: [DONE]\n\n"]).await;
    let transport = HttpTransport::new(&config(url), Some("s3cret".to_string())).unwrap();
    let controller = ChatController::new(&config("http://unused".to_string()), Arc::new(transport));

    let reply = controller.exchange("ping").await.unwrap();
    assert_eq!(reply.text, "");
    assert_eq!(reply.status, MessageStatus::Complete);

    let raw = server.await.unwrap();
    assert!(raw.to_ascii_lowercase().contains("authorization: bearer s3cret"));
}

#[tokio::test]
async fn unreachable_backend_fails_the_reply() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::new(&config(format!("http://{}", addr)), None).unwrap();
    let controller = ChatController::new(&config("http://unused".to_string()), Arc::new(transport));

    let reply = controller.exchange("hello?").await.unwrap();
    assert_eq!(reply.status, MessageStatus::Failed);
    assert_eq!(reply.text, exam_chat::config::DEFAULT_FAILURE_MESSAGE);
    assert!(!controller.is_busy());
}
