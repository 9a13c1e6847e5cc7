//! Test utilities for dify-bridge - fixture credentials and backend streams
//!
//! Shared by unit tests and the integration tests under `tests/`.

use reqwest::header::{HeaderMap, HeaderValue};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::auth::CredentialBundle;

/// Model name carried by [`test_credentials`]
pub const TEST_MODEL: &str = "test-assistant";

/// `Cookie` header sent with [`test_credentials`]
pub const TEST_COOKIE_HEADER: &str = "dify_app_id=test-app; dify_app_config=test-config";

/// A complete credential bundle for tests that never hit a real portal
pub fn test_credentials() -> CredentialBundle {
    let mut headers = HeaderMap::new();
    headers.insert("x-ai-portal-token", HeaderValue::from_static("test-token"));
    headers.insert("x-ai-portal-uid", HeaderValue::from_static("test-uid"));

    CredentialBundle {
        token: "test-token".to_string(),
        uid: "test-uid".to_string(),
        cookies: vec![
            ("dify_app_id".to_string(), "test-app".to_string()),
            ("dify_app_config".to_string(), "test-config".to_string()),
        ],
        headers,
        model: TEST_MODEL.to_string(),
    }
}

/// `data: ...` line for a `message` event
pub fn message_line(answer: &str, conversation_id: Option<&str>) -> String {
    let mut event = serde_json::json!({"event": "message", "answer": answer});
    if let Some(id) = conversation_id {
        event["conversation_id"] = serde_json::Value::String(id.to_string());
    }
    format!("data: {event}")
}

/// `data: ...` line for the terminal `workflow_finished` event
pub fn finished_line(conversation_id: Option<&str>) -> String {
    let mut event = serde_json::json!({"event": "workflow_finished"});
    if let Some(id) = conversation_id {
        event["conversation_id"] = serde_json::Value::String(id.to_string());
    }
    format!("data: {event}")
}

/// Join lines into an SSE body the way the backend frames it
pub fn sse_body<S: AsRef<str>>(lines: &[S]) -> String {
    let mut body = String::new();
    for line in lines {
        body.push_str(line.as_ref());
        body.push_str("\n\n");
    }
    body
}

/// Split a bridge SSE response into its `data:` payloads
pub fn data_frames(raw: &str) -> Vec<String> {
    raw.split("\n\n")
        .filter_map(|frame| frame.strip_prefix("data: "))
        .map(str::to_string)
        .collect()
}

/// Scripted answer of a [`RawBackend`]
#[derive(Debug, Clone)]
pub struct RawReply {
    /// Bytes written verbatim: status line, headers and (part of) the body
    pub bytes: Vec<u8>,
    /// Keep the connection open and silent after `bytes`
    pub stall: bool,
}

impl RawReply {
    /// Complete response; the connection is closed afterwards
    pub fn complete(status: &str, content_type: &str, body: &str) -> Self {
        Self {
            bytes: format!(
                "HTTP/1.1 {status}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            )
            .into_bytes(),
            stall: false,
        }
    }

    /// Headers announcing `announced` body bytes, then only `sent`, then silence
    pub fn truncated(status: &str, announced: usize, sent: &str) -> Self {
        Self {
            bytes: format!("HTTP/1.1 {status}\r\ncontent-length: {announced}\r\n\r\n{sent}")
                .into_bytes(),
            stall: true,
        }
    }

    /// Chunked event stream that delivers `lines` and then stops sending
    pub fn stalled_stream<S: AsRef<str>>(lines: &[S]) -> Self {
        let body = sse_body(lines);
        Self {
            bytes: format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{body}\r\n",
                body.len()
            )
            .into_bytes(),
            stall: true,
        }
    }
}

/// Minimal HTTP/1.1 backend answering by request method
///
/// Covers responses wiremock cannot produce, such as a body that stops
/// mid-way. Request bodies are read and discarded.
#[derive(Debug, Clone)]
pub struct RawBackend {
    uri: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl RawBackend {
    pub async fn start<F>(reply: F) -> std::io::Result<Self>
    where
        F: Fn(&str) -> RawReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let uri = format!("http://{}", listener.local_addr()?);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let reply = Arc::new(reply);

        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let reply = reply.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(socket, reply.as_ref(), &seen).await;
                });
            }
        });

        Ok(Self { uri, requests })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Request lines seen so far whose method is `method`
    pub fn count(&self, method: &str) -> usize {
        let prefix = format!("{method} ");
        self.requests
            .lock()
            .map(|r| r.iter().filter(|line| line.starts_with(&prefix)).count())
            .unwrap_or(0)
    }
}

async fn serve_connection<F>(
    mut socket: TcpStream,
    reply: &F,
    seen: &Mutex<Vec<String>>,
) -> std::io::Result<()>
where
    F: Fn(&str) -> RawReply,
{
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        received.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&received[..head_end]).into_owned();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body_read = received.len() - head_end;
    while body_read < content_length {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        body_read += n;
    }

    let request_line = head.lines().next().unwrap_or_default().to_string();
    let method = request_line.split(' ').next().unwrap_or_default().to_string();
    if let Ok(mut requests) = seen.lock() {
        requests.push(request_line);
    }

    let answer = reply(&method);
    socket.write_all(&answer.bytes).await?;
    socket.flush().await?;
    if answer.stall {
        std::future::pending::<()>().await;
    }
    Ok(())
}
