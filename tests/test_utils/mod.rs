//! Test utilities for integration tests
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

use chatline::chat::{Session, SessionBuilder};
use mockito::{Mock, ServerGuard};
use serde_json::json;

pub const TEST_MODEL: &str = "llama3-8b-8192";
pub const TEST_SYSTEM_MESSAGE: &str = "You are a test assistant.";

/// A single SSE data record carrying `content` as a delta.
pub fn delta_record(content: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({
            "id": "chatcmpl-test",
            "object": "chat.completion.chunk",
            "model": TEST_MODEL,
            "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
        })
    )
}

/// Mocks the completions endpoint with a streamed body that is written
/// out in the given chunks.
pub async fn mock_stream(server: &mut ServerGuard, chunks: Vec<String>) -> Mock {
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_chunked_body(move |w| {
            for chunk in chunks.iter() {
                w.write_all(chunk.as_bytes())?;
                w.flush()?;
            }
            Ok(())
        })
        .create_async()
        .await
}

/// A streaming session pointed at the mock server.
pub fn test_session(server: &ServerGuard) -> Session {
    SessionBuilder::new(&server.url(), "test-api-key", TEST_MODEL)
        .system_message(TEST_SYSTEM_MESSAGE)
        .build()
}

/// Serves a single streaming response that declares a longer body than
/// it sends. After writing `sent` the connection is closed, so the
/// client sees the body end early. Returns the base url.
pub fn serve_cut_stream(sent: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        read_request(&mut socket);
        let head = "HTTP/1.1 200 OK\r\n\
                    content-type: text/event-stream\r\n\
                    content-length: 5000\r\n\r\n";
        socket.write_all(head.as_bytes()).unwrap();
        socket.write_all(sent.as_bytes()).unwrap();
        socket.flush().unwrap();
    });
    format!("http://{}", addr)
}

/// Reads the request head and its body so closing the socket afterwards
/// doesn't reset the connection.
fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + body_len {
            return;
        }
    }
}
