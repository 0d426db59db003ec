use futures_util::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::sse::SseDecoder;
use crate::core::ChatError;

pub const TEMPERATURE: f64 = 0.7;
pub const MAX_TOKENS: u32 = 4000;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "user")]
    User,
}

/// A message as sent to the completion API. Only the role and the
/// text go over the wire.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Message {
            role,
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

pub fn completions_url(api_hostname: &str) -> String {
    format!("{}/v1/chat/completions", api_hostname.trim_end_matches('/'))
}

/// Request body for a chat completion. `stream` is only included when
/// streaming, matching what the API expects for one-shot requests.
pub fn payload(messages: &[Message], model: &str, stream: bool) -> Value {
    let mut payload = json!({
        "model": model,
        "messages": messages,
        "temperature": TEMPERATURE,
        "max_tokens": MAX_TOKENS,
    });
    if stream {
        payload["stream"] = json!(true);
    }
    payload
}

async fn send(
    client: &reqwest::Client,
    payload: &Value,
    api_hostname: &str,
    api_key: &str,
) -> Result<reqwest::Response, ChatError> {
    let response = client
        .post(completions_url(api_hostname))
        .bearer_auth(api_key)
        .header("Content-Type", "application/json")
        .json(payload)
        .send()
        .await
        .map_err(ChatError::Request)?;

    let status = response.status();
    if !status.is_success() {
        // The body usually explains what went wrong so keep it around
        // for diagnostics even though only the status is shown.
        let body = response.text().await.unwrap_or_default();
        tracing::error!("Completion API error {}: {}", status, body);
        return Err(ChatError::Status {
            status: status.as_u16(),
            body,
        });
    }

    Ok(response)
}

/// One-shot chat completion. Returns the text of the first choice.
pub async fn completion(
    client: &reqwest::Client,
    messages: &[Message],
    api_hostname: &str,
    api_key: &str,
    model: &str,
) -> Result<String, ChatError> {
    let payload = payload(messages, model, false);
    let response = send(client, &payload, api_hostname, api_key).await?;
    let response: CompletionResponse = response.json().await.map_err(ChatError::Request)?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or(ChatError::EmptyResponse)
}

/// Streaming chat completion. Each text fragment is sent to `tx` as
/// soon as it is decoded and the full reply is returned once the body
/// is exhausted.
///
/// The byte stream is owned by this function, so returning early on an
/// error (or the task being aborted) drops it and releases the
/// connection.
pub async fn completion_stream(
    client: &reqwest::Client,
    tx: mpsc::UnboundedSender<String>,
    messages: &[Message],
    api_hostname: &str,
    api_key: &str,
    model: &str,
) -> Result<String, ChatError> {
    let payload = payload(messages, model, true);
    let response = send(client, &payload, api_hostname, api_key).await?;

    if response.status() == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
        tracing::error!("Completion API returned an empty body");
        return Err(ChatError::StreamUnavailable);
    }

    let mut stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut content_buf = String::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ChatError::DecodeInterrupted)?;
        for fragment in decoder.feed(&chunk) {
            content_buf.push_str(&fragment);
            // The receiver may be gone if the session was dropped. The
            // response is still read to the end.
            let _ = tx.send(fragment);
        }
    }
    for fragment in decoder.finish() {
        content_buf.push_str(&fragment);
        let _ = tx.send(fragment);
    }

    tracing::debug!(
        "Stream completed: len={} done_marker={}",
        content_buf.len(),
        decoder.saw_done()
    );

    Ok(content_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), r#""system""#);
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            r#""assistant""#
        );
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
    }

    #[test]
    fn test_role_deserialization() {
        let json = r#""system""#;
        assert_eq!(serde_json::from_str::<Role>(json).unwrap(), Role::System);

        let json = r#""assistant""#;
        assert_eq!(serde_json::from_str::<Role>(json).unwrap(), Role::Assistant);

        let json = r#""user""#;
        assert_eq!(serde_json::from_str::<Role>(json).unwrap(), Role::User);
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::new(Role::User, "Hi");
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"role":"user","content":"Hi"}"#
        );
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            completions_url("https://api.groq.com/openai/"),
            "https://api.groq.com/openai/v1/chat/completions"
        );
        assert_eq!(
            completions_url("http://127.0.0.1:1234"),
            "http://127.0.0.1:1234/v1/chat/completions"
        );
    }

    #[test]
    fn test_payload_streaming() {
        let messages = vec![Message::new(Role::User, "Hi")];
        let payload = payload(&messages, "llama3-8b-8192", true);

        assert_eq!(payload["model"], "llama3-8b-8192");
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["temperature"], 0.7);
        assert_eq!(payload["max_tokens"], 4000);
        assert_eq!(payload["messages"][0]["role"], "user");
    }

    #[test]
    fn test_payload_one_shot_omits_stream() {
        let payload = payload(&[], "llama3-8b-8192", false);
        assert!(payload.get("stream").is_none());
    }

    #[tokio::test]
    async fn test_completion_basic() {
        let mut server = mockito::Server::new_async().await;

        let response_body = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1694268190,
            "model": "llama3-8b-8192",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello!"
                },
                "finish_reason": "stop"
            }]
        }"#;

        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::Json(json!({
                "model": "llama3-8b-8192",
                "messages": [{"role": "user", "content": "Hi"}],
                "temperature": 0.7,
                "max_tokens": 4000
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(response_body)
            .create_async()
            .await;

        let messages = vec![Message::new(Role::User, "Hi")];
        let client = reqwest::Client::new();
        let result = completion(
            &client,
            &messages,
            server.url().as_str(),
            "test-key",
            "llama3-8b-8192",
        )
        .await;

        mock.assert_async().await;
        assert_eq!(result.unwrap(), "Hello!");
    }

    #[tokio::test]
    async fn test_completion_missing_content() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let result = completion(&client, &[], server.url().as_str(), "k", "m").await;
        assert!(matches!(result, Err(ChatError::EmptyResponse)));
    }

    #[tokio::test]
    async fn test_completion_stream_content() {
        let mut server = mockito::Server::new_async().await;

        let sse_response = r#"data: {"id":"chunk1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"role":"assistant","content":""},"finish_reason":null}]}

data: {"id":"chunk1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}

: heartbeat

data: {"id":"chunk2","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":" World"},"finish_reason":null}]}

data: {"id":"chunk3","object":"chat.completion.chunk","choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}

data: [DONE]

"#;

        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::PartialJson(json!({"stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(sse_response)
            .create_async()
            .await;

        let messages = vec![Message::new(Role::User, "Say hello")];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = reqwest::Client::new();

        let result = completion_stream(
            &client,
            tx,
            &messages,
            server.url().as_str(),
            "test-key",
            "llama3-8b-8192",
        )
        .await;

        mock.assert_async().await;
        assert_eq!(result.unwrap(), "Hello World");

        let mut fragments = Vec::new();
        while let Ok(fragment) = rx.try_recv() {
            fragments.push(fragment);
        }
        assert_eq!(fragments, vec!["Hello", " World"]);
    }

    #[tokio::test]
    async fn test_completion_stream_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"Invalid API Key"}}"#)
            .create_async()
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = reqwest::Client::new();
        let result = completion_stream(&client, tx, &[], server.url().as_str(), "bad", "m").await;

        match result {
            Err(ChatError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("Invalid API Key"));
            }
            other => panic!("Expected status error, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_completion_stream_empty_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(204)
            .create_async()
            .await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let client = reqwest::Client::new();
        let result = completion_stream(&client, tx, &[], server.url().as_str(), "k", "m").await;

        assert!(matches!(result, Err(ChatError::StreamUnavailable)));
    }
}
