use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::models::{Transcript, TranscriptEvent, Turn};
use crate::core::{AppConfig, ChatError, config::DEFAULT_SYSTEM_MESSAGE, find_model};
use crate::openai::{Message, Role, completion, completion_stream};

/// What a single call to `Session::pump` did.
#[derive(Debug, PartialEq, Eq)]
pub enum Pumped {
    /// A fragment was appended to the assistant turn.
    Fragment,
    /// The reply finished and the assistant turn is no longer pending.
    Completed,
    /// Nothing is in flight.
    Idle,
}

struct InFlight {
    assistant_id: Uuid,
    fragments: mpsc::UnboundedReceiver<String>,
    handle: JoinHandle<Result<String, ChatError>>,
}

/// A chat with an LLM using an OpenAI compatible completion API.
///
/// Owns the transcript and serializes requests: only one reply can be
/// in flight at a time. The network read happens on a spawned task
/// and fragments are applied to the transcript by `pump`/`finish`, so
/// all mutations happen wherever the session lives.
///
/// Use `Session::builder()` to construct a valid `Session`.
pub struct Session {
    client: reqwest::Client,
    api_hostname: String,
    api_key: String,
    model: String,
    system_message: String,
    streaming: bool,
    transcript: Transcript,
    in_flight: Option<InFlight>,
}

impl Session {
    pub fn builder(api_hostname: &str, api_key: &str, model: &str) -> SessionBuilder {
        SessionBuilder::new(api_hostname, api_key, model)
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.transcript.subscribe()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Switch to another model from the catalog. Applies to the next
    /// submission.
    pub fn set_model(&mut self, id: &str) -> Result<(), ChatError> {
        let info = find_model(id).ok_or_else(|| ChatError::UnknownModel(id.to_string()))?;
        self.model = info.id.to_string();
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The messages sent for a new user input: the system message, the
    /// transcript so far and then the input itself.
    fn outbound_messages(&self, input: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.transcript.len() + 2);
        messages.push(Message::new(Role::System, &self.system_message));
        messages.extend(self.transcript.messages());
        messages.push(Message::new(Role::User, input));
        messages
    }

    /// Start the next turn in the chat. Appends the user turn and a
    /// pending assistant turn then kicks off the request in the
    /// background. Returns the id of the assistant turn, or `None` if
    /// the input was blank and nothing happened.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&mut self, input: &str) -> Result<Option<Uuid>, ChatError> {
        if input.trim().is_empty() {
            return Ok(None);
        }
        if self.in_flight.is_some() {
            return Err(ChatError::Busy);
        }

        // Snapshot before appending so the new turns aren't sent twice
        let messages = self.outbound_messages(input);

        let placeholder = Turn::placeholder();
        let assistant_id = placeholder.id;
        self.transcript.append(Turn::user(input));
        self.transcript.append(placeholder);

        tracing::debug!(
            "Submitting turn: model={} streaming={} msgs={}",
            self.model,
            self.streaming,
            messages.len()
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let client = self.client.clone();
        let api_hostname = self.api_hostname.clone();
        let api_key = self.api_key.clone();
        let model = self.model.clone();
        let streaming = self.streaming;

        let handle = tokio::spawn(async move {
            if streaming {
                completion_stream(&client, tx, &messages, &api_hostname, &api_key, &model).await
            } else {
                let content =
                    completion(&client, &messages, &api_hostname, &api_key, &model).await?;
                // Deliver the whole reply as one fragment so the rest
                // of the flow is the same as streaming
                if !content.is_empty() {
                    let _ = tx.send(content.clone());
                }
                Ok(content)
            }
        });

        self.in_flight = Some(InFlight {
            assistant_id,
            fragments: rx,
            handle,
        });

        Ok(Some(assistant_id))
    }

    /// Wait for the next thing to happen to the in flight reply and
    /// apply it to the transcript.
    ///
    /// On failure the assistant turn is removed (the user turn stays)
    /// and the error is returned. This is the only place a failed
    /// request is reported, so each failure comes out exactly once.
    ///
    /// Cancel safe: dropping the future before it resolves loses
    /// nothing.
    pub async fn pump(&mut self) -> Result<Pumped, ChatError> {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return Ok(Pumped::Idle);
        };
        let assistant_id = in_flight.assistant_id;

        if let Some(fragment) = in_flight.fragments.recv().await {
            self.transcript
                .update(assistant_id, |turn| turn.appended(&fragment));
            return Ok(Pumped::Fragment);
        }

        // The sender is dropped once the request finishes so the task
        // result is ready (or about to be)
        let result = match (&mut in_flight.handle).await {
            Ok(result) => result,
            Err(e) => Err(ChatError::Task(e.to_string())),
        };
        self.in_flight = None;

        match result {
            Ok(content) => {
                tracing::debug!("Turn {} completed: len={}", assistant_id, content.len());
                self.transcript.update(assistant_id, Turn::finalized);
                Ok(Pumped::Completed)
            }
            Err(err) => {
                tracing::error!("Turn {} failed: {}", assistant_id, err);
                self.transcript.remove(assistant_id);
                Err(err)
            }
        }
    }

    /// Apply fragments until the in flight reply completes or fails.
    pub async fn finish(&mut self) -> Result<(), ChatError> {
        loop {
            match self.pump().await? {
                Pumped::Fragment => continue,
                Pumped::Completed | Pumped::Idle => return Ok(()),
            }
        }
    }

    /// Stop the in flight reply. The request task is aborted, which
    /// drops the response body and closes the connection. Whatever was
    /// received so far is kept and the turn stops being pending.
    /// Returns `false` if nothing was in flight.
    pub fn cancel(&mut self) -> bool {
        let Some(in_flight) = self.in_flight.take() else {
            return false;
        };
        let InFlight {
            assistant_id,
            mut fragments,
            handle,
        } = in_flight;
        handle.abort();

        while let Ok(fragment) = fragments.try_recv() {
            self.transcript
                .update(assistant_id, |turn| turn.appended(&fragment));
        }
        self.transcript.update(assistant_id, Turn::finalized);
        tracing::debug!("Turn {} cancelled", assistant_id);
        true
    }

    /// Empty the transcript. A reply that is still streaming keeps
    /// going but its updates no longer land anywhere.
    pub fn clear(&mut self) {
        self.transcript.clear();
    }
}

pub struct SessionBuilder {
    api_hostname: String,
    api_key: String,
    model: String,
    system_message: String,
    streaming: bool,
    client: Option<reqwest::Client>,
}

impl SessionBuilder {
    pub fn new(api_hostname: &str, api_key: &str, model: &str) -> Self {
        Self {
            api_hostname: api_hostname.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            system_message: DEFAULT_SYSTEM_MESSAGE.to_string(),
            streaming: true,
            client: None,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.api_hostname, &config.api_key, &config.model)
            .system_message(&config.system_message)
    }

    pub fn system_message(mut self, system_message: &str) -> Self {
        self.system_message = system_message.to_string();
        self
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Session {
        Session {
            client: self.client.unwrap_or_default(),
            api_hostname: self.api_hostname,
            api_key: self.api_key,
            model: self.model,
            system_message: self.system_message,
            streaming: self.streaming,
            transcript: Transcript::new(),
            in_flight: None,
        }
    }
}
