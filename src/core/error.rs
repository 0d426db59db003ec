use thiserror::Error;

/// Everything that can abort a chat exchange. Malformed stream records
/// are not represented here because they are skipped, never raised.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("completion API returned status {status}")]
    Status { status: u16, body: String },

    #[error("response has no readable body")]
    StreamUnavailable,

    #[error("stream interrupted: {0}")]
    DecodeInterrupted(#[source] reqwest::Error),

    #[error("completion response had no message content")]
    EmptyResponse,

    #[error("a request is already in flight")]
    Busy,

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("missing env var CHATLINE_API_KEY")]
    MissingApiKey,

    #[error("request was cancelled")]
    Cancelled,

    #[error("completion task failed: {0}")]
    Task(String),
}

impl ChatError {
    /// True for failures caused by the transport or the remote API, as
    /// opposed to local misuse of the session.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ChatError::Request(_)
                | ChatError::Status { .. }
                | ChatError::StreamUnavailable
                | ChatError::DecodeInterrupted(_)
                | ChatError::EmptyResponse
        )
    }
}
