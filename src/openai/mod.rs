pub mod core;
pub mod sse;

pub use self::core::{Message, Role, completion, completion_stream, completions_url, payload};
pub use self::sse::{Record, SseDecoder};
