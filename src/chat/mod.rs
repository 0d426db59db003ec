pub mod core;
pub mod models;

pub use self::core::{Pumped, Session, SessionBuilder};
pub use self::models::{Transcript, TranscriptEvent, Turn};
