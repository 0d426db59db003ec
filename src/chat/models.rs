//! The core models for the state of a chat session.
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::openai::{Message, Role};

// Subscribers that fall further behind than this see `Lagged`. Every
// `Updated` event carries the whole turn so they can catch up from the
// next one.
const EVENT_CAPACITY: usize = 1024;

/// One message in the conversation.
#[derive(Clone, Debug, PartialEq)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    /// True while an assistant reply is still streaming in.
    pub pending: bool,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.to_string(),
            pending: false,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self::new(Role::User, content)
    }

    /// An empty assistant turn that fragments get appended to.
    pub fn placeholder() -> Self {
        Self {
            pending: true,
            ..Self::new(Role::Assistant, "")
        }
    }

    pub fn appended(&self, fragment: &str) -> Self {
        let mut next = self.clone();
        next.content.push_str(fragment);
        next
    }

    pub fn finalized(&self) -> Self {
        Self {
            pending: false,
            ..self.clone()
        }
    }

    pub fn to_message(&self) -> Message {
        Message::new(self.role, &self.content)
    }
}

/// Change notifications published by a `Transcript`.
#[derive(Clone, Debug, PartialEq)]
pub enum TranscriptEvent {
    Appended(Turn),
    Updated(Turn),
    Removed(Uuid),
    Cleared,
}

/// Ordered, append-only list of turns. Turns are only ever changed in
/// place by id and never reordered.
pub struct Transcript {
    turns: Vec<Turn>,
    notifier: broadcast::Sender<TranscriptEvent>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            turns: Vec::new(),
            notifier,
        }
    }

    /// Receive every change made to the transcript from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.notifier.subscribe()
    }

    fn notify(&self, event: TranscriptEvent) {
        // Having no subscribers is fine
        let _ = self.notifier.send(event);
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn.clone());
        self.notify(TranscriptEvent::Appended(turn));
    }

    /// Replace the turn with `id` by whatever `mutator` returns. The id
    /// is kept even if the mutator changes it. Returns `false` without
    /// doing anything when no turn has that id, which happens when a
    /// streaming reply outlives a `clear`.
    pub fn update<F>(&mut self, id: Uuid, mutator: F) -> bool
    where
        F: FnOnce(&Turn) -> Turn,
    {
        let Some(slot) = self.turns.iter_mut().find(|t| t.id == id) else {
            tracing::debug!("Ignoring update for missing turn {}", id);
            return false;
        };
        let mut next = mutator(slot);
        next.id = id;
        *slot = next.clone();
        self.notify(TranscriptEvent::Updated(next));
        true
    }

    pub fn remove(&mut self, id: Uuid) -> bool {
        let Some(idx) = self.turns.iter().position(|t| t.id == id) else {
            return false;
        };
        self.turns.remove(idx);
        self.notify(TranscriptEvent::Removed(id));
        true
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.notify(TranscriptEvent::Cleared);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn get(&self, id: Uuid) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == id)
    }

    /// The turn currently receiving a streamed reply, if any.
    pub fn pending(&self) -> Option<&Turn> {
        self.turns.iter().find(|t| t.pending)
    }

    /// The transcript as it is sent to the API: role and content only.
    pub fn messages(&self) -> Vec<Message> {
        self.turns.iter().map(Turn::to_message).collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
