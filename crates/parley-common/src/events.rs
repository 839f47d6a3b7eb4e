use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::id::ConversationId;

/// Lifecycle notifications published by the session engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    StreamStarted {
        conversation: ConversationId,
    },
    StreamCompleted {
        conversation: ConversationId,
        chars: usize,
    },
    StreamCancelled {
        conversation: ConversationId,
    },
    StreamFailed {
        conversation: ConversationId,
        error: String,
    },
    Reconciled {
        conversation: ConversationId,
        messages: usize,
    },
    #[serde(other)]
    Unknown,
}

pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
