use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tracing::{debug, warn};

use super::view::ConversationView;
use crate::{ConversationId, EngineError, Feedback, Message, MessageId, Role};

type Slot = Arc<watch::Sender<Arc<ConversationView>>>;

/// Bookkeeping for one optimistic send, used to verify the confirmed list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingExchange {
    pub message_id: MessageId,
    /// Confirmed length when the prompt was written.
    pub base_len: usize,
    pub prompt: String,
    /// Assistant text received over the stream, once it has ended.
    pub streamed: Option<String>,
}

/// Observable state of every conversation this client has touched.
///
/// Each conversation is a `watch` channel of immutable snapshots: readers
/// clone an `Arc` and never block writers, and every mutation publishes a
/// whole new snapshot.
#[derive(Default)]
pub struct ConversationStore {
    conversations: RwLock<HashMap<ConversationId, Slot>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing(&self, id: ConversationId) -> Option<Slot> {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    fn slot(&self, id: ConversationId) -> Slot {
        if let Some(slot) = self.existing(id) {
            return slot;
        }
        self.conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id)
            .or_insert_with(|| {
                let (tx, _) = watch::channel(Arc::new(ConversationView::new(id)));
                Arc::new(tx)
            })
            .clone()
    }

    fn modify(&self, id: ConversationId, f: impl FnOnce(&mut ConversationView)) {
        self.slot(id).send_modify(|view| {
            let view = Arc::make_mut(view);
            f(view);
            view.revision += 1;
        });
    }

    /// Current snapshot; an empty, unloaded view for unknown conversations.
    pub fn snapshot(&self, id: ConversationId) -> Arc<ConversationView> {
        match self.existing(id) {
            Some(slot) => slot.borrow().clone(),
            None => Arc::new(ConversationView::new(id)),
        }
    }

    /// Receive a new snapshot after every mutation of `id`.
    pub fn subscribe(&self, id: ConversationId) -> watch::Receiver<Arc<ConversationView>> {
        self.slot(id).subscribe()
    }

    pub fn conversations(&self) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self
            .conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        ids.sort();
        ids
    }

    pub fn append_optimistic_user_message(
        &self,
        id: ConversationId,
        text: impl Into<String>,
    ) -> PendingExchange {
        let message = Message::optimistic_user(text);
        let message_id = message.id.clone();
        let prompt = message.content.clone();
        let mut base_len = 0;
        self.modify(id, |view| {
            base_len = view.confirmed.len();
            view.optimistic.push(message);
        });
        PendingExchange {
            message_id,
            base_len,
            prompt,
            streamed: None,
        }
    }

    /// Start a fresh, empty streaming buffer.
    pub fn begin_streaming(&self, id: ConversationId) {
        self.modify(id, |view| view.streaming = Some(String::new()));
    }

    /// Returns false, changing nothing, when `id` is not streaming.
    pub fn append_fragment(&self, id: ConversationId, text: &str) -> bool {
        let Some(slot) = self.existing(id) else {
            return false;
        };
        slot.send_if_modified(|view| {
            if view.streaming.is_none() {
                return false;
            }
            let view = Arc::make_mut(view);
            if let Some(buffer) = view.streaming.as_mut() {
                buffer.push_str(text);
            }
            view.revision += 1;
            true
        })
    }

    /// Drop the streaming buffer, returning what it held.
    pub fn end_streaming(&self, id: ConversationId) -> Option<String> {
        let slot = self.existing(id)?;
        let mut buffer = None;
        slot.send_if_modified(|view| {
            if view.streaming.is_none() {
                return false;
            }
            let view = Arc::make_mut(view);
            buffer = view.streaming.take();
            view.revision += 1;
            true
        });
        buffer
    }

    /// Replace confirmed history wholesale; optimistic entries are superseded.
    pub fn replace_confirmed(&self, id: ConversationId, messages: Vec<Message>) {
        self.modify(id, |view| {
            view.confirmed = messages;
            view.optimistic.clear();
            view.loaded = true;
        });
    }

    /// Apply the confirmed list, then check it contains the exchange started
    /// by `pending`: the prompt as a user message followed by an assistant
    /// reply carrying the streamed text. The list is applied even when the
    /// check fails.
    pub fn reconcile(
        &self,
        id: ConversationId,
        messages: Vec<Message>,
        pending: &PendingExchange,
    ) -> Result<Message, EngineError> {
        let found = find_exchange(&messages, pending);
        let count = messages.len();
        self.replace_confirmed(id, messages);

        match found {
            Ok(reply) => {
                debug!(conversation = %id, messages = count, reply = %reply.id, "reconciled");
                Ok(reply)
            }
            Err(err) => {
                warn!(conversation = %id, error = %err, "confirmed history is missing the exchange");
                Err(err)
            }
        }
    }

    /// Optimistically mark a message. Returns the owning conversation.
    pub fn attach_feedback(&self, message_id: &MessageId, feedback: Feedback) -> Option<ConversationId> {
        let owner = self
            .conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(_, slot)| slot.borrow().find(message_id).is_some())
            .map(|(id, _)| *id)?;

        self.modify(owner, |view| {
            let target = view
                .confirmed
                .iter_mut()
                .chain(view.optimistic.iter_mut())
                .find(|m| &m.id == message_id);
            if let Some(message) = target {
                message.feedback = Some(feedback);
            }
        });
        Some(owner)
    }

    pub fn set_title(&self, id: ConversationId, title: impl Into<String>) {
        let title = title.into();
        self.modify(id, |view| view.title = Some(title));
    }

    pub fn remove(&self, id: ConversationId) -> bool {
        self.conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

fn find_exchange(messages: &[Message], pending: &PendingExchange) -> Result<Message, EngineError> {
    let start = pending.base_len.min(messages.len());
    let user = messages[start..]
        .iter()
        .rposition(|m| m.role == Role::User && m.content == pending.prompt)
        .map(|pos| start + pos)
        .ok_or_else(|| {
            EngineError::Reconciliation("server history has no record of the prompt".into())
        })?;

    let reply = match messages.get(user + 1) {
        Some(reply) if reply.role == Role::Assistant => reply,
        _ => {
            return Err(EngineError::Reconciliation(
                "server history is missing the assistant reply".into(),
            ))
        }
    };

    // servers may trim surrounding whitespace from stored replies
    if let Some(streamed) = &pending.streamed {
        if reply.content.trim() != streamed.trim() {
            return Err(EngineError::Reconciliation(format!(
                "stored reply {} differs from the streamed text ({} vs {} chars)",
                reply.id,
                reply.content.chars().count(),
                streamed.chars().count()
            )));
        }
    }
    Ok(reply.clone())
}
