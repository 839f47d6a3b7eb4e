//! The session controller and its non-streaming operations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use parley_common::{Event, EventBus};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::state::{ConversationState, Slot};
use crate::api::{ChatBackend, ConversationMetrics, ConversationSummary, DEFAULT_PAGE_SIZE};
use crate::store::{ConversationStore, ConversationView};
use crate::transport::Transport;
use crate::{ConversationId, EngineError, Feedback, GenerationParameters, MessageId};

/// Orchestrates send, retry, cancel and feedback per conversation.
///
/// The controller is the only writer of the [`ConversationStore`] and the
/// only place a conversation becomes `Errored`.
pub struct SessionController {
    pub(super) backend: Arc<dyn ChatBackend>,
    pub(super) transport: Transport,
    pub(super) store: Arc<ConversationStore>,
    pub(super) events: Arc<EventBus>,
    parameters: RwLock<GenerationParameters>,
    slots: Mutex<HashMap<ConversationId, Slot>>,
    next_epoch: AtomicU64,
}

impl SessionController {
    pub fn new(backend: Arc<dyn ChatBackend>, max_stream: Duration) -> Self {
        Self {
            transport: Transport::new(backend.clone(), max_stream),
            backend,
            store: Arc::new(ConversationStore::new()),
            events: Arc::new(EventBus::default()),
            parameters: RwLock::new(GenerationParameters::default()),
            slots: Mutex::new(HashMap::new()),
            next_epoch: AtomicU64::new(1),
        }
    }

    pub fn with_parameters(self, parameters: GenerationParameters) -> Self {
        self.set_parameters(parameters);
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn parameters(&self) -> GenerationParameters {
        self.parameters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies to sends started after this call.
    pub fn set_parameters(&self, parameters: GenerationParameters) {
        *self
            .parameters
            .write()
            .unwrap_or_else(PoisonError::into_inner) = parameters;
    }

    pub(super) fn slots(&self) -> MutexGuard<'_, HashMap<ConversationId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn next_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    pub fn state(&self, conversation: ConversationId) -> ConversationState {
        self.slots()
            .get(&conversation)
            .map(|slot| slot.state.clone())
            .unwrap_or_default()
    }

    /// `Errored -> Idle`. Returns false in any other state.
    pub fn acknowledge(&self, conversation: ConversationId) -> bool {
        let mut slots = self.slots();
        match slots.get_mut(&conversation) {
            Some(slot) if matches!(slot.state, ConversationState::Errored(_)) => {
                slot.state = ConversationState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Abort whatever `conversation` is doing and return it to `Idle`.
    ///
    /// Returns true if a cycle was in flight. No fragment reaches the store
    /// after this returns.
    pub fn cancel(&self, conversation: ConversationId) -> bool {
        let cancelled = {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(&conversation) else {
                return false;
            };
            slot.state = ConversationState::Idle;
            match slot.cycle.take() {
                Some(cycle) => {
                    cycle.ticket.token.cancel();
                    if let Some(handle) = &cycle.handle {
                        self.transport.cancel(handle);
                    }
                    self.store.end_streaming(conversation);
                    true
                }
                None => false,
            }
        };

        if cancelled {
            info!(%conversation, "stream cancelled");
            self.events.publish(Event::StreamCancelled { conversation });
        }
        cancelled
    }

    /// Fetch confirmed history and make it the conversation's state.
    pub async fn load(
        &self,
        conversation: ConversationId,
    ) -> Result<Arc<ConversationView>, EngineError> {
        let detail = self.backend.fetch_conversation(conversation).await?;
        debug!(%conversation, messages = detail.messages.len(), "loaded conversation");
        self.store.set_title(conversation, detail.summary.title);
        self.store.replace_confirmed(conversation, detail.messages);
        Ok(self.store.snapshot(conversation))
    }

    pub async fn list(
        &self,
        skip: Option<u32>,
        limit: Option<u32>,
    ) -> Result<Vec<ConversationSummary>, EngineError> {
        self.backend
            .list_conversations(skip.unwrap_or(0), limit.unwrap_or(DEFAULT_PAGE_SIZE))
            .await
    }

    pub async fn create(&self, title: Option<&str>) -> Result<ConversationSummary, EngineError> {
        let summary = self.backend.create_conversation(title).await?;
        info!(conversation = %summary.id, "conversation created");
        self.store.set_title(summary.id, summary.title.clone());
        self.store.replace_confirmed(summary.id, Vec::new());
        Ok(summary)
    }

    pub async fn rename(
        &self,
        conversation: ConversationId,
        title: &str,
    ) -> Result<ConversationSummary, EngineError> {
        let summary = self.backend.rename_conversation(conversation, title).await?;
        self.store.set_title(conversation, summary.title.clone());
        Ok(summary)
    }

    /// Cancels any cycle, deletes remotely, then forgets local state.
    pub async fn delete(&self, conversation: ConversationId) -> Result<(), EngineError> {
        self.cancel(conversation);
        self.backend.delete_conversation(conversation).await?;
        self.slots().remove(&conversation);
        self.store.remove(conversation);
        info!(%conversation, "conversation deleted");
        Ok(())
    }

    pub async fn metrics(
        &self,
        conversation: ConversationId,
    ) -> Result<ConversationMetrics, EngineError> {
        self.backend.conversation_metrics(conversation).await
    }

    /// Mark a confirmed message, persist the mark, then refetch its
    /// conversation. A failed persist is reverted by the same refetch.
    pub async fn submit_feedback(
        &self,
        message_id: &MessageId,
        feedback: Feedback,
    ) -> Result<(), EngineError> {
        let server_id = message_id.server_id().ok_or_else(|| {
            EngineError::InvalidFeedbackTarget(format!(
                "message {message_id} has not been confirmed yet"
            ))
        })?;
        let conversation = self
            .store
            .attach_feedback(message_id, feedback)
            .ok_or_else(|| {
                EngineError::InvalidFeedbackTarget(format!("message {message_id} is not loaded"))
            })?;

        let persisted = self.backend.submit_feedback(server_id, feedback).await;
        if let Err(err) = &persisted {
            warn!(%conversation, message = server_id, error = %err, "feedback not saved");
        }

        // A live cycle reconciles on its own; a refetch now would drop its
        // optimistic prompt.
        if self.state(conversation).is_busy() {
            debug!(%conversation, "skipping feedback refetch during a live cycle");
        } else if let Err(err) = self.load(conversation).await {
            warn!(%conversation, error = %err, "refetch after feedback failed");
        }

        persisted.map(|_| ())
    }
}
