//! The send cycle: `Sending -> Streaming -> Reconciling -> Idle`.

use parley_common::Event;
use tracing::{debug, info, warn};

use super::manager::SessionController;
use super::state::{ActiveCycle, ConversationState, CycleTicket, SendOutcome, Slot};
use crate::api::StreamRequest;
use crate::store::PendingExchange;
use crate::transport::StreamOutcome;
use crate::{ConversationId, EngineError};

/// Releases the slot if the send future is dropped mid-cycle.
struct CycleGuard<'a> {
    controller: &'a SessionController,
    conversation: ConversationId,
    epoch: u64,
    armed: bool,
}

impl CycleGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.abandon(self.conversation, self.epoch);
        }
    }
}

impl SessionController {
    /// Send `text` and drive the cycle to completion.
    ///
    /// A send on a busy conversation supersedes the cycle in flight; that
    /// cycle's call returns [`SendOutcome::Superseded`]. Whitespace-only
    /// input is rejected before anything changes.
    pub async fn send(
        &self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<SendOutcome, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::EmptyInput);
        }

        let ticket = self.begin_cycle(conversation);
        let guard = CycleGuard {
            controller: self,
            conversation,
            epoch: ticket.epoch,
            armed: true,
        };
        let result = self.drive(conversation, &ticket, text).await;
        guard.disarm();
        result
    }

    /// Re-send the most recent user prompt as a new cycle. `None` when the
    /// conversation has no user message.
    pub async fn retry(
        &self,
        conversation: ConversationId,
    ) -> Result<Option<SendOutcome>, EngineError> {
        let mut view = self.store.snapshot(conversation);
        if !view.is_loaded() {
            view = self.load(conversation).await?;
        }
        let Some(prompt) = view.last_user_message().map(|m| m.content.clone()) else {
            debug!(%conversation, "nothing to retry");
            return Ok(None);
        };
        info!(%conversation, "retrying last prompt");
        self.send(conversation, &prompt).await.map(Some)
    }

    fn begin_cycle(&self, conversation: ConversationId) -> CycleTicket {
        let ticket = CycleTicket::new(self.next_epoch());
        let previous = {
            let mut slots = self.slots();
            let slot = slots.entry(conversation).or_default();
            let previous = slot.cycle.replace(ActiveCycle {
                ticket: ticket.clone(),
                handle: None,
            });
            if let Some(previous) = &previous {
                previous.ticket.supersede();
                if let Some(handle) = &previous.handle {
                    self.transport.cancel(handle);
                }
                self.store.end_streaming(conversation);
            }
            slot.state = ConversationState::Sending;
            previous
        };

        if let Some(previous) = previous {
            info!(%conversation, superseded = previous.ticket.epoch, "superseding cycle");
            self.events.publish(Event::StreamCancelled { conversation });
        }
        ticket
    }

    /// Run `f` on the slot only while `epoch` still owns it.
    fn with_current<R>(
        &self,
        conversation: ConversationId,
        epoch: u64,
        f: impl FnOnce(&mut Slot) -> R,
    ) -> Option<R> {
        let mut slots = self.slots();
        let slot = slots.get_mut(&conversation)?;
        if !slot.is_current(epoch) {
            return None;
        }
        Some(f(slot))
    }

    fn abandon(&self, conversation: ConversationId, epoch: u64) {
        let released = self.with_current(conversation, epoch, |slot| {
            if let Some(cycle) = slot.cycle.take() {
                cycle.ticket.token.cancel();
                if let Some(handle) = &cycle.handle {
                    self.transport.cancel(handle);
                }
            }
            self.store.end_streaming(conversation);
            slot.state = ConversationState::Idle;
        });
        if released.is_some() {
            debug!(%conversation, epoch, "send dropped mid-cycle");
            self.events.publish(Event::StreamCancelled { conversation });
        }
    }

    fn fail(
        &self,
        conversation: ConversationId,
        ticket: &CycleTicket,
        err: EngineError,
    ) -> Result<SendOutcome, EngineError> {
        let failed = self.with_current(conversation, ticket.epoch, |slot| {
            slot.cycle = None;
            self.store.end_streaming(conversation);
            slot.state = ConversationState::Errored(err.clone());
        });
        if failed.is_none() {
            // lost the slot first; the failure is moot
            return Ok(ticket.stale_outcome());
        }
        warn!(%conversation, error = %err, kind = ?err.kind(), "send cycle failed");
        self.events.publish(Event::StreamFailed {
            conversation,
            error: err.to_string(),
        });
        Err(err)
    }

    async fn drive(
        &self,
        conversation: ConversationId,
        ticket: &CycleTicket,
        text: &str,
    ) -> Result<SendOutcome, EngineError> {
        let epoch = ticket.epoch;

        let view = self.store.snapshot(conversation);
        if view.is_loaded() && view.is_empty() {
            let title = text.trim();
            tokio::select! {
                biased;
                _ = ticket.token.cancelled() => return Ok(ticket.stale_outcome()),
                renamed = self.backend.rename_conversation(conversation, title) => match renamed {
                    Ok(summary) => self.store.set_title(conversation, summary.title),
                    Err(err) => warn!(%conversation, error = %err, "could not title conversation"),
                },
            }
        }

        let opened = self.with_current(conversation, epoch, |slot| {
            let pending = self.store.append_optimistic_user_message(conversation, text);
            let handle = self
                .transport
                .open(conversation, ticket.token.child_token());
            if let Some(cycle) = slot.cycle.as_mut() {
                cycle.handle = Some(handle.clone());
            }
            self.store.begin_streaming(conversation);
            slot.state = ConversationState::Streaming;
            (pending, handle)
        });
        let Some((mut pending, handle)) = opened else {
            return Ok(ticket.stale_outcome());
        };

        info!(%conversation, stream = handle.id(), "stream started");
        self.events.publish(Event::StreamStarted { conversation });

        let request = StreamRequest::new(text, self.parameters());
        let store = &self.store;
        let streamed = self
            .transport
            .run(&handle, &request, |fragment| {
                store.append_fragment(conversation, &fragment);
            })
            .await;

        let chars = match streamed {
            Ok(StreamOutcome::Completed { chars }) => chars,
            Ok(StreamOutcome::Cancelled) => return Ok(ticket.stale_outcome()),
            Err(err) => return self.fail(conversation, ticket, err),
        };

        let reconciling = self.with_current(conversation, epoch, |slot| {
            slot.state = ConversationState::Reconciling;
            self.store.end_streaming(conversation)
        });
        let Some(buffer) = reconciling else {
            return Ok(ticket.stale_outcome());
        };
        pending.streamed = Some(buffer.unwrap_or_default());
        info!(%conversation, chars, "stream completed");
        self.events.publish(Event::StreamCompleted {
            conversation,
            chars,
        });

        self.reconcile(conversation, ticket, &pending).await
    }

    async fn reconcile(
        &self,
        conversation: ConversationId,
        ticket: &CycleTicket,
        pending: &PendingExchange,
    ) -> Result<SendOutcome, EngineError> {
        let fetched = tokio::select! {
            biased;
            _ = ticket.token.cancelled() => return Ok(ticket.stale_outcome()),
            fetched = self.backend.fetch_conversation(conversation) => fetched,
        };

        let detail = match fetched {
            Ok(detail) => detail,
            Err(err) => {
                let err = EngineError::Reconciliation(format!("refetch failed: {err}"));
                return self.fail(conversation, ticket, err);
            }
        };

        let count = detail.messages.len();
        let reconciled = self.with_current(conversation, ticket.epoch, |slot| {
            self.store.set_title(conversation, detail.summary.title);
            let result = self.store.reconcile(conversation, detail.messages, pending);
            slot.cycle = None;
            slot.state = match &result {
                Ok(_) => ConversationState::Idle,
                Err(err) => ConversationState::Errored(err.clone()),
            };
            result
        });

        match reconciled {
            None => Ok(ticket.stale_outcome()),
            Some(Ok(reply)) => {
                self.events.publish(Event::Reconciled {
                    conversation,
                    messages: count,
                });
                Ok(SendOutcome::Completed { reply })
            }
            Some(Err(err)) => {
                self.events.publish(Event::StreamFailed {
                    conversation,
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }
}
