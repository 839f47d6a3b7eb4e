use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::handle::SessionHandle;
use crate::api::{ChatBackend, StreamRequest};
use crate::decoder::{decode_stream, StreamEvent};
use crate::{ConversationId, EngineError};

/// How a stream ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The body ended normally; `chars` counts delivered characters.
    Completed { chars: usize },
    Cancelled,
}

/// Owns the live stream of each conversation.
pub struct Transport {
    backend: Arc<dyn ChatBackend>,
    max_stream: Duration,
    live: Mutex<HashMap<ConversationId, SessionHandle>>,
    next_id: AtomicU64,
}

impl Transport {
    pub fn new(backend: Arc<dyn ChatBackend>, max_stream: Duration) -> Self {
        Self {
            backend,
            max_stream,
            live: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn max_stream_duration(&self) -> Duration {
        self.max_stream
    }

    /// Register a new stream for `conversation`, cancelling the one it replaces.
    ///
    /// `token` ties the stream to its caller; cancelling it cancels the handle.
    pub fn open(&self, conversation: ConversationId, token: CancellationToken) -> SessionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = SessionHandle::new(id, conversation, token);
        let previous = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(conversation, handle.clone());
        if let Some(previous) = previous {
            debug!(%conversation, superseded = previous.id(), stream = id, "superseding live stream");
            previous.cancel();
        }
        handle
    }

    /// No fragment is delivered for `handle` after this returns.
    pub fn cancel(&self, handle: &SessionHandle) {
        handle.cancel();
        self.release(handle);
    }

    pub fn live_handle(&self, conversation: ConversationId) -> Option<SessionHandle> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&conversation)
            .cloned()
    }

    pub fn is_live(&self, conversation: ConversationId) -> bool {
        self.live_handle(conversation).is_some()
    }

    fn release(&self, handle: &SessionHandle) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if live.get(&handle.conversation()) == Some(handle) {
            live.remove(&handle.conversation());
        }
    }

    /// Drive the stream for `handle` to its end, calling `on_fragment` for
    /// each content event in order.
    pub async fn run<F>(
        &self,
        handle: &SessionHandle,
        request: &StreamRequest,
        mut on_fragment: F,
    ) -> Result<StreamOutcome, EngineError>
    where
        F: FnMut(String) + Send,
    {
        let token = handle.token().clone();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Ok(StreamOutcome::Cancelled),
            res = tokio::time::timeout(self.max_stream, self.pump(handle, request, &mut on_fragment)) => {
                match res {
                    Ok(res) => res,
                    Err(_) => {
                        warn!(conversation = %handle.conversation(), limit_secs = self.max_stream.as_secs(), "stream exceeded duration limit");
                        Err(EngineError::Timeout(self.max_stream))
                    }
                }
            }
        };
        self.release(handle);

        match result {
            // A failure racing a cancel is reported as the cancel.
            Err(_) if handle.is_cancelled() => Ok(StreamOutcome::Cancelled),
            other => other,
        }
    }

    async fn pump<F>(
        &self,
        handle: &SessionHandle,
        request: &StreamRequest,
        on_fragment: &mut F,
    ) -> Result<StreamOutcome, EngineError>
    where
        F: FnMut(String) + Send,
    {
        let bytes = self
            .backend
            .open_stream(handle.conversation(), request)
            .await?;
        let events = decode_stream(bytes);
        futures_util::pin_mut!(events);

        let mut chars = 0;
        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::Content(text) => {
                    let len = text.chars().count();
                    if !handle.dispatch(text, on_fragment) {
                        return Ok(StreamOutcome::Cancelled);
                    }
                    chars += len;
                }
                StreamEvent::Error(message) => return Err(EngineError::Protocol(message)),
                StreamEvent::Completed => break,
            }
        }
        Ok(StreamOutcome::Completed { chars })
    }
}
