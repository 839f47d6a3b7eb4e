use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::ConversationId;

/// Handle to one open stream.
///
/// Delivery and cancellation share a gate: once [`cancel`] returns, no
/// further fragment reaches the callback, even one already decoded.
///
/// [`cancel`]: SessionHandle::cancel
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    conversation: ConversationId,
    token: CancellationToken,
    open: Mutex<bool>,
}

impl SessionHandle {
    pub(crate) fn new(id: u64, conversation: ConversationId, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                conversation,
                token,
                open: Mutex::new(true),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn conversation(&self) -> ConversationId {
        self.inner.conversation
    }

    /// Idempotent.
    pub fn cancel(&self) {
        let mut open = self.inner.open.lock().unwrap_or_else(PoisonError::into_inner);
        *open = false;
        self.inner.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// Run `deliver` unless the handle is cancelled. Returns whether it ran.
    pub(crate) fn dispatch<F>(&self, fragment: String, deliver: &mut F) -> bool
    where
        F: FnMut(String),
    {
        let open = self.inner.open.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open || self.inner.token.is_cancelled() {
            return false;
        }
        deliver(fragment);
        true
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("conversation", &self.inner.conversation)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SessionHandle {}
