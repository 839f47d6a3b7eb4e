//! Per-conversation cycle state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::transport::SessionHandle;
use crate::{EngineError, Message};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConversationState {
    #[default]
    Idle,
    Sending,
    Streaming,
    Reconciling,
    Errored(EngineError),
}

impl ConversationState {
    /// A cycle is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Sending | Self::Streaming | Self::Reconciling)
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            Self::Errored(err) => Some(err),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sending => "sending",
            Self::Streaming => "streaming",
            Self::Reconciling => "reconciling",
            Self::Errored(_) => "errored",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Errored(err) => write!(f, "errored: {err}"),
            other => f.write_str(other.label()),
        }
    }
}

/// How a send cycle ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Streamed and reconciled; `reply` is the confirmed assistant message.
    Completed { reply: Message },
    /// Cancelled by [`cancel`](super::SessionController::cancel) or by
    /// dropping the send future.
    Cancelled,
    /// A newer send on the same conversation took over.
    Superseded,
}

/// Shared between the controller's slot and the task driving the cycle.
#[derive(Clone)]
pub(crate) struct CycleTicket {
    pub epoch: u64,
    pub token: CancellationToken,
    superseded: Arc<AtomicBool>,
}

impl CycleTicket {
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            token: CancellationToken::new(),
            superseded: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn supersede(&self) {
        self.superseded.store(true, Ordering::Release);
        self.token.cancel();
    }

    /// Outcome reported by a cycle that lost its slot.
    pub fn stale_outcome(&self) -> SendOutcome {
        if self.superseded.load(Ordering::Acquire) {
            SendOutcome::Superseded
        } else {
            SendOutcome::Cancelled
        }
    }
}

pub(crate) struct ActiveCycle {
    pub ticket: CycleTicket,
    pub handle: Option<SessionHandle>,
}

#[derive(Default)]
pub(crate) struct Slot {
    pub state: ConversationState,
    pub cycle: Option<ActiveCycle>,
}

impl Slot {
    pub fn is_current(&self, epoch: u64) -> bool {
        self.cycle
            .as_ref()
            .is_some_and(|cycle| cycle.ticket.epoch == epoch)
    }
}
