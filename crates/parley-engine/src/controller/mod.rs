//! Conversation session control.
//!
//! A [`SessionController`] runs at most one send cycle per conversation,
//! sequencing the store and the transport, and decides every transition
//! into `Errored`.

mod cycle;
mod manager;
mod state;


pub use manager::SessionController;
pub use state::{ConversationState, SendOutcome};
