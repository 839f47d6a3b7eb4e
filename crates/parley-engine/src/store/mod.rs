//! Conversation state with confirmed and optimistic layers.

mod conversation_store;
mod view;


pub use conversation_store::{ConversationStore, PendingExchange};
pub use view::ConversationView;
