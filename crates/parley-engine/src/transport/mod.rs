//! One cancellable streaming request per conversation.

mod handle;
mod session;


pub use handle::SessionHandle;
pub use session::{StreamOutcome, Transport};
