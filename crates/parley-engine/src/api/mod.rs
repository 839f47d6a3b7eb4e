//! Chat API surface: the [`ChatBackend`] seam and its HTTP implementation.

mod client;
mod config;
mod dto;

#[cfg(test)]
mod tests;

use async_trait::async_trait;

use crate::decoder::ByteStream;
use crate::{ConversationId, EngineError, Feedback};

pub use client::HttpBackend;
pub use config::ClientConfig;
pub use dto::{
    ConversationDetail, ConversationMetrics, ConversationSummary, FeedbackRecord, StreamRequest,
};

pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Everything the engine needs from the chat service.
///
/// `open_stream` must fail before yielding any bytes when the server rejects
/// the request; the transport relies on that to report HTTP errors without
/// partial output.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn open_stream(
        &self,
        conversation: ConversationId,
        request: &StreamRequest,
    ) -> Result<ByteStream, EngineError>;

    async fn fetch_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<ConversationDetail, EngineError>;

    async fn list_conversations(
        &self,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>, EngineError>;

    async fn create_conversation(
        &self,
        title: Option<&str>,
    ) -> Result<ConversationSummary, EngineError>;

    async fn rename_conversation(
        &self,
        conversation: ConversationId,
        title: &str,
    ) -> Result<ConversationSummary, EngineError>;

    async fn delete_conversation(&self, conversation: ConversationId) -> Result<(), EngineError>;

    async fn submit_feedback(
        &self,
        message_id: i64,
        feedback: Feedback,
    ) -> Result<FeedbackRecord, EngineError>;

    async fn conversation_metrics(
        &self,
        conversation: ConversationId,
    ) -> Result<ConversationMetrics, EngineError>;
}
