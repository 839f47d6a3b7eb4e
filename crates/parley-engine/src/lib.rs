//! Streaming session engine for Parley.
//!
//! Drives one conversation exchange at a time per conversation:
//! - `decoder`: turns the event-stream body into content / error / completion events
//! - `transport`: one cancellable streaming request per conversation
//! - `store`: observable conversation state with confirmed and optimistic layers
//! - `controller`: the send / retry / cancel / feedback state machine
//! - `api`: HTTP backend for the stream endpoint and the session REST calls

pub mod api;
pub mod controller;
pub mod credentials;
pub mod decoder;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_support;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use api::{
    ChatBackend, ClientConfig, ConversationDetail, ConversationMetrics, ConversationSummary,
    FeedbackRecord, HttpBackend, StreamRequest,
};
pub use controller::{ConversationState, SendOutcome, SessionController};
pub use credentials::{CredentialProvider, EnvToken, StaticToken};
pub use decoder::{StreamDecoder, StreamEvent};
pub use parley_common::ConversationId;
pub use store::{ConversationStore, ConversationView, PendingExchange};
pub use transport::{SessionHandle, StreamOutcome, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message identity: optimistic entries carry a local uuid until the
/// server list replaces them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum MessageId {
    Local(String),
    Server(i64),
}

impl MessageId {
    pub fn new_local() -> Self {
        Self::Local(parley_common::new_id())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn server_id(&self) -> Option<i64> {
        match self {
            Self::Server(id) => Some(*id),
            Self::Local(_) => None,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local:{id}"),
            Self::Server(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub tokens: u64,
    pub tokens_per_second: f64,
    pub response_time_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Upvote,
    Downvote,
}

impl FromStr for Feedback {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "upvote" | "+" => Ok(Self::Upvote),
            "down" | "downvote" | "-" => Ok(Self::Downvote),
            other => Err(EngineError::InvalidFeedbackTarget(format!(
                "unknown feedback {other:?}, expected up or down"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub metrics: Option<MessageMetrics>,
    pub feedback: Option<Feedback>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A user message that exists only locally until reconciled.
    pub fn optimistic_user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_local(),
            role: Role::User,
            content: content.into(),
            metrics: None,
            feedback: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.is_local()
    }
}

/// Sampling settings sent alongside every prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParameters {
    pub model: String,
    pub output_length: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub repetition_penalty: f64,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            model: "typhoon-v1.5-instruct".to_string(),
            output_length: 512,
            temperature: 0.7,
            top_p: 0.7,
            top_k: 50,
            repetition_penalty: 1.0,
        }
    }
}

/// Coarse classification of [`EngineError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EmptyInput,
    MalformedFragment,
    TransportFailure,
    ProtocolError,
    ReconciliationFailure,
    Request,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("message is empty")]
    EmptyInput,
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("stream exceeded {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("server error: {0}")]
    Protocol(String),
    #[error("reconciliation failed: {0}")]
    Reconciliation(String),
    #[error("malformed fragment: {0}")]
    MalformedFragment(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid feedback target: {0}")]
    InvalidFeedbackTarget(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyInput => ErrorKind::EmptyInput,
            Self::Http { .. } | Self::Network(_) | Self::Timeout(_) => ErrorKind::TransportFailure,
            Self::Protocol(_) => ErrorKind::ProtocolError,
            Self::Reconciliation(_) => ErrorKind::ReconciliationFailure,
            Self::MalformedFragment(_) => ErrorKind::MalformedFragment,
            Self::Parse(_) | Self::InvalidFeedbackTarget(_) => ErrorKind::Request,
        }
    }
}

impl From<EngineError> for parley_common::ParleyError {
    fn from(err: EngineError) -> Self {
        parley_common::ParleyError::Engine(err.to_string())
    }
}
