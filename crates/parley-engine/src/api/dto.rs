//! Wire shapes for the chat REST API and their mapping to engine types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ConversationId, Feedback, GenerationParameters, Message, MessageId, MessageMetrics, Role,
};

/// Body of `POST /chat/sessions/{id}/stream`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub content: String,
    #[serde(flatten)]
    pub parameters: GenerationParameters,
}

impl StreamRequest {
    pub fn new(content: impl Into<String>, parameters: GenerationParameters) -> Self {
        Self {
            content: content.into(),
            parameters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    pub id: i64,
    pub message_id: i64,
    pub feedback_type: Feedback,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageDto {
    id: i64,
    content: String,
    sender: Role,
    #[serde(default)]
    tokens: Option<u64>,
    #[serde(default)]
    tokens_per_second: Option<f64>,
    #[serde(default)]
    response_time_ms: Option<f64>,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(default)]
    feedback: Option<FeedbackRecord>,
}

impl From<MessageDto> for Message {
    fn from(dto: MessageDto) -> Self {
        let metrics = match (dto.tokens, dto.tokens_per_second) {
            (None, None) => None,
            (tokens, rate) => Some(MessageMetrics {
                tokens: tokens.unwrap_or(0),
                tokens_per_second: rate.unwrap_or(0.0),
                response_time_ms: dto.response_time_ms,
            }),
        };
        Message {
            id: MessageId::Server(dto.id),
            role: dto.sender,
            content: dto.content,
            metrics,
            feedback: dto.feedback.map(|f| f.feedback_type),
            created_at: dto.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// A conversation with its confirmed history, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDetail {
    pub summary: ConversationSummary,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationDetailDto {
    #[serde(flatten)]
    summary: ConversationSummary,
    #[serde(default)]
    messages: Vec<MessageDto>,
}

impl From<ConversationDetailDto> for ConversationDetail {
    fn from(dto: ConversationDetailDto) -> Self {
        Self {
            summary: dto.summary,
            messages: dto.messages.into_iter().map(Message::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMetrics {
    pub total_messages: u64,
    pub total_tokens: u64,
    pub avg_tokens_per_second: f64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct TitleBody<'a> {
    pub title: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FeedbackBody {
    pub feedback_type: Feedback,
}

/// The REST error envelope: `{"detail": "..."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub detail: serde_json::Value,
}

/// Server timestamps come with or without an offset; naive ones are UTC.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {raw:?}")))
    }
}
