//! In-memory [`ChatBackend`] with scripted stream bodies.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::api::{
    ChatBackend, ConversationDetail, ConversationMetrics, ConversationSummary, FeedbackRecord,
    StreamRequest,
};
use crate::decoder::ByteStream;
use crate::{ConversationId, EngineError, Feedback, Message, MessageId, MessageMetrics, Role};

pub(crate) type Chunk = Result<Vec<u8>, EngineError>;

/// One `data:` block.
pub(crate) fn sse(fragment: &str) -> Vec<u8> {
    format!("data: {}\n\n", serde_json::json!({ "content": fragment })).into_bytes()
}

pub(crate) fn sse_error(message: &str) -> Vec<u8> {
    format!("event: error\ndata: {}\n\n", serde_json::json!({ "error": message })).into_bytes()
}

enum Body {
    Chunks(Vec<Chunk>),
    Channel(mpsc::UnboundedReceiver<Chunk>),
    Reject(EngineError),
}

struct Exchange {
    body: Body,
    /// Assistant text the server stores for this exchange.
    reply: Option<String>,
}

#[derive(Default)]
pub(crate) struct ScriptedBackend {
    exchanges: Mutex<VecDeque<Exchange>>,
    conversations: Mutex<HashMap<ConversationId, ConversationDetail>>,
    failures: Mutex<HashMap<&'static str, VecDeque<EngineError>>>,
    opened: Mutex<Vec<(ConversationId, StreamRequest)>>,
    renames: Mutex<Vec<(ConversationId, String)>>,
    feedback: Mutex<Vec<(i64, Feedback)>>,
    fetches: Mutex<usize>,
    next_id: AtomicI64,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(100),
            ..Self::default()
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn message(&self, role: Role, content: &str) -> Message {
        let (metrics, feedback) = match role {
            Role::Assistant => (
                Some(MessageMetrics {
                    tokens: content.chars().count() as u64,
                    tokens_per_second: 10.0,
                    response_time_ms: Some(100.0),
                }),
                None,
            ),
            Role::User => (None, None),
        };
        Message {
            id: MessageId::Server(self.next_id()),
            role,
            content: content.to_string(),
            metrics,
            feedback,
            created_at: Utc::now(),
        }
    }

    /// Add a conversation with the given confirmed history.
    pub fn seed(&self, id: i64, title: &str, history: &[(Role, &str)]) -> ConversationId {
        let conversation = ConversationId::new(id);
        let now = Utc::now();
        let messages = history
            .iter()
            .map(|(role, content)| self.message(*role, content))
            .collect();
        self.conversations.lock().unwrap().insert(
            conversation,
            ConversationDetail {
                summary: ConversationSummary {
                    id: conversation,
                    title: title.to_string(),
                    created_at: now,
                    updated_at: now,
                },
                messages,
            },
        );
        conversation
    }

    /// Next stream yields `fragments` and the server stores their concatenation.
    pub fn reply(&self, fragments: &[&str]) {
        let chunks = fragments.iter().map(|f| Ok(sse(f))).collect();
        self.push(Body::Chunks(chunks), Some(fragments.concat()));
    }

    /// Next stream yields `chunks` verbatim; only the prompt is stored.
    pub fn raw(&self, chunks: Vec<Chunk>) {
        self.push(Body::Chunks(chunks), None);
    }

    /// Next stream is fed by the returned sender and ends when it is dropped.
    pub fn channel(&self, reply: Option<&str>) -> mpsc::UnboundedSender<Chunk> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Body::Channel(rx), reply.map(str::to_string));
        tx
    }

    /// Next stream is refused before any byte is sent.
    pub fn reject(&self, err: EngineError) {
        self.push(Body::Reject(err), None);
    }

    fn push(&self, body: Body, reply: Option<String>) {
        self.exchanges
            .lock()
            .unwrap()
            .push_back(Exchange { body, reply });
    }

    /// Make the next call to `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: EngineError) {
        self.failures
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push_back(err);
    }

    fn take_failure(&self, op: &'static str) -> Result<(), EngineError> {
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(op)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drop the stored assistant reply of the most recent exchange.
    pub fn lose_last_reply(&self, conversation: ConversationId) {
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(detail) = conversations.get_mut(&conversation) {
            if detail.messages.last().map(|m| m.role) == Some(Role::Assistant) {
                detail.messages.pop();
            }
        }
    }

    pub fn opened(&self) -> Vec<(ConversationId, StreamRequest)> {
        self.opened.lock().unwrap().clone()
    }

    pub fn renames(&self) -> Vec<(ConversationId, String)> {
        self.renames.lock().unwrap().clone()
    }

    pub fn feedback_calls(&self) -> Vec<(i64, Feedback)> {
        self.feedback.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock().unwrap()
    }

    pub fn server_messages(&self, conversation: ConversationId) -> Vec<Message> {
        self.conversations
            .lock()
            .unwrap()
            .get(&conversation)
            .map(|d| d.messages.clone())
            .unwrap_or_default()
    }

    fn not_found() -> EngineError {
        EngineError::Http {
            status: 404,
            body: "Session not found".into(),
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn open_stream(
        &self,
        conversation: ConversationId,
        request: &StreamRequest,
    ) -> Result<ByteStream, EngineError> {
        self.opened
            .lock()
            .unwrap()
            .push((conversation, request.clone()));

        let exchange = self
            .exchanges
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| EngineError::Network("no scripted stream".into()))?;

        if let Body::Reject(err) = exchange.body {
            return Err(err);
        }

        {
            let user = self.message(Role::User, &request.content);
            let assistant = exchange
                .reply
                .as_deref()
                .map(|reply| self.message(Role::Assistant, reply));
            let mut conversations = self.conversations.lock().unwrap();
            let detail = conversations
                .get_mut(&conversation)
                .ok_or_else(Self::not_found)?;
            detail.messages.push(user);
            detail.messages.extend(assistant);
        }

        let bytes = match exchange.body {
            Body::Chunks(chunks) => stream::iter(chunks).boxed(),
            Body::Channel(rx) => stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (chunk, rx))
            })
            .boxed(),
            Body::Reject(_) => unreachable!(),
        };
        Ok(bytes)
    }

    async fn fetch_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<ConversationDetail, EngineError> {
        *self.fetches.lock().unwrap() += 1;
        self.take_failure("fetch")?;
        self.conversations
            .lock()
            .unwrap()
            .get(&conversation)
            .cloned()
            .ok_or_else(Self::not_found)
    }

    async fn list_conversations(
        &self,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>, EngineError> {
        self.take_failure("list")?;
        let mut summaries: Vec<_> = self
            .conversations
            .lock()
            .unwrap()
            .values()
            .map(|d| d.summary.clone())
            .collect();
        summaries.sort_by_key(|s| s.id);
        Ok(summaries
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .collect())
    }

    async fn create_conversation(
        &self,
        title: Option<&str>,
    ) -> Result<ConversationSummary, EngineError> {
        self.take_failure("create")?;
        let id = self.next_id();
        self.seed(id, title.unwrap_or("New Chat"), &[]);
        Ok(self.conversations.lock().unwrap()[&ConversationId::new(id)]
            .summary
            .clone())
    }

    async fn rename_conversation(
        &self,
        conversation: ConversationId,
        title: &str,
    ) -> Result<ConversationSummary, EngineError> {
        self.renames
            .lock()
            .unwrap()
            .push((conversation, title.to_string()));
        self.take_failure("rename")?;
        let mut conversations = self.conversations.lock().unwrap();
        let detail = conversations
            .get_mut(&conversation)
            .ok_or_else(Self::not_found)?;
        detail.summary.title = title.to_string();
        Ok(detail.summary.clone())
    }

    async fn delete_conversation(&self, conversation: ConversationId) -> Result<(), EngineError> {
        self.take_failure("delete")?;
        self.conversations
            .lock()
            .unwrap()
            .remove(&conversation)
            .map(|_| ())
            .ok_or_else(Self::not_found)
    }

    async fn submit_feedback(
        &self,
        message_id: i64,
        feedback: Feedback,
    ) -> Result<FeedbackRecord, EngineError> {
        self.feedback.lock().unwrap().push((message_id, feedback));
        self.take_failure("feedback")?;
        let mut conversations = self.conversations.lock().unwrap();
        let message = conversations
            .values_mut()
            .flat_map(|d| d.messages.iter_mut())
            .find(|m| m.id == MessageId::Server(message_id))
            .ok_or_else(|| EngineError::Http {
                status: 404,
                body: "Message not found".into(),
            })?;
        message.feedback = Some(feedback);
        Ok(FeedbackRecord {
            id: self.next_id(),
            message_id,
            feedback_type: feedback,
            created_at: Utc::now(),
        })
    }

    async fn conversation_metrics(
        &self,
        conversation: ConversationId,
    ) -> Result<ConversationMetrics, EngineError> {
        let messages = self.server_messages(conversation);
        let replies: Vec<_> = messages.iter().filter_map(|m| m.metrics).collect();
        let count = replies.len().max(1) as f64;
        Ok(ConversationMetrics {
            total_messages: messages.len() as u64,
            total_tokens: replies.iter().map(|m| m.tokens).sum(),
            avg_tokens_per_second: replies.iter().map(|m| m.tokens_per_second).sum::<f64>() / count,
            avg_response_time_ms: replies
                .iter()
                .filter_map(|m| m.response_time_ms)
                .sum::<f64>()
                / count,
        })
    }
}
