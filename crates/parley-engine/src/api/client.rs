//! reqwest-backed [`ChatBackend`].

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::config::ClientConfig;
use super::dto::{ConversationDetailDto, ErrorBody, FeedbackBody, TitleBody};
use super::{
    ChatBackend, ConversationDetail, ConversationMetrics, ConversationSummary, FeedbackRecord,
    StreamRequest,
};
use crate::credentials::CredentialProvider;
use crate::decoder::ByteStream;
use crate::{ConversationId, EngineError, Feedback};

/// Longest error body carried into an [`EngineError::Http`].
const ERROR_BODY_LIMIT: usize = 200;

pub struct HttpBackend {
    config: ClientConfig,
    http: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpBackend {
    pub fn new(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, EngineError> {
        // No client-wide timeout: it would cut long streams short.
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| EngineError::Network(e.to_string()))?;
        Ok(Self {
            config,
            http,
            credentials,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.root(), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, self.url(path));
        match self.credentials.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// A REST call bounded by the request timeout.
    fn rest(&self, method: Method, path: &str) -> RequestBuilder {
        self.request(method, path).timeout(self.config.request_timeout)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, EngineError> {
        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        check_status(response).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, EngineError> {
        let response = self.send(builder).await?;
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;
        serde_json::from_str(&text).map_err(|e| EngineError::Parse(e.to_string()))
    }

    fn transport_error(&self, err: reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::Timeout(self.config.request_timeout)
        } else {
            EngineError::Network(err.to_string())
        }
    }
}

async fn check_status(response: Response) -> Result<Response, EngineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let body = error_detail(&text);
    warn!(status = status.as_u16(), body = %body, "chat API request failed");
    Err(EngineError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Prefer the server's `detail` message; fall back to the raw body.
fn error_detail(text: &str) -> String {
    let detail = match serde_json::from_str::<ErrorBody>(text) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) => text.to_string(),
    };
    detail.chars().take(ERROR_BODY_LIMIT).collect()
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn open_stream(
        &self,
        conversation: ConversationId,
        request: &StreamRequest,
    ) -> Result<ByteStream, EngineError> {
        debug!(%conversation, model = %request.parameters.model, "opening chat stream");

        let builder = self
            .request(Method::POST, &format!("/chat/sessions/{conversation}/stream"))
            .header("accept", "text/event-stream")
            .json(request);
        let response = builder
            .send()
            .await
            .map_err(|e| EngineError::Network(e.to_string()))?;
        let response = check_status(response).await?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| EngineError::Network(e.to_string()))
            })
            .boxed();
        Ok(bytes)
    }

    async fn fetch_conversation(
        &self,
        conversation: ConversationId,
    ) -> Result<ConversationDetail, EngineError> {
        let dto: ConversationDetailDto = self
            .send_json(self.rest(Method::GET, &format!("/chat/sessions/{conversation}")))
            .await?;
        Ok(dto.into())
    }

    async fn list_conversations(
        &self,
        skip: u32,
        limit: u32,
    ) -> Result<Vec<ConversationSummary>, EngineError> {
        self.send_json(
            self.rest(Method::GET, "/chat/sessions")
                .query(&[("skip", skip), ("limit", limit)]),
        )
        .await
    }

    async fn create_conversation(
        &self,
        title: Option<&str>,
    ) -> Result<ConversationSummary, EngineError> {
        self.send_json(
            self.rest(Method::POST, "/chat/sessions")
                .json(&TitleBody { title }),
        )
        .await
    }

    async fn rename_conversation(
        &self,
        conversation: ConversationId,
        title: &str,
    ) -> Result<ConversationSummary, EngineError> {
        self.send_json(
            self.rest(Method::PATCH, &format!("/chat/sessions/{conversation}"))
                .json(&TitleBody { title: Some(title) }),
        )
        .await
    }

    async fn delete_conversation(&self, conversation: ConversationId) -> Result<(), EngineError> {
        self.send(self.rest(Method::DELETE, &format!("/chat/sessions/{conversation}")))
            .await?;
        Ok(())
    }

    async fn submit_feedback(
        &self,
        message_id: i64,
        feedback: Feedback,
    ) -> Result<FeedbackRecord, EngineError> {
        self.send_json(
            self.rest(Method::POST, &format!("/chat/messages/{message_id}/feedback"))
                .json(&FeedbackBody {
                    feedback_type: feedback,
                }),
        )
        .await
    }

    async fn conversation_metrics(
        &self,
        conversation: ConversationId,
    ) -> Result<ConversationMetrics, EngineError> {
        self.send_json(self.rest(
            Method::GET,
            &format!("/chat/sessions/{conversation}/metrics"),
        ))
        .await
    }
}
