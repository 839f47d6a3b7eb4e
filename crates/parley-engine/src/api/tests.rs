use std::sync::Arc;

use futures_util::StreamExt;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::credentials::StaticToken;
use crate::decoder::{decode_stream, StreamEvent};
use crate::{GenerationParameters, MessageId, Role};

fn backend(server: &MockServer) -> HttpBackend {
    HttpBackend::new(
        ClientConfig::new(format!("{}/api/v1", server.uri())),
        Arc::new(StaticToken::new("tok-123")),
    )
    .unwrap()
}

fn session_json(id: i64, title: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "userId": 1,
        "title": title,
        "createdAt": "2024-12-28T17:09:00",
        "updatedAt": "2024-12-28T17:10:00"
    })
}

#[tokio::test]
async fn stream_posts_prompt_and_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/sessions/3/stream"))
        .and(header("authorization", "Bearer tok-123"))
        .and(body_partial_json(serde_json::json!({
            "content": "Hi",
            "model": "typhoon-v1.5-instruct",
            "outputLength": 512,
            "topK": 50
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"content\":\"Hel\"}\n\ndata: {\"content\":\"lo\"}\n\n",
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let request = StreamRequest::new("Hi", GenerationParameters::default());
    let bytes = backend(&server)
        .open_stream(ConversationId::new(3), &request)
        .await
        .unwrap();
    let events: Vec<_> = decode_stream(bytes).collect().await;
    assert_eq!(
        events,
        vec![
            Ok(StreamEvent::Content("Hel".into())),
            Ok(StreamEvent::Content("lo".into())),
            Ok(StreamEvent::Completed),
        ]
    );
}

#[tokio::test]
async fn stream_rejection_surfaces_status_and_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/sessions/3/stream"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"detail": "Invalid or expired token"})),
        )
        .mount(&server)
        .await;

    let request = StreamRequest::new("Hi", GenerationParameters::default());
    let err = backend(&server)
        .open_stream(ConversationId::new(3), &request)
        .await
        .err()
        .unwrap();
    assert_eq!(
        err,
        EngineError::Http {
            status: 401,
            body: "Invalid or expired token".into()
        }
    );
}

#[tokio::test]
async fn anonymous_requests_carry_no_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/chat/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(
        ClientConfig::new(format!("{}/api/v1/", server.uri())),
        Arc::new(StaticToken::anonymous()),
    )
    .unwrap();
    backend.list_conversations(0, 50).await.unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    assert!(!received[0].headers.contains_key("authorization"));
}

#[tokio::test]
async fn fetch_conversation_maps_messages() {
    let server = MockServer::start().await;
    let mut body = session_json(3, "Greeting");
    body["messages"] = serde_json::json!([
        {"id": 6, "sessionId": 3, "content": "Hi", "sender": "user", "createdAt": "2024-12-28T17:09:59"},
        {"id": 7, "sessionId": 3, "content": "Hello", "sender": "assistant",
         "tokens": 2, "tokensPerSecond": 20, "responseTimeMs": 100.0,
         "createdAt": "2024-12-28T17:10:00"}
    ]);
    Mock::given(method("GET"))
        .and(path("/api/v1/chat/sessions/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let detail = backend(&server)
        .fetch_conversation(ConversationId::new(3))
        .await
        .unwrap();
    assert_eq!(detail.summary.title, "Greeting");
    assert_eq!(detail.messages.len(), 2);
    assert_eq!(detail.messages[1].id, MessageId::Server(7));
    assert_eq!(detail.messages[1].role, Role::Assistant);
    assert_eq!(detail.messages[1].metrics.unwrap().tokens, 2);
}

#[tokio::test]
async fn list_passes_paging() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/chat/sessions"))
        .and(query_param("skip", "10"))
        .and(query_param("limit", "5"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([session_json(1, "a"), session_json(2, "b")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let sessions = backend(&server).list_conversations(10, 5).await.unwrap();
    let titles: Vec<_> = sessions.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, ["a", "b"]);
}

#[tokio::test]
async fn create_rename_delete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/sessions"))
        .and(body_partial_json(serde_json::json!({"title": null})))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json(9, "New chat")))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/v1/chat/sessions/9"))
        .and(body_partial_json(serde_json::json!({"title": "Renamed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(session_json(9, "Renamed")))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/chat/sessions/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "deleted"})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend(&server);
    let created = backend.create_conversation(None).await.unwrap();
    assert_eq!(created.id, ConversationId::new(9));
    let renamed = backend.rename_conversation(created.id, "Renamed").await.unwrap();
    assert_eq!(renamed.title, "Renamed");
    backend.delete_conversation(created.id).await.unwrap();
}

#[tokio::test]
async fn feedback_and_metrics() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/messages/7/feedback"))
        .and(body_partial_json(serde_json::json!({"feedbackType": "downvote"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 1,
            "messageId": 7,
            "feedbackType": "downvote",
            "createdAt": "2024-12-28T17:11:00"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/chat/sessions/3/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "totalMessages": 4,
            "totalTokens": 120,
            "avgTokensPerSecond": 35.5,
            "avgResponseTimeMs": 410.0
        })))
        .mount(&server)
        .await;

    let backend = backend(&server);
    let record = backend.submit_feedback(7, Feedback::Downvote).await.unwrap();
    assert_eq!(record.message_id, 7);
    assert_eq!(record.feedback_type, Feedback::Downvote);

    let metrics = backend
        .conversation_metrics(ConversationId::new(3))
        .await
        .unwrap();
    assert_eq!(metrics.total_messages, 4);
    assert_eq!(metrics.avg_tokens_per_second, 35.5);
}

#[tokio::test]
async fn not_found_uses_detail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/chat/sessions/404"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(serde_json::json!({"detail": "Session not found"})),
        )
        .mount(&server)
        .await;

    let err = backend(&server)
        .fetch_conversation(ConversationId::new(404))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::Http {
            status: 404,
            body: "Session not found".into()
        }
    );
}

#[tokio::test]
async fn unparseable_body_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/chat/sessions/3/metrics"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .conversation_metrics(ConversationId::new(3))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Parse(_)));
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let backend = HttpBackend::new(
        ClientConfig::new("http://127.0.0.1:9/api/v1"),
        Arc::new(StaticToken::anonymous()),
    )
    .unwrap();
    let err = backend.list_conversations(0, 50).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Network(_) | EngineError::Timeout(_)
    ));
}
