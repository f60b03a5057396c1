use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use bytes::Bytes;
use chat_relay_gateway::relay::ReadPolicy;
use chat_relay_gateway::test_util::mock_upstream::{expected_events, hello_chunks, ndjson};
use chat_relay_gateway::test_util::{
    test_app, test_config, FailingForwarder, ScriptedForwarder, Step,
};
use chat_relay_gateway::GatewayError;
use futures_util::StreamExt;
use http::{HeaderMap, StatusCode};
use relay_common::StreamChunk;
use tower::ServiceExt;

const HELLO_REQUEST: &str = r#"{"messages":[{"id":"1","content":"hello","sender":"user","time":"2024-01-01T00:00:00Z"}]}"#;

fn stream_request(body: &str) -> http::Request<Body> {
    http::Request::builder()
        .method(http::Method::POST)
        .uri("/api/chat/stream")
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn post_stream(app: &Router, body: &str) -> (StatusCode, HeaderMap, String) {
    let response = app.clone().oneshot(stream_request(body)).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn get_json(app: &Router, uri: &str) -> serde_json::Value {
    let response = app
        .clone()
        .oneshot(
            http::Request::builder()
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_streams_chunks_in_order_then_done() {
    let forwarder = Arc::new(ScriptedForwarder::new(vec![Step::Send(ndjson(
        &hello_chunks(),
    ))]));
    let app = test_app(test_config(), forwarder.clone());

    let (status, headers, body) = post_stream(&app, HELLO_REQUEST).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-type").unwrap(),
        "text/event-stream; charset=utf-8"
    );
    assert_eq!(headers.get("cache-control").unwrap(), "no-cache");
    assert_eq!(headers.get("x-accel-buffering").unwrap(), "no");
    assert_eq!(headers.get("x-accel-expires").unwrap(), "0");
    assert_eq!(
        body,
        "data: {\"content\":\"Hel\",\"finished\":false}\n\n\
         data: {\"content\":\"lo\",\"finished\":false}\n\n\
         data: {\"content\":\"\",\"finished\":true}\n\n\
         data: [DONE]\n\n"
    );
    assert!(forwarder.released());
}

#[tokio::test]
async fn test_chunks_spread_over_blocks() {
    let forwarder = Arc::new(ScriptedForwarder::new(vec![
        Step::Send(Bytes::from_static(b"{\"content\":\"Hel")),
        Step::Send(Bytes::from_static(b"lo\",\"finished\":false}\n{\"content\"")),
        Step::Send(Bytes::from_static(b":\"\",\"finished\":true}\n")),
    ]));
    let app = test_app(test_config(), forwarder);

    let (_, _, body) = post_stream(&app, HELLO_REQUEST).await;

    assert_eq!(
        body,
        expected_events(&[StreamChunk::text("Hello"), StreamChunk::finished("")])
    );
}

#[tokio::test]
async fn test_malformed_record_forwarded_verbatim() {
    let forwarder = Arc::new(ScriptedForwarder::new(vec![
        Step::line("not json at all"),
        Step::line("[DONE]"),
        Step::line(r#"{"content":"ok","finished":true}"#),
    ]));
    let app = test_app(test_config(), forwarder);

    let (status, _, body) = post_stream(&app, HELLO_REQUEST).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        "data: not json at all\n\n\
         data: {\"content\":\"ok\",\"finished\":true}\n\n\
         data: [DONE]\n\n"
    );
}

#[tokio::test]
async fn test_upstream_end_without_finished_chunk() {
    let forwarder = Arc::new(ScriptedForwarder::new(vec![
        Step::line(r#"{"content":"partial","finished":false}"#),
    ]));
    let app = test_app(test_config(), forwarder);

    let (_, _, body) = post_stream(&app, HELLO_REQUEST).await;

    assert_eq!(body, expected_events(&[StreamChunk::text("partial")]));
}

#[tokio::test]
async fn test_malformed_requests_rejected_before_upstream() {
    let forwarder = Arc::new(FailingForwarder::new(|| {
        GatewayError::UpstreamUnavailable("should not be called".to_string())
    }));
    let app = test_app(test_config(), forwarder.clone());

    for body in ["{not json", r#"{"messages":[]}"#, r#"{"model":"x"}"#, r#"{"messages":[{"content":5}]}"#] {
        let (status, headers, text) = post_stream(&app, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {}", body);
        assert!(headers
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("application/json"));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value["error"].as_str().unwrap().starts_with("Malformed request"));
    }
    assert_eq!(forwarder.calls(), 0);
}

#[tokio::test]
async fn test_pre_stream_errors_map_to_status() {
    let cases: [(fn() -> GatewayError, StatusCode); 4] = [
        (
            || GatewayError::UpstreamUnavailable("connection refused".to_string()),
            StatusCode::SERVICE_UNAVAILABLE,
        ),
        (
            || GatewayError::UpstreamRejected {
                status: 500,
                snippet: "internal".to_string(),
            },
            StatusCode::SERVICE_UNAVAILABLE,
        ),
        (|| GatewayError::UpstreamTimeout(300), StatusCode::GATEWAY_TIMEOUT),
        (|| GatewayError::UpstreamCanceled, StatusCode::REQUEST_TIMEOUT),
    ];

    for (make_error, expected) in cases {
        let forwarder = Arc::new(FailingForwarder::new(make_error));
        let app = test_app(test_config(), forwarder.clone());

        let (status, _, text) = post_stream(&app, HELLO_REQUEST).await;

        assert_eq!(status, expected);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["error"], make_error().to_string());
        assert_eq!(forwarder.calls(), 1);
    }
}

#[tokio::test]
async fn test_missing_model_uses_registry_default() {
    let forwarder = Arc::new(ScriptedForwarder::new(vec![Step::Send(ndjson(
        &hello_chunks(),
    ))]));
    let app = test_app(test_config(), forwarder.clone());

    post_stream(&app, HELLO_REQUEST).await;

    let sent = forwarder.last_request().await.unwrap();
    assert_eq!(sent.model.as_deref(), Some("kimi-k2-turbo-preview"));
    assert_eq!(sent.messages[0].content, "hello");
}

#[tokio::test]
async fn test_unavailable_model_rejected() {
    let forwarder = Arc::new(ScriptedForwarder::new(vec![]));
    let app = test_app(test_config(), forwarder.clone());

    // glm-4-flash is enabled but has no API key
    let body = r#"{"messages":[{"content":"hi"}],"model":"glm-4-flash"}"#;
    let (status, _, text) = post_stream(&app, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(text.contains("glm-4-flash"));
    assert!(forwarder.last_request().await.is_none());
}

#[tokio::test]
async fn test_request_options_forwarded() {
    let forwarder = Arc::new(ScriptedForwarder::new(vec![Step::Send(ndjson(
        &hello_chunks(),
    ))]));
    let app = test_app(test_config(), forwarder.clone());

    let body = r#"{"messages":[{"content":"hi","sender":"robot"}],"model":"kimi","temperature":0.3,"maxTokens":512,"thinkingMode":true}"#;
    let (status, _, _) = post_stream(&app, body).await;

    assert_eq!(status, StatusCode::OK);
    let sent = forwarder.last_request().await.unwrap();
    assert_eq!(sent.model.as_deref(), Some("kimi"));
    assert_eq!(sent.temperature, Some(0.3));
    assert_eq!(sent.max_tokens, Some(512));
    assert_eq!(sent.thinking_mode, Some(true));
    assert_eq!(sent.messages[0].sender, relay_common::Sender::User);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_during_silence() {
    let forwarder = Arc::new(ScriptedForwarder::new(vec![
        Step::Wait(Duration::from_secs(25)),
        Step::line(r#"{"content":"late","finished":true}"#),
    ]));
    let app = test_app(test_config(), forwarder);

    let (_, _, body) = post_stream(&app, HELLO_REQUEST).await;

    assert_eq!(
        body,
        "data: [HEARTBEAT]\n\n\
         data: [HEARTBEAT]\n\n\
         data: {\"content\":\"late\",\"finished\":true}\n\n\
         data: [DONE]\n\n"
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_read_is_retried_not_fatal() {
    let forwarder = Arc::new(ScriptedForwarder::with_policy(
        vec![
            Step::Wait(Duration::from_secs(45)),
            Step::line(r#"{"content":"thought hard","finished":true}"#),
        ],
        ReadPolicy::Bounded(Duration::from_secs(30)),
    ));
    let app = test_app(test_config(), forwarder);

    let (_, _, body) = post_stream(&app, HELLO_REQUEST).await;

    assert_eq!(body.matches("[HEARTBEAT]").count(), 4);
    assert!(!body.contains("error"));
    assert!(body.ends_with(
        "data: {\"content\":\"thought hard\",\"finished\":true}\n\ndata: [DONE]\n\n"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_session_deadline_ends_stream_with_error() {
    let mut config = test_config();
    config.stream.total_timeout_secs = 60;
    config.stream.heartbeat_interval_secs = 100;
    let forwarder = Arc::new(ScriptedForwarder::new(vec![
        Step::line(r#"{"content":"a","finished":false}"#),
        Step::Hang,
    ]));
    let app = test_app(config, forwarder.clone());

    let (status, _, body) = post_stream(&app, HELLO_REQUEST).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        "data: {\"content\":\"a\",\"finished\":false}\n\n\
         data: {\"error\":\"Upstream timed out after 60 seconds\"}\n\n\
         data: [DONE]\n\n"
    );
    assert!(forwarder.released());
}

#[tokio::test]
async fn test_mid_stream_failure_ends_with_error_then_done() {
    let forwarder = Arc::new(ScriptedForwarder::new(vec![
        Step::line(r#"{"content":"a","finished":false}"#),
        Step::Fail("connection reset".to_string()),
    ]));
    let app = test_app(test_config(), forwarder);

    let (_, _, body) = post_stream(&app, HELLO_REQUEST).await;

    let events: Vec<&str> = body.split("\n\n").filter(|e| !e.is_empty()).collect();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], "data: {\"content\":\"a\",\"finished\":false}");
    assert!(events[1].starts_with("data: {\"error\":"));
    assert!(events[1].contains("connection reset"));
    assert_eq!(events[2], "data: [DONE]");
}

#[tokio::test(start_paused = true)]
async fn test_client_disconnect_releases_upstream() {
    let forwarder = Arc::new(ScriptedForwarder::new(vec![
        Step::line(r#"{"content":"a","finished":false}"#),
        Step::Hang,
    ]));
    let app = test_app(test_config(), forwarder.clone());

    let response = app.oneshot(stream_request(HELLO_REQUEST)).await.unwrap();
    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert_eq!(first, "data: {\"content\":\"a\",\"finished\":false}\n\n");
    drop(body);

    for _ in 0..50 {
        if forwarder.released() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(forwarder.released());
}

#[tokio::test]
async fn test_models_endpoint_lists_available_models() {
    let app = test_app(test_config(), Arc::new(ScriptedForwarder::new(vec![])));

    let value = get_json(&app, "/api/chat/models").await;

    let models = value["models"].as_array().unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0]["id"], "kimi-k2-turbo-preview");
    assert_eq!(models[0]["envKey"], "MOONSHOT_API_KEY");
    assert_eq!(value["defaultModel"], "kimi-k2-turbo-preview");
}

#[tokio::test]
async fn test_chat_health_reports_counts() {
    let app = test_app(test_config(), Arc::new(ScriptedForwarder::new(vec![])));

    let value = get_json(&app, "/api/chat/health").await;

    assert_eq!(value["status"], "healthy");
    assert_eq!(value["service"], "Chat Service");
    assert_eq!(value["available_models"], serde_json::json!(["kimi"]));
    assert_eq!(value["models"]["total"], 3);
    assert_eq!(value["models"]["enabled"], 1);
}

#[tokio::test]
async fn test_liveness() {
    let app = test_app(test_config(), Arc::new(ScriptedForwarder::new(vec![])));

    let value = get_json(&app, "/health").await;

    assert_eq!(value["status"], "ok");
}
