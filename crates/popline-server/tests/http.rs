mod support;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use popline_server::app;
use serde_json::{json, Value};
use support::{Harness, RecognizerMode};
use tower::ServiceExt;

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_check_reports_active_calls() {
    let h = Harness::new(RecognizerMode::Ready);
    h.sessions.create("MZ1", "CA1", "AC1");

    let response = app(h.state.clone())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["activeCalls"], 1);
}

#[tokio::test]
async fn chat_runs_the_agent_and_returns_history() {
    let h = Harness::new(RecognizerMode::Ready);

    let response = app(h.state.clone())
        .oneshot(chat_request(json!({"message": "1F-Aの空きはありますか"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["text"], "1F-Aは空いております");
    let history = json["history"].as_array().unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0]["role"], "user");
    assert_eq!(history[1]["kind"], "tool_use");
    assert_eq!(history[2]["kind"], "tool_result");

    // the returned history can be sent straight back
    let response = app(h.state.clone())
        .oneshot(chat_request(json!({
            "message": "ありがとう",
            "history": json["history"].clone(),
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["history"].as_array().unwrap().len(), 6);
    assert_eq!(json["text"], "ありがとうについて承りました");
}

#[tokio::test]
async fn chat_rejects_blank_message() {
    let h = Harness::new(RecognizerMode::Ready);

    let response = app(h.state.clone())
        .oneshot(chat_request(json!({"message": "   "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(response).await["error"].is_string());
    assert!(h.provider.requests().is_empty());
}

#[tokio::test]
async fn chat_maps_provider_failure_to_bad_gateway() {
    let h = Harness::new(RecognizerMode::Ready);

    let response = app(h.state.clone())
        .oneshot(chat_request(json!({"message": "故障?"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn twiml_points_at_media_stream() {
    let h = Harness::new(RecognizerMode::Ready);

    let response = app(h.state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/twilio/stream")
                .header(header::HOST, "localhost:3005")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/xml");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let xml = String::from_utf8(body.to_vec()).unwrap();
    assert!(xml.contains("<Connect><Stream url=\"ws://localhost:3005/api/media-stream\"/></Connect>"));
}

#[tokio::test]
async fn twiml_prefers_public_url() {
    let h = Harness::with_public_url(RecognizerMode::Ready, Some("https://line.example.com"));

    let response = app(h.state.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/twilio/stream")
                .header(header::HOST, "localhost:3005")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let xml = String::from_utf8(body.to_vec()).unwrap();
    assert!(xml.contains("wss://line.example.com/api/media-stream"));
}
