//! Expert facade: plain and streamed chat against a local mock service.

mod common;

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crop_advisor::error::DispatchError;
use crop_advisor::expert::ExpertService;
use crop_advisor::models::{ChatMessage, FeatureVector, SoilHealth};
use crop_advisor::stream::StreamFraming;

/// Respond with `parts` as separate body frames, pausing between them.
fn chunked(parts: &[&'static [u8]], content_type: &'static str) -> Response {
    let parts: Vec<Bytes> = parts.iter().map(|p| Bytes::from_static(p)).collect();
    let frames = stream::iter(parts).then(|part| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, Infallible>(part)
    });
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from_stream(frames))
        .unwrap()
}

async fn expert(router: Router, framing: StreamFraming) -> ExpertService {
    let base = common::serve(router).await;
    ExpertService::new(common::dispatcher(&base), framing)
}

fn question() -> Vec<ChatMessage> {
    vec![ChatMessage::user("Which crop suits clay soil?")]
}

#[tokio::test]
async fn test_raw_stream_concatenates_increments() {
    let router = Router::new().route(
        "/ai/chat",
        post(|| async { chunked(&[b"Rice ", b"grows ", b"well."], "text/plain") }),
    );
    let service = expert(router, StreamFraming::Raw).await;

    let mut chunks = service.chat_stream(&question(), None).await.unwrap();
    let mut text = String::new();
    let mut saw_done = false;
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.unwrap();
        assert!(!saw_done, "no chunk may follow the final one");
        text.push_str(&chunk.text);
        saw_done = chunk.done;
    }
    assert!(saw_done);
    assert_eq!(text, "Rice grows well.");
}

#[tokio::test]
async fn test_raw_stream_reassembles_split_utf8() {
    // "é" is 0xC3 0xA9 and "🌾" is four bytes; both straddle frame boundaries.
    let router = Router::new().route(
        "/ai/chat",
        post(|| async {
            chunked(
                &[b"caf\xC3", b"\xA9 ", b"\xF0\x9F", b"\x8C\xBE!"],
                "text/plain; charset=utf-8",
            )
        }),
    );
    let service = expert(router, StreamFraming::Raw).await;

    let chunks: Vec<_> = service
        .chat_stream(&question(), None)
        .await
        .unwrap()
        .collect()
        .await;
    let text: String = chunks
        .into_iter()
        .map(|c| c.unwrap().text)
        .collect();
    assert_eq!(text, "café 🌾!");
}

#[tokio::test]
async fn test_event_stream_until_done_marker() {
    let router = Router::new().route(
        "/ai/chat",
        post(|| async {
            chunked(
                &[
                    b": keep-alive\n\n",
                    b"data: Sow after\n\n",
                    b"data: {\"choices\":[{\"delta\":{\"content\":\" the rains\"}}]}\n\n",
                    b"data: [DONE]\n\n",
                    b"data: ignored\n\n",
                ],
                "text/event-stream",
            )
        }),
    );
    let service = expert(router, StreamFraming::EventStream).await;

    let text = service
        .chat_stream(&question(), None)
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();
    assert_eq!(text, "Sow after the rains");
}

#[tokio::test]
async fn test_event_stream_without_done_is_stream_error() {
    let router = Router::new().route(
        "/ai/chat",
        post(|| async { chunked(&[b"data: partial\n\n"], "text/event-stream") }),
    );
    let service = expert(router, StreamFraming::EventStream).await;

    let items: Vec<_> = service
        .chat_stream(&question(), None)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap().text, "partial");
    assert!(matches!(items[1], Err(DispatchError::Stream(_))));
}

#[tokio::test]
async fn test_stream_rejected_before_body() {
    let router = Router::new().route(
        "/ai/chat",
        post(|| async {
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({"detail": "slow down"})),
            )
        }),
    );
    let service = expert(router, StreamFraming::Raw).await;

    let err = service.chat_stream(&question(), None).await.unwrap_err();
    assert!(matches!(err, DispatchError::Client { status: 429, .. }));
    assert_eq!(err.summary(), "slow down");
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_dropping_stream_releases_channel() {
    let released = Arc::new(AtomicBool::new(false));
    let flag = released.clone();
    let router = Router::new().route(
        "/ai/chat",
        post(move || {
            let guard = SetOnDrop(flag.clone());
            async move {
                // Never ends on its own; only a closed connection stops it.
                let ticks = stream::unfold(guard, |guard| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Some((Ok::<_, Infallible>(Bytes::from_static(b"tick ")), guard))
                });
                Response::builder()
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from_stream(ticks))
                    .unwrap()
            }
        }),
    );
    let service = expert(router, StreamFraming::Raw).await;

    let mut chunks = service.chat_stream(&question(), None).await.unwrap();
    let first = chunks.next().await.unwrap().unwrap();
    assert!(first.text.starts_with("tick"));
    assert!(!released.load(Ordering::SeqCst));
    drop(chunks);

    for _ in 0..100 {
        if released.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server kept streaming after the consumer went away");
}

#[tokio::test]
async fn test_plain_chat_sends_conversation() {
    let router = Router::new().route(
        "/ai/chat",
        post(|Json(body): Json<Value>| async move {
            let turns = body["messages"].as_array().map(|m| m.len()).unwrap_or(0);
            let last = body["messages"][turns - 1]["content"]
                .as_str()
                .unwrap_or("")
                .to_string();
            Json(json!({"message": format!("{} turns, last: {}", turns, last)}))
        }),
    );
    let service = expert(router, StreamFraming::Raw).await;

    let messages = vec![
        ChatMessage::system("Answer briefly."),
        ChatMessage::user("Best crop for pH 5.5?"),
    ];
    let reply = service.chat(&messages, None).await.unwrap();
    assert_eq!(reply, "2 turns, last: Best crop for pH 5.5?");
}

#[tokio::test]
async fn test_soil_analysis_and_lookups() {
    let router = Router::new()
        .route(
            "/ai/soil-analysis",
            post(|Json(body): Json<Value>| async move {
                let ph = body["features"]["ph"].as_f64().unwrap_or_default();
                Json(json!({
                    "overallHealth": "good",
                    "nutrientBalance": "balanced",
                    "phAssessment": format!("pH {} is fine", ph),
                    "recommendations": ["add compost"]
                }))
            }),
        )
        .route(
            "/expert/diseases/{name}",
            get(|axum::extract::Path(name): axum::extract::Path<String>| async move {
                Json(json!({"name": name}))
            }),
        )
        .route(
            "/expert/diagnose",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"matched": body["symptoms"]}))
            }),
        );
    let service = expert(router, StreamFraming::Raw).await;

    let analysis = service.soil_analysis(&FeatureVector::default()).await.unwrap();
    assert_eq!(analysis.overall_health, SoilHealth::Good);
    assert_eq!(analysis.ph_assessment, "pH 6.5 is fine");

    let disease = service.disease("leaf blight").await.unwrap();
    assert_eq!(disease["name"], "leaf blight");

    let diagnosis = service
        .diagnose(&["yellow leaves".to_string(), "wilting".to_string()])
        .await
        .unwrap();
    assert_eq!(diagnosis["matched"], json!(["yellow leaves", "wilting"]));
}

#[tokio::test]
async fn test_expert_system_chat_endpoints() {
    let router = Router::new()
        .route(
            "/",
            get(|| async { Json(json!({"message": "MESA expert system"})) }),
        )
        .route(
            "/chat/models",
            get(|| async { Json(json!({"models": ["llama-3.1-8b-instant"]})) }),
        )
        .route(
            "/chat/validate-model",
            post(|Json(body): Json<Value>| async move {
                let valid = body["model"] == "llama-3.1-8b-instant";
                Json(json!({"model": body["model"], "valid": valid}))
            }),
        )
        .route(
            "/chat/message",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"echo": body["message"]}))
            }),
        );
    let service = expert(router, StreamFraming::Raw).await;

    let banner = service.root().await.unwrap();
    assert_eq!(banner["message"], "MESA expert system");

    let models = service.chat_models().await.unwrap();
    assert_eq!(models["models"][0], "llama-3.1-8b-instant");

    let accepted = service.validate_model("llama-3.1-8b-instant").await.unwrap();
    assert_eq!(accepted["valid"], true);
    let rejected = service.validate_model("gpt-2").await.unwrap();
    assert_eq!(rejected["valid"], false);
    assert_eq!(rejected["model"], "gpt-2");

    let reply = service
        .chat_message(&json!({"message": "Is my maize wilting?"}))
        .await
        .unwrap();
    assert_eq!(reply["echo"], "Is my maize wilting?");
}
