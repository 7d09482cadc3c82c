use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use genchat::{
    ChatClient, ChatInput, ClientConfig, ImageRef, Message, MessageStatus, Resolution,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

#[derive(Clone)]
enum Step {
    Send(Bytes),
    Pause(Duration),
    Abort,
    Hang,
}

#[derive(Clone)]
enum StreamReply {
    Script(Vec<Step>),
    Status(u16),
}

#[derive(Clone)]
enum FallbackReply {
    Json(Value),
    Status(u16),
}

struct MockBackend {
    addr: SocketAddr,
    stream_hits: Arc<AtomicUsize>,
    fallback_hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    server: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    fn config(&self) -> ClientConfig {
        ClientConfig::with_base_url(format!("http://{}", self.addr))
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn frame(value: &Value) -> Step {
    Step::Send(Bytes::from(format!("data: {value}\n\n")))
}

fn scripted_body(script: Vec<Step>) -> Body {
    let stream = futures_util::stream::unfold(script.into_iter(), |mut steps| async move {
        loop {
            match steps.next()? {
                Step::Send(chunk) => return Some((Ok(chunk), steps)),
                Step::Pause(delay) => tokio::time::sleep(delay).await,
                Step::Abort => {
                    return Some((
                        Err(io::Error::new(io::ErrorKind::ConnectionReset, "mock abort")),
                        steps,
                    ))
                }
                Step::Hang => std::future::pending::<()>().await,
            }
        }
    });
    Body::from_stream(stream)
}

fn status_response(code: u16) -> Response {
    let status = StatusCode::from_u16(code).expect("status code");
    (status, "backend unavailable").into_response()
}

async fn spawn_backend(stream: StreamReply, fallback: FallbackReply) -> MockBackend {
    let stream_hits = Arc::new(AtomicUsize::new(0));
    let fallback_hits = Arc::new(AtomicUsize::new(0));
    let seen: Arc<Mutex<Vec<(Option<String>, Value)>>> = Arc::new(Mutex::new(Vec::new()));

    let stream_route = {
        let hits = stream_hits.clone();
        let seen = seen.clone();
        move |headers: HeaderMap, Json(body): Json<Value>| {
            let hits = hits.clone();
            let seen = seen.clone();
            let reply = stream.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let request_id = headers
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                seen.lock().push((request_id, body));
                match reply {
                    StreamReply::Script(steps) => Response::builder()
                        .header(header::CONTENT_TYPE, "text/event-stream")
                        .body(scripted_body(steps))
                        .expect("build stream response"),
                    StreamReply::Status(code) => status_response(code),
                }
            }
        }
    };

    let fallback_route = {
        let hits = fallback_hits.clone();
        move |Json(_body): Json<Value>| {
            let hits = hits.clone();
            let reply = fallback.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                match reply {
                    FallbackReply::Json(value) => Json(value).into_response(),
                    FallbackReply::Status(code) => status_response(code),
                }
            }
        }
    };

    let app = Router::new()
        .route("/chat/stream", post(stream_route))
        .route("/chat/", post(fallback_route));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockBackend {
        addr,
        stream_hits,
        fallback_hits,
        seen,
        server,
    }
}

fn assistant(client: &ChatClient) -> Message {
    client
        .messages()
        .into_iter()
        .rev()
        .find(|message| message.role == genchat::protocol::Role::Assistant)
        .expect("assistant message")
}

#[tokio::test]
async fn test_streamed_image_generation() {
    let backend = spawn_backend(
        StreamReply::Script(vec![
            frame(&json!({"type": "status", "message": "Generating image, may take a moment..."})),
            frame(&json!({"type": "partial_image", "image_b64": "AAAA", "index": 0})),
            frame(&json!({"type": "partial_image", "image_b64": "BBBB", "index": 1})),
            frame(&json!({"type": "image_solo", "content": "Generated", "image_url": "/images/final.png"})),
            frame(&json!({"type": "done"})),
        ]),
        FallbackReply::Status(500),
    )
    .await;
    let client = ChatClient::new(backend.config()).expect("client");

    let resolution = client.send(ChatInput::text("draw a cat")).await;

    assert!(matches!(resolution, Resolution::Streamed(_)));
    let message = assistant(&client);
    assert_eq!(message.status, MessageStatus::Complete);
    assert_eq!(message.content, "");
    assert_eq!(
        message.image_ref,
        Some(ImageRef::Url("/images/final.png".to_string()))
    );
    assert!(message.progress.is_none());
    assert_eq!(client.messages().len(), 2);
    assert_eq!(client.active_timers(), 0);
    assert_eq!(backend.fallback_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_streamed_text_split_across_chunks() {
    let wire = [
        json!({"type": "status", "message": "Getting started..."}),
        json!({"type": "text", "content": "The answer "}),
        json!({"type": "text", "content": "is 4. ✓"}),
        json!({"type": "done"}),
    ]
    .iter()
    .map(|value| format!("data: {value}\n\n"))
    .collect::<String>()
    .into_bytes();

    // Cuts land inside frame prefixes, JSON bodies and the multi-byte check mark.
    let steps: Vec<Step> = wire
        .chunks(7)
        .map(|piece| Step::Send(Bytes::copy_from_slice(piece)))
        .collect();
    assert!(steps.len() > 10);

    let backend = spawn_backend(StreamReply::Script(steps), FallbackReply::Status(500)).await;
    let client = ChatClient::new(backend.config()).expect("client");

    let resolution = client.send(ChatInput::text("2+2?")).await;

    assert!(matches!(resolution, Resolution::Streamed(_)));
    let message = assistant(&client);
    assert_eq!(message.content, "The answer is 4. ✓");
    assert!(message.image_ref.is_none());
}

#[tokio::test]
async fn test_error_frame_commits_failure_without_fallback() {
    let backend = spawn_backend(
        StreamReply::Script(vec![
            frame(&json!({"type": "status", "message": "Generating image"})),
            frame(&json!({"type": "error", "message": "Image generation failed"})),
            frame(&json!({"type": "done"})),
        ]),
        FallbackReply::Json(json!({"type": "text_solo", "content": "unused"})),
    )
    .await;
    let client = ChatClient::new(backend.config()).expect("client");

    let resolution = client.send(ChatInput::text("draw")).await;

    assert!(matches!(resolution, Resolution::Failed(_)));
    let message = assistant(&client);
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.content, "Image generation failed");
    assert_eq!(backend.fallback_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stream_status_error_uses_fallback() {
    let backend = spawn_backend(
        StreamReply::Status(500),
        FallbackReply::Json(json!({
            "type": "both",
            "content": "Here is your chart",
            "image_url": "https://cdn.example/chart.png"
        })),
    )
    .await;
    let client = ChatClient::new(backend.config()).expect("client");

    let resolution = client.send(ChatInput::text("chart please")).await;

    assert!(matches!(resolution, Resolution::Fallback(_)));
    let message = assistant(&client);
    assert_eq!(message.status, MessageStatus::Complete);
    assert_eq!(message.content, "Here is your chart");
    assert_eq!(
        message.image_ref,
        Some(ImageRef::Url("https://cdn.example/chart.png".to_string()))
    );
    assert_eq!(backend.stream_hits.load(Ordering::SeqCst), 1);
    assert_eq!(backend.fallback_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_both_endpoints_failing_commits_apology() {
    let backend = spawn_backend(StreamReply::Status(502), FallbackReply::Status(500)).await;
    let client = ChatClient::new(backend.config()).expect("client");

    let resolution = client.send(ChatInput::text("hello")).await;

    assert!(matches!(resolution, Resolution::Failed(_)));
    let message = assistant(&client);
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.content, genchat::fallback::APOLOGY_MESSAGE);
    assert_eq!(client.active_timers(), 0);
}

#[tokio::test]
async fn test_unreachable_backend_commits_apology() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let client =
        ChatClient::new(ClientConfig::with_base_url(format!("http://{addr}"))).expect("client");
    let resolution = client.send(ChatInput::text("anyone there?")).await;

    assert!(matches!(resolution, Resolution::Failed(_)));
    assert_eq!(assistant(&client).content, genchat::fallback::APOLOGY_MESSAGE);
}

#[tokio::test]
async fn test_mid_stream_abort_falls_back_into_same_placeholder() {
    let backend = spawn_backend(
        StreamReply::Script(vec![
            frame(&json!({"type": "text", "content": "partial"})),
            Step::Pause(Duration::from_millis(100)),
            Step::Abort,
        ]),
        FallbackReply::Json(json!({"type": "text_solo", "content": "complete answer"})),
    )
    .await;
    let client = ChatClient::new(backend.config()).expect("client");

    let resolution = client.send(ChatInput::text("explain")).await;

    assert!(matches!(resolution, Resolution::Fallback(_)));
    let messages = client.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "complete answer");
    assert_eq!(messages[1].status, MessageStatus::Complete);
    assert_eq!(client.active_timers(), 0);
}

#[tokio::test]
async fn test_abort_after_done_is_ignored() {
    let backend = spawn_backend(
        StreamReply::Script(vec![
            frame(&json!({"type": "text", "content": "final text"})),
            frame(&json!({"type": "done"})),
            Step::Pause(Duration::from_millis(100)),
            Step::Abort,
        ]),
        FallbackReply::Json(json!({"type": "text_solo", "content": "should not appear"})),
    )
    .await;
    let client = ChatClient::new(backend.config()).expect("client");

    let resolution = client.send(ChatInput::text("q")).await;

    assert!(matches!(resolution, Resolution::Streamed(_)));
    assert_eq!(assistant(&client).content, "final text");
    assert_eq!(backend.fallback_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_connection_held_open_after_done_resolves() {
    let backend = spawn_backend(
        StreamReply::Script(vec![
            frame(&json!({"type": "text", "content": "answer"})),
            frame(&json!({"type": "done"})),
            Step::Hang,
        ]),
        FallbackReply::Json(json!({"type": "text_solo", "content": "should not appear"})),
    )
    .await;
    let client = ChatClient::new(backend.config()).expect("client");

    let pending = client.submit(ChatInput::text("q"));
    let request_id = pending.id();
    let resolution = tokio::time::timeout(Duration::from_secs(5), client.run(pending))
        .await
        .expect("run returns without waiting for the body to close");

    assert!(matches!(resolution, Resolution::Streamed(_)));
    assert!(!client.cancel(request_id));
    let message = assistant(&client);
    assert_eq!(message.content, "answer");
    assert_eq!(message.status, MessageStatus::Complete);
    assert_eq!(client.in_flight(), 0);
    assert_eq!(client.active_timers(), 0);
    assert_eq!(backend.fallback_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancel_while_streaming() {
    let backend = spawn_backend(
        StreamReply::Script(vec![
            frame(&json!({"type": "status", "message": "Generating image..."})),
            Step::Hang,
        ]),
        FallbackReply::Json(json!({"type": "text_solo", "content": "should not appear"})),
    )
    .await;
    let client = Arc::new(ChatClient::new(backend.config()).expect("client"));

    let pending = client.submit(ChatInput::text("draw slowly"));
    let request_id = pending.id();
    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.run(pending).await })
    };

    let mut opened = false;
    for _ in 0..200 {
        if client.messages().iter().any(Message::is_open) {
            opened = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(opened, "placeholder never opened");
    assert_eq!(client.active_timers(), 1);

    assert!(client.cancel(request_id));
    let resolution = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run finishes after cancel")
        .expect("join");

    assert_eq!(resolution, Resolution::Cancelled);
    assert!(!client.cancel(request_id));
    let messages = client.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "draw slowly");
    assert_eq!(client.active_timers(), 0);
    assert_eq!(backend.fallback_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_request_carries_id_header_and_history() {
    let backend = spawn_backend(
        StreamReply::Script(vec![
            frame(&json!({"type": "text", "content": "first answer"})),
            frame(&json!({"type": "done"})),
        ]),
        FallbackReply::Status(500),
    )
    .await;
    let client = ChatClient::new(backend.config()).expect("client");

    client.send(ChatInput::text("first")).await;
    client
        .send(
            ChatInput::text("make the sky purple").with_edit(
                ImageRef::Url("/images/sky.png".to_string()),
                Some("bWFzaw==".to_string()),
            ),
        )
        .await;

    let seen = backend.seen.lock();
    assert_eq!(seen.len(), 2);
    let ids: Vec<uuid::Uuid> = seen
        .iter()
        .map(|(id, _)| {
            uuid::Uuid::parse_str(id.as_deref().expect("x-request-id header")).expect("uuid")
        })
        .collect();
    assert_ne!(ids[0], ids[1]);

    let body = &seen[1].1;
    assert_eq!(body["user_input"], "make the sky purple");
    assert_eq!(
        body["conversation_history"],
        json!([
            {"role": "user", "content": "first"},
            {"role": "assistant", "content": "first answer"}
        ])
    );
    assert_eq!(body["image_region"]["image_url"], "/images/sky.png");
    assert_eq!(body["image_region"]["mask_data"], "bWFzaw==");
}
