//! Integration test: upload tracker and chat client against an in-process backend.
//!
//! The axum app below mimics the workshop backend's `/upload` and `/chat` routes:
//! JSON bodies on upload, `text/event-stream` on chat. A second app puts the same
//! routes behind HTTP basic auth, as the backend does when `WEB_APP_USERNAME` is set.

use std::sync::{Arc, Mutex};

use axum::{
    extract::Multipart,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use foundry_chat_core::{
    group_annotations, BasicAuth, ChatClient, ChatError, ChatMessage, ClientConfig, HttpUploader, UploadFile,
    UploadObserver, UploadRecord, UploadStatus, UploadTracker, NETWORK_ERROR_MESSAGE,
};
use serde_json::json;

async fn upload(mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.unwrap_or_default();
        if name == "crash.pdf" {
            return (StatusCode::INTERNAL_SERVER_ERROR, "<html>upstream died</html>").into_response();
        }
        if name.ends_with(".pdf") && !bytes.is_empty() {
            return (
                StatusCode::OK,
                Json(json!({
                    "message": "Document uploaded and indexed successfully",
                    "filename": name,
                    "chunks_count": 5,
                    "blob_url": format!("https://blob.local/documents/{}", name),
                })),
            )
                .into_response();
        }
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Unsupported file format. Supported: .pdf, .docx, .txt, .md" })),
        )
            .into_response();
    }
    (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing file" }))).into_response()
}

async fn chat(Json(req): Json<serde_json::Value>) -> Response {
    let question = req["messages"]
        .as_array()
        .and_then(|m| m.last())
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();
    if question.is_empty() {
        return (StatusCode::UNPROCESSABLE_ENTITY, "no messages").into_response();
    }
    let events = [
        json!({ "type": "message", "content": "The answer " }),
        json!({ "type": "message", "content": "is 42." }),
        json!({
            "type": "completed_message",
            "content": "The answer is 42.",
            "sources": [
                { "document": "guide.pdf", "url": "https://blob.local/guide.pdf#page=7", "chunk_index": 3, "page_number": 7 },
                { "document": "guide.pdf", "url": "https://blob.local/guide.pdf#page=2", "chunk_index": 1, "page_number": 2 },
                { "document": "faq.md", "url": "", "chunk_index": 0, "page_number": null }
            ]
        }),
        json!({ "type": "stream_end" }),
    ];
    let body: String = events
        .iter()
        .map(|e| format!("data: {}\n\n", e))
        .collect();
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

/// `admin:s3cret`
const EXPECTED_AUTHORIZATION: &str = "Basic YWRtaW46czNjcmV0";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(EXPECTED_AUTHORIZATION)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic")],
        Json(json!({ "error": "Invalid credentials" })),
    )
        .into_response()
}

async fn guarded_upload(headers: HeaderMap, multipart: Multipart) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    upload(multipart).await
}

async fn guarded_chat(headers: HeaderMap, body: Json<serde_json::Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    chat(body).await
}

async fn spawn_backend() -> String {
    serve(
        Router::new()
            .route("/upload", post(upload))
            .route("/chat", post(chat)),
    )
    .await
}

async fn spawn_guarded_backend() -> String {
    serve(
        Router::new()
            .route("/upload", post(guarded_upload))
            .route("/chat", post(guarded_chat)),
    )
    .await
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Base URL of a port nothing listens on.
async fn dead_backend() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[derive(Default)]
struct RefreshSpy {
    refreshed: Mutex<Vec<String>>,
}

impl UploadObserver for RefreshSpy {
    fn on_upload_succeeded(&self, record: &UploadRecord) {
        self.refreshed.lock().unwrap().push(record.filename.clone());
    }
}

fn with_credentials(config: ClientConfig) -> ClientConfig {
    ClientConfig {
        basic_auth: Some(BasicAuth {
            username: "admin".to_string(),
            password: "s3cret".to_string(),
        }),
        ..config
    }
}

fn pdf(name: &str) -> UploadFile {
    UploadFile::new(name, b"%PDF-1.7 test".to_vec())
}

#[tokio::test]
async fn upload_batch_against_backend() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let config = ClientConfig::default().with_api_base_url(&spawn_backend().await);
    let spy = Arc::new(RefreshSpy::default());
    let tracker = UploadTracker::new(Arc::new(HttpUploader::new(&config).unwrap()))
        .with_concurrency(1)
        .with_observer(spy.clone());

    let done = tracker
        .upload_batch(vec![
            pdf("a.pdf"),
            UploadFile::new("tool.exe", b"MZ".to_vec()),
            pdf("crash.pdf"),
        ])
        .await;

    assert_eq!(done[0].status, UploadStatus::Success);
    assert_eq!(done[0].chunks_count, Some(5));
    assert_eq!(
        done[0].message.as_deref(),
        Some("Document uploaded and indexed successfully")
    );

    assert_eq!(done[1].status, UploadStatus::Error);
    assert!(done[1]
        .message
        .as_deref()
        .unwrap()
        .starts_with("Unsupported file format"));

    // 500 with a non-JSON body has no structured error to show
    assert_eq!(done[2].status, UploadStatus::Error);
    assert_eq!(done[2].message.as_deref(), Some(NETWORK_ERROR_MESSAGE));

    assert_eq!(*spy.refreshed.lock().unwrap(), ["a.pdf"]);
    assert_eq!(tracker.records().len(), 3);
}

#[tokio::test]
async fn unreachable_backend_is_network_error() {
    let config = ClientConfig::default().with_api_base_url(&dead_backend().await);
    let tracker = UploadTracker::new(Arc::new(HttpUploader::new(&config).unwrap()));

    let done = tracker.upload_batch(vec![pdf("b.pdf")]).await;

    assert_eq!(done[0].filename, "b.pdf");
    assert_eq!(done[0].status, UploadStatus::Error);
    assert_eq!(done[0].message.as_deref(), Some(NETWORK_ERROR_MESSAGE));
}

#[tokio::test]
async fn chat_stream_builds_message_with_references() {
    let config = ClientConfig::default().with_api_base_url(&spawn_backend().await);
    let client = ChatClient::new(&config).unwrap();

    let mut deltas = Vec::new();
    let reply = client
        .send_with(&[ChatMessage::user("What is the answer?")], |d| {
            deltas.push(d.to_string())
        })
        .await
        .unwrap();

    assert_eq!(deltas, ["The answer ", "is 42."]);
    assert_eq!(reply.content, "The answer is 42.");
    assert!(reply.duration.is_some());

    let groups = group_annotations(&reply.annotations);
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].document, "guide.pdf");
    assert_eq!(groups[0].pages_label(), "2, 7");
    assert_eq!(groups[0].link(), Some("https://blob.local/guide.pdf#page=7"));
    assert_eq!(groups[1].pages_label(), "N/A");
    assert_eq!(groups[1].link_label(), "N/A");
}

#[tokio::test]
async fn chat_status_error_is_reported() {
    let config = ClientConfig::default().with_api_base_url(&spawn_backend().await);
    let client = ChatClient::new(&config).unwrap();

    let err = client.send(&[]).await.unwrap_err();

    assert!(matches!(err, ChatError::Status { status: 422, .. }));
}

#[tokio::test]
async fn upload_sends_basic_auth_when_configured() {
    let config = ClientConfig::default().with_api_base_url(&spawn_guarded_backend().await);

    let anonymous = UploadTracker::new(Arc::new(HttpUploader::new(&config).unwrap()));
    let done = anonymous.upload_batch(vec![pdf("a.pdf")]).await;
    assert_eq!(done[0].status, UploadStatus::Error);
    assert_eq!(done[0].message.as_deref(), Some("Invalid credentials"));

    let config = with_credentials(config);
    let signed_in = UploadTracker::new(Arc::new(HttpUploader::new(&config).unwrap()));
    let done = signed_in.upload_batch(vec![pdf("a.pdf")]).await;
    assert_eq!(done[0].status, UploadStatus::Success);
    assert_eq!(done[0].chunks_count, Some(5));
}

#[tokio::test]
async fn chat_sends_basic_auth_when_configured() {
    let config = ClientConfig::default().with_api_base_url(&spawn_guarded_backend().await);
    let question = [ChatMessage::user("What is the answer?")];

    let err = ChatClient::new(&config).unwrap().send(&question).await.unwrap_err();
    assert!(matches!(err, ChatError::Status { status: 401, .. }));

    let config = with_credentials(config);
    let reply = ChatClient::new(&config).unwrap().send(&question).await.unwrap();
    assert_eq!(reply.content, "The answer is 42.");
    assert_eq!(reply.annotations.len(), 3);
}
