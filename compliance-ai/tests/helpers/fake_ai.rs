//! In-process stand-in for the external AI service
//!
//! Serves `POST /upload`, `GET /status/:id`, `WS /stream/:id` and `WS /compare` on an
//! ephemeral port, replaying whatever the current [`FakeAiScript`] says.

use axum::{
    body::Bytes,
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// How a scripted socket ends after its frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Send a normal close frame (1000)
    Close,
    /// Keep the socket open until the client closes it
    Hold,
}

#[derive(Debug, Clone)]
pub struct FakeAiScript {
    pub job_id: String,
    pub upload_status: u16,
    pub upload_extraction_status: String,
    /// Raw text frames for `/stream/:id`
    pub stream_frames: Vec<String>,
    pub stream_end: StreamEnd,
    /// Body of `GET /status/:id`
    pub status_response: Value,
    /// Raw text frames for `/compare`
    pub compare_frames: Vec<String>,
    pub compare_end: StreamEnd,
}

impl Default for FakeAiScript {
    fn default() -> Self {
        Self {
            job_id: "abc".to_string(),
            upload_status: 200,
            upload_extraction_status: "pending".to_string(),
            stream_frames: Vec::new(),
            stream_end: StreamEnd::Hold,
            status_response: json!({"status": "processing"}),
            compare_frames: Vec::new(),
            compare_end: StreamEnd::Hold,
        }
    }
}

/// Serialize a JSON frame
pub fn frame(value: Value) -> String {
    value.to_string()
}

#[derive(Default)]
struct FakeState {
    script: Mutex<FakeAiScript>,
    uploads: AtomicUsize,
    status_checks: Mutex<Vec<String>>,
    streams_opened: AtomicUsize,
    compare_queries: Mutex<Vec<HashMap<String, String>>>,
}

pub struct FakeAi {
    pub base_url: String,
    pub ws_url: String,
    state: Arc<FakeState>,
}

impl FakeAi {
    pub async fn start(script: FakeAiScript) -> Self {
        let state = Arc::new(FakeState {
            script: Mutex::new(script),
            ..Default::default()
        });

        let app = Router::new()
            .route("/upload", post(upload))
            .route("/status/:job_id", get(status))
            .route("/stream/:job_id", get(stream))
            .route("/compare", get(compare))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            ws_url: format!("ws://{}", addr),
            state,
        }
    }

    /// Change the script for subsequent requests
    pub fn update(&self, change: impl FnOnce(&mut FakeAiScript)) {
        change(&mut self.state.script.lock().unwrap());
    }

    pub fn uploads(&self) -> usize {
        self.state.uploads.load(Ordering::SeqCst)
    }

    pub fn status_checks(&self) -> usize {
        self.state.status_checks.lock().unwrap().len()
    }

    /// Job IDs as the status endpoint decoded them from the path
    pub fn status_job_ids(&self) -> Vec<String> {
        self.state.status_checks.lock().unwrap().clone()
    }

    pub fn streams_opened(&self) -> usize {
        self.state.streams_opened.load(Ordering::SeqCst)
    }

    pub fn compare_queries(&self) -> Vec<HashMap<String, String>> {
        self.state.compare_queries.lock().unwrap().clone()
    }
}

async fn upload(State(state): State<Arc<FakeState>>, _body: Bytes) -> Response {
    state.uploads.fetch_add(1, Ordering::SeqCst);
    let script = state.script.lock().unwrap().clone();

    let status = StatusCode::from_u16(script.upload_status).unwrap();
    if !status.is_success() {
        return (status, "rejected by fake AI").into_response();
    }

    Json(json!({
        "jobId": script.job_id,
        "status": "uploaded",
        "controlExtractionStatus": script.upload_extraction_status,
    }))
    .into_response()
}

async fn status(State(state): State<Arc<FakeState>>, Path(job_id): Path<String>) -> Json<Value> {
    state.status_checks.lock().unwrap().push(job_id);
    Json(state.script.lock().unwrap().status_response.clone())
}

async fn stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<FakeState>>,
    Path(_job_id): Path<String>,
) -> Response {
    state.streams_opened.fetch_add(1, Ordering::SeqCst);
    let script = state.script.lock().unwrap().clone();
    ws.on_upgrade(move |socket| play(socket, script.stream_frames, script.stream_end))
}

async fn compare(
    ws: WebSocketUpgrade,
    State(state): State<Arc<FakeState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.compare_queries.lock().unwrap().push(params);
    let script = state.script.lock().unwrap().clone();
    ws.on_upgrade(move |socket| play(socket, script.compare_frames, script.compare_end))
}

async fn play(mut socket: WebSocket, frames: Vec<String>, end: StreamEnd) {
    for text in frames {
        if socket.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    match end {
        StreamEnd::Close => {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: 1000,
                    reason: "job stream finished".into(),
                })))
                .await;
        }
        StreamEnd::Hold => {
            while let Some(Ok(message)) = socket.recv().await {
                if matches!(message, Message::Close(_)) {
                    break;
                }
            }
        }
    }
}
