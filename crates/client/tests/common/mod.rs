#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use sodalite_client::api::{SodaliteApiError, TaskService};
use sodalite_client::store::{StateStore, StoreSnapshot};
use sodalite_core::job::{FinalStatus, JobRequest, Outcome, Phase, PhaseObservation};
use sodalite_core::types::TaskId;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Scripted TaskService
// ---------------------------------------------------------------------------

/// How a scripted call fails.
#[derive(Debug, Clone, Copy)]
enum Failure {
    Status(u16),
    /// A 2xx response whose body is not JSON.
    Malformed,
}

#[derive(Default)]
struct Script {
    next_id: u32,
    create_failure: Option<u16>,
    phases: HashMap<TaskId, VecDeque<Result<PhaseObservation, Failure>>>,
    statuses: HashMap<TaskId, Result<FinalStatus, Failure>>,
    healthy: VecDeque<bool>,
    create_calls: usize,
    phase_calls: HashMap<TaskId, usize>,
    status_calls: HashMap<TaskId, usize>,
    health_calls: usize,
}

/// In-memory [`TaskService`] answering from per-task scripts.
///
/// Task ids are handed out as `J1`, `J2`, ... An exhausted phase script
/// keeps answering `processing` with no phase.
#[derive(Default)]
pub struct ScriptedService {
    script: Mutex<Script>,
    phase_gate: Mutex<Option<Arc<Notify>>>,
}

fn scripted_error(status: u16) -> SodaliteApiError {
    SodaliteApiError::Status {
        status,
        body: "scripted failure".to_string(),
    }
}

fn failure_error(failure: Failure) -> SodaliteApiError {
    match failure {
        Failure::Status(status) => scripted_error(status),
        Failure::Malformed => {
            let decode = serde_json::from_str::<Value>("<html>proxy hiccup</html>")
                .expect_err("html is not json");
            SodaliteApiError::Decode(decode)
        }
    }
}

impl ScriptedService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_phase(&self, task_id: &str, phase: Option<Phase>, outcome: Outcome) {
        self.script
            .lock()
            .unwrap()
            .phases
            .entry(task_id.to_string())
            .or_default()
            .push_back(Ok(PhaseObservation { phase, outcome }));
    }

    pub fn push_phase_error(&self, task_id: &str, status: u16) {
        self.script
            .lock()
            .unwrap()
            .phases
            .entry(task_id.to_string())
            .or_default()
            .push_back(Err(Failure::Status(status)));
    }

    /// Answer the next phase poll with an undecodable body.
    pub fn push_phase_malformed(&self, task_id: &str) {
        self.script
            .lock()
            .unwrap()
            .phases
            .entry(task_id.to_string())
            .or_default()
            .push_back(Err(Failure::Malformed));
    }

    pub fn set_status(&self, task_id: &str, status: FinalStatus) {
        self.script
            .lock()
            .unwrap()
            .statuses
            .insert(task_id.to_string(), Ok(status));
    }

    pub fn fail_status(&self, task_id: &str, status: u16) {
        self.script
            .lock()
            .unwrap()
            .statuses
            .insert(task_id.to_string(), Err(Failure::Status(status)));
    }

    /// Answer full status fetches with an undecodable body.
    pub fn malformed_status(&self, task_id: &str) {
        self.script
            .lock()
            .unwrap()
            .statuses
            .insert(task_id.to_string(), Err(Failure::Malformed));
    }

    pub fn fail_create(&self, status: u16) {
        self.script.lock().unwrap().create_failure = Some(status);
    }

    /// Queue health probe answers; once drained the service is healthy.
    pub fn push_health(&self, healthy: bool) {
        self.script.lock().unwrap().healthy.push_back(healthy);
    }

    /// Make every subsequent phase poll wait for a permit on the
    /// returned [`Notify`].
    pub fn gate_phase(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.phase_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn create_calls(&self) -> usize {
        self.script.lock().unwrap().create_calls
    }

    pub fn phase_calls(&self, task_id: &str) -> usize {
        let script = self.script.lock().unwrap();
        script.phase_calls.get(task_id).copied().unwrap_or(0)
    }

    pub fn status_calls(&self, task_id: &str) -> usize {
        let script = self.script.lock().unwrap();
        script.status_calls.get(task_id).copied().unwrap_or(0)
    }

    pub fn health_calls(&self) -> usize {
        self.script.lock().unwrap().health_calls
    }
}

#[async_trait]
impl TaskService for ScriptedService {
    async fn create_task(&self, _request: &JobRequest) -> Result<TaskId, SodaliteApiError> {
        let mut script = self.script.lock().unwrap();
        script.create_calls += 1;
        if let Some(status) = script.create_failure {
            return Err(scripted_error(status));
        }
        script.next_id += 1;
        Ok(format!("J{}", script.next_id))
    }

    async fn task_phase(&self, task_id: &str) -> Result<PhaseObservation, SodaliteApiError> {
        let answer = {
            let mut script = self.script.lock().unwrap();
            *script.phase_calls.entry(task_id.to_string()).or_default() += 1;
            script
                .phases
                .get_mut(task_id)
                .and_then(VecDeque::pop_front)
                .unwrap_or(Ok(PhaseObservation {
                    phase: None,
                    outcome: Outcome::Processing,
                }))
        };

        let gate = self.phase_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        answer.map_err(failure_error)
    }

    async fn task_status(&self, task_id: &str) -> Result<FinalStatus, SodaliteApiError> {
        let mut script = self.script.lock().unwrap();
        *script.status_calls.entry(task_id.to_string()).or_default() += 1;
        match script.statuses.get(task_id) {
            Some(Ok(status)) => Ok(status.clone()),
            Some(Err(failure)) => Err(failure_error(*failure)),
            None => Err(scripted_error(404)),
        }
    }

    async fn health(&self) -> Result<(), SodaliteApiError> {
        let mut script = self.script.lock().unwrap();
        script.health_calls += 1;
        if script.healthy.pop_front().unwrap_or(true) {
            Ok(())
        } else {
            Err(scripted_error(503))
        }
    }
}

pub fn completed(artifact: &str) -> FinalStatus {
    FinalStatus {
        outcome: Outcome::Completed,
        artifact_ref: Some(artifact.to_string()),
        error: None,
        file_size_mb: Some(4.2),
    }
}

pub fn failed(error: &str) -> FinalStatus {
    FinalStatus {
        outcome: Outcome::Failed,
        artifact_ref: None,
        error: Some(error.to_string()),
        file_size_mb: None,
    }
}

// ---------------------------------------------------------------------------
// Store helpers
// ---------------------------------------------------------------------------

/// Wait until a snapshot satisfies `predicate`, failing after `timeout`.
pub async fn wait_for_snapshot<F>(store: &StateStore, timeout: Duration, predicate: F) -> StoreSnapshot
where
    F: FnMut(&StoreSnapshot) -> bool,
{
    let mut rx = store.subscribe();
    let snapshot = tokio::time::timeout(timeout, rx.wait_for(predicate))
        .await
        .expect("store did not reach the expected state in time")
        .expect("store sender dropped");
    snapshot.clone()
}

/// Yield until `condition` holds, failing after a second.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Fake HTTP + WebSocket service
// ---------------------------------------------------------------------------

/// Task id whose phase endpoint answers 200 with an HTML body.
pub const GARBLED_TASK: &str = "garbled";

/// Phase sequence the fake server walks each task through.
const FAKE_PHASES: [(&str, &str); 3] = [
    ("downloading", "processing"),
    ("processing", "processing"),
    ("completed", "completed"),
];

#[derive(Default)]
struct FakeState {
    next_id: Mutex<u32>,
    polls: Mutex<HashMap<String, usize>>,
}

/// Run a fake service on an ephemeral port and return its address.
///
/// Routes live under `/sodalite`. `/ws/stats` sends a malformed frame,
/// a stats frame and a keep-alive, then stays open. `/ws/drop` sends a
/// keep-alive and closes.
pub async fn spawn_fake_service() -> SocketAddr {
    let state = Arc::new(FakeState::default());
    let app = Router::new()
        .route("/sodalite/health", get(health))
        .route("/sodalite/process", post(process))
        .route("/sodalite/task/{id}/phase", get(task_phase))
        .route("/sodalite/task/{id}", get(task_status))
        .route("/sodalite/ws/stats", get(ws_stats))
        .route("/sodalite/ws/drop", get(ws_drop))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake service");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake service");
    });
    addr
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "active_tasks": 0 }))
}

async fn process(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Json<Value> {
    assert!(body["url"].is_string());
    let mut next_id = state.next_id.lock().unwrap();
    *next_id += 1;
    Json(json!({ "task_id": format!("T{}", *next_id), "status": "processing" }))
}

async fn task_phase(State(state): State<Arc<FakeState>>, Path(id): Path<String>) -> Response {
    if id == GARBLED_TASK {
        return Html("<html>proxy hiccup</html>").into_response();
    }
    let mut polls = state.polls.lock().unwrap();
    let count = polls.entry(id.clone()).or_default();
    let (phase, status) = FAKE_PHASES[(*count).min(FAKE_PHASES.len() - 1)];
    *count += 1;
    Json(json!({ "task_id": id, "phase": phase, "status": status })).into_response()
}

async fn task_status(Path(id): Path<String>) -> Json<Value> {
    Json(json!({
        "task_id": id,
        "status": "completed",
        "download_url": format!("/sodalite/download/{id}/clip.mp4"),
        "error": null,
        "phase": "completed",
        "file_size_mb": 1.5,
    }))
}

async fn ws_stats(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let frames = [
            "not json".to_string(),
            json!({
                "type": "stats",
                "heartbeats": 7,
                "connected_clients": 2,
                "total_conversions": 40,
                "total_bandwidth_mb": 512.5,
            })
            .to_string(),
            json!({ "type": "ping" }).to_string(),
        ];
        for frame in frames {
            if socket.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }
        while let Some(Ok(message)) = socket.recv().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    })
}

async fn ws_drop(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let ping = json!({ "type": "ping" }).to_string();
        let _ = socket.send(Message::Text(ping.into())).await;
        let _ = socket.send(Message::Close(None)).await;
    })
}
