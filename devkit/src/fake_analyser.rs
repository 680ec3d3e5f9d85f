/*!
Faux analyser HTTP

Serveur axum local (port éphémère) qui joue le rôle de l'analyser :
- `GET  /api/actuator/health` : 200, ou 503 pendant les N premiers appels
- `POST /api/device`          : 201 `{"deviceId": n}` avec n = 101, 102...
- `POST /api/sensor`          : enregistre la lecture
*/

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const FIRST_ASSIGNED_ID: u64 = 101;

struct AnalyserState {
    next_id: AtomicU64,
    health_failures: AtomicUsize,
    health_calls: AtomicUsize,
    rejected_devices: Mutex<HashSet<String>>,
    registrations: Mutex<Vec<Value>>,
    readings: Mutex<Vec<Value>>,
}

pub struct FakeAnalyser {
    addr: SocketAddr,
    state: Arc<AnalyserState>,
    handle: JoinHandle<()>,
}

impl FakeAnalyser {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(AnalyserState {
            next_id: AtomicU64::new(FIRST_ASSIGNED_ID),
            health_failures: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
            rejected_devices: Mutex::new(HashSet::new()),
            registrations: Mutex::new(Vec::new()),
            readings: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/api/actuator/health", get(health))
            .route("/api/device", post(register))
            .route("/api/sensor", post(receive_reading))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("[fake-analyser] server stopped: {e}");
            }
        });
        tracing::debug!("[fake-analyser] listening on {addr}");

        Ok(Self { addr, state, handle })
    }

    /// URL to configure as `targetUrl`.
    pub fn target_url(&self) -> String {
        format!("http://{}/api/sensor", self.addr)
    }

    pub fn fail_health_first(&self, count: usize) {
        self.state.health_failures.store(count, Ordering::SeqCst);
    }

    /// Registrations with this `deviceName` get a 500.
    pub fn reject_device(&self, device_name: &str) {
        self.state.rejected_devices.lock().insert(device_name.to_string());
    }

    pub fn health_calls(&self) -> usize {
        self.state.health_calls.load(Ordering::SeqCst)
    }

    pub fn registrations(&self) -> Vec<Value> {
        self.state.registrations.lock().clone()
    }

    pub fn readings(&self) -> Vec<Value> {
        self.state.readings.lock().clone()
    }

    pub fn readings_for(&self, target_id: u64) -> Vec<Value> {
        self.readings()
            .into_iter()
            .filter(|r| r["deviceId"].as_u64() == Some(target_id))
            .collect()
    }
}

impl Drop for FakeAnalyser {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn health(State(state): State<Arc<AnalyserState>>) -> StatusCode {
    state.health_calls.fetch_add(1, Ordering::SeqCst);
    let failing = state
        .health_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn register(
    State(state): State<Arc<AnalyserState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.registrations.lock().push(body.clone());

    let name = body["deviceName"].as_str().unwrap_or_default();
    if state.rejected_devices.lock().contains(name) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "rejected" })));
    }
    let id = state.next_id.fetch_add(1, Ordering::SeqCst);
    (StatusCode::CREATED, Json(json!({ "deviceId": id })))
}

async fn receive_reading(
    State(state): State<Arc<AnalyserState>>,
    Json(body): Json<Value>,
) -> StatusCode {
    state.readings.lock().push(body);
    StatusCode::OK
}
