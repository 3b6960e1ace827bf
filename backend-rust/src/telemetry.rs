//! # telemetry
//!
//! Forwards resolved positions to renderers (floor-plan views, dashboards).
//!
//! [`TelemetryHub`] is a [`PositionSink`]: it keeps the latest frame and a
//! trailing path of recent positions, and fans every frame out as JSON over a
//! broadcast channel. [`router`] exposes it over HTTP:
//!
//! - `GET /health`: liveness
//! - `GET /scene`: anchors, room size, background image path
//! - `GET /position`: latest frame (204 before the first fix)
//! - `GET /ws`: WebSocket stream of frames

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};
use uwb_types::{AnchorPosition, ResolvedPosition};

use crate::config::RoomConfig;
use crate::consumer::{PositionSink, PositionUpdate};

const FRAME_CHANNEL_CAPACITY: usize = 64;

// ── Wire shapes ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SceneInfo {
    pub anchors: [AnchorPosition; 3],
    pub room_width_cm: f64,
    pub room_height_cm: f64,
    pub background_image: Option<PathBuf>,
}

impl SceneInfo {
    pub fn new(anchors: [AnchorPosition; 3], room: &RoomConfig) -> Self {
        Self {
            anchors,
            room_width_cm: room.width_cm,
            room_height_cm: room.height_cm,
            background_image: room.background_image.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub tag_id: String,
    pub x: f64,
    pub y: f64,
    pub rms_residual_cm: f64,
    /// dBm, A1..A3
    pub signal_strengths: [f64; 3],
    pub sample_seq: u64,
    /// Oldest first, includes this frame's position
    pub trail: Vec<ResolvedPosition>,
}

// ── Hub ───────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct HubState {
    latest: Option<PositionFrame>,
    trail: VecDeque<ResolvedPosition>,
}

pub struct TelemetryHub {
    scene: SceneInfo,
    path_history: usize,
    inner: Mutex<HubState>,
    frames: broadcast::Sender<String>,
}

impl TelemetryHub {
    pub fn new(scene: SceneInfo, path_history: usize) -> Arc<Self> {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Arc::new(Self {
            scene,
            path_history,
            inner: Mutex::new(HubState::default()),
            frames,
        })
    }

    pub fn scene(&self) -> &SceneInfo {
        &self.scene
    }

    pub fn latest(&self) -> Option<PositionFrame> {
        self.lock().latest.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.frames.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        // Poisoned lock: keep serving the last state
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PositionSink for TelemetryHub {
    fn publish(&self, update: &PositionUpdate) {
        let frame = {
            let mut inner = self.lock();
            if self.path_history > 0 {
                inner.trail.push_back(update.position);
                while inner.trail.len() > self.path_history {
                    inner.trail.pop_front();
                }
            }
            let frame = PositionFrame {
                kind: "position",
                tag_id: update.tag_id.clone(),
                x: update.position.x,
                y: update.position.y,
                rms_residual_cm: update.rms_residual_cm,
                signal_strengths: update.signal_strengths,
                sample_seq: update.sample_seq,
                trail: inner.trail.iter().copied().collect(),
            };
            inner.latest = Some(frame.clone());
            frame
        };

        match serde_json::to_string(&frame) {
            // No subscribers is fine
            Ok(json) => {
                let _ = self.frames.send(json);
            }
            Err(e) => warn!("Telemetry: serialize failed: {e}"),
        }
    }
}

// ── HTTP ──────────────────────────────────────────────────────────────────────

pub fn router(hub: Arc<TelemetryHub>) -> Router {
    Router::new()
        .route("/health", get(|| async { "uwb-tracker ok" }))
        .route("/scene", get(scene))
        .route("/position", get(position))
        .route("/ws", get(ws_handler))
        .with_state(hub)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

/// Serve [`router`] on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    hub: Arc<TelemetryHub>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("🖥  Telemetry at http://{addr} (ws://{addr}/ws)");
    }
    axum::serve(listener, router(hub))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn scene(State(hub): State<Arc<TelemetryHub>>) -> Json<SceneInfo> {
    Json(hub.scene().clone())
}

async fn position(State(hub): State<Arc<TelemetryHub>>) -> Response {
    match hub.latest() {
        Some(frame) => Json(frame).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<TelemetryHub>>) -> Response {
    ws.on_upgrade(move |socket| stream_frames(socket, hub))
}

async fn stream_frames(mut socket: WebSocket, hub: Arc<TelemetryHub>) {
    let mut frames = hub.subscribe();

    // Current position immediately on connect
    if let Some(frame) = hub.latest() {
        if let Ok(json) = serde_json::to_string(&frame) {
            if socket.send(Message::Text(json)).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(json) => {
                    if socket.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Telemetry client lagged, skipped {n} frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
