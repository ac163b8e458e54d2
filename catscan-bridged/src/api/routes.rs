use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Local;
use serde_json::{Map, Value};
use shared::protocol::FIELD_DATA;
use shared::types::{RecordStatus, ScanRecord};
use crate::config::IngestionConfig;
use crate::push_bridge::PushBridge;

#[derive(Clone)]
pub struct AppState {
    pub bridge: PushBridge,
    pub path: String,
    pub mirror_status_code: bool,
}

impl AppState {
    pub fn new(config: &IngestionConfig, bridge: PushBridge) -> Self {
        Self {
            bridge,
            path: config.route_path(),
            mirror_status_code: config.mirror_status_code,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let path = state.path.clone();
    Router::new()
        .route(&path, get(health).post(ingest))
        .with_state(state)
}

/// Liveness probe, no side effects
async fn health() -> Json<ScanRecord> {
    Json(ScanRecord::heartbeat(Local::now()))
}

/// Accept one scan record. Records carrying `qrdata` are pushed to the
/// observer; the body's `code` field is the authoritative outcome.
async fn ingest(
    State(state): State<AppState>,
    Json(payload): Json<Map<String, Value>>,
) -> (StatusCode, Json<ScanRecord>) {
    let record = ScanRecord::normalize(payload, Local::now());

    match record.status() {
        Some(RecordStatus::Received) => {
            if let Some(qrdata) = record.qrdata() {
                tracing::info!("Received qrdata: {}", qrdata);
            }
            state.bridge.notify(record.clone());
        }
        _ => {
            let data = record.get(FIELD_DATA).cloned().unwrap_or_default();
            tracing::error!("Rejected payload without qrdata: {}", data);
        }
    }

    let status = if state.mirror_status_code {
        record
            .code()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK)
    } else {
        StatusCode::OK
    };

    (status, Json(record))
}
