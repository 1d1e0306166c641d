use axum::{Json, extract::State};
use courier_core::{broadcast::BroadcastStats, writer::WriterStats};
use serde::Serialize;
use serde_json::{Value, json};

use crate::infra::app_state::AppState;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub writer: WriterStats,
    pub broadcaster: BroadcastStats,
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        writer: state.writer.stats(),
        broadcaster: state.broadcaster.stats(),
    })
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
