use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::admin::AdminState;
use crate::datasource::SourceState;
use crate::reload::{ReloadError, ReloadPhase, ReloadStats, TriggerSource};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub bound: bool,
    pub generation: Option<u64>,
    /// Unix seconds at which the current generation was installed.
    pub installed_at: Option<u64>,
    pub used_fallback: Option<bool>,
    pub phase: ReloadPhase,
    pub reloads: ReloadStats,
    pub topics: Vec<String>,
}

#[derive(Serialize)]
pub struct SourceStatus {
    pub key: String,
    pub kind: String,
    pub state: SourceState,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let active = state.controller.gateway().current();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        bound: active.is_some(),
        generation: active.as_ref().map(|a| a.generation()),
        installed_at: active.as_ref().map(|a| a.installed_at_unix()),
        used_fallback: active.as_ref().map(|a| a.used_fallback()),
        phase: state.controller.phase(),
        reloads: state.controller.stats(),
        topics: state.controller.builder().pubsub().topics(),
    })
}

pub async fn get_sources(State(state): State<AdminState>) -> Json<Vec<SourceStatus>> {
    let statuses = state
        .controller
        .gateway()
        .current()
        .map(|active| {
            active
                .sources()
                .values()
                .map(|s| SourceStatus {
                    key: s.key().to_string(),
                    kind: s.kind().to_string(),
                    state: s.state(),
                })
                .collect()
        })
        .unwrap_or_default();
    Json(statuses)
}

pub async fn post_reload(
    State(state): State<AdminState>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.reload.reload_now(TriggerSource::Admin).await {
        Ok(outcome) => (StatusCode::OK, Json(json!(outcome))),
        Err(e) => {
            let code = match *e {
                ReloadError::Closed => StatusCode::SERVICE_UNAVAILABLE,
                ReloadError::Build(_) | ReloadError::Connect(_) => StatusCode::UNPROCESSABLE_ENTITY,
            };
            (code, Json(json!({ "error": e.to_string() })))
        }
    }
}

/// Push `message` to the subscribers of a topic the served schema declares.
pub async fn post_publish(
    State(state): State<AdminState>,
    Path(topic): Path<String>,
    Json(message): Json<Value>,
) -> (StatusCode, Json<Value>) {
    match state.controller.builder().pubsub().publish(&topic, message) {
        Some(receivers) => {
            tracing::debug!(topic = %topic, receivers, "Published to topic");
            (StatusCode::OK, Json(json!({ "topic": topic, "receivers": receivers })))
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown topic '{}'", topic) })),
        ),
    }
}
