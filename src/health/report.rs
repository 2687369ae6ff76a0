//! Health report built from the bound configuration.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::datasource::SourceState;
use crate::http::{AppState, ServingGateway};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub generation: Option<u64>,
    pub data_sources: BTreeMap<String, SourceState>,
}

impl HealthReport {
    pub fn from_gateway(gateway: &ServingGateway) -> Self {
        let Some(active) = gateway.current() else {
            return Self {
                status: HealthStatus::Unavailable,
                generation: None,
                data_sources: BTreeMap::new(),
            };
        };

        let data_sources = active.source_states();
        let status = if data_sources.values().all(|s| *s == SourceState::Connected) {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            generation: Some(active.generation()),
            data_sources,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.status {
            HealthStatus::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
        }
    }
}

pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let start = Instant::now();
    let report = HealthReport::from_gateway(&state.gateway);
    let code = report.status_code();
    if report.status != HealthStatus::Ok {
        tracing::debug!(status = ?report.status, generation = ?report.generation, "Health check not ok");
    }
    metrics::record_request("health", code.as_u16(), start);
    (code, Json(report))
}
