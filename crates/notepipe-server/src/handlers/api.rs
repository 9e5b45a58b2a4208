//! Health and metrics endpoints.

use axum::{extract::State, response::IntoResponse, Json};
use axum::http::StatusCode;
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

/// Health check endpoint for container orchestration.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server is healthy")
    ),
    tag = "Health"
)]
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MetricSeries {
    pub name: String,
    pub value: serde_json::Value,
}

/// Snapshot of a fixed, well-known set of counters for operational
/// visibility. `MetricsCollector` is keyed by caller-chosen name/tag
/// pairs and has no enumeration API, so this endpoint reports the series
/// the workers are known to publish.
#[utoipa::path(
    get,
    path = "/api/metrics",
    responses(
        (status = 200, description = "Known metric series", body = Vec<MetricSeries>)
    ),
    tag = "Metrics"
)]
pub async fn metrics_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    let tags = vec![];
    let series = vec![
        MetricSeries {
            name: "jobs_processed".into(),
            value: serde_json::json!(state.metrics.counter_value("jobs_processed", &tags)),
        },
        MetricSeries {
            name: "jobs_failed".into(),
            value: serde_json::json!(state.metrics.counter_value("jobs_failed", &tags)),
        },
        MetricSeries {
            name: "job_latency_ms".into(),
            value: serde_json::json!(state
                .metrics
                .histogram_summary("job_latency_ms", &tags)
                .map(|s| s.mean())),
        },
    ];
    Json(series)
}
