//! Prometheus scrape endpoint.

use axum::{extract::State, http::header, response::IntoResponse};

use timetable_metrics::CONTENT_TYPE;

use crate::state::AppState;

/// Returns every registered metric in the Prometheus text exposition format.
///
/// When metrics are disabled the registry is empty and the body is too; the
/// endpoint still answers 200 so scrapers see a healthy target.
pub async fn prometheus_metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, CONTENT_TYPE)], state.metrics.render())
}
