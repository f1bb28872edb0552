use axum::{extract::State, Json};

use super::AppState;
use crate::models::Snapshot;

/// Get the most recently published anomaly snapshot
///
/// Returns an empty snapshot before the first detection cycle has run.
#[utoipa::path(
    get,
    path = "/api/alerts",
    responses(
        (status = 200, description = "Latest anomaly snapshot", body = Snapshot)
    ),
    tag = "alerts"
)]
pub async fn get_alerts(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.engine.latest_snapshot().await)
}
