//! HTTP read accessors and the WebSocket push endpoint.
//!
//! These are thin: they only read state the detection engine already holds.

pub mod alerts;
pub mod vehicles;
pub mod ws;

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::detect::DetectionEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DetectionEngine>,
}

pub fn router(engine: Arc<DetectionEngine>) -> Router {
    let state = AppState { engine };
    Router::new()
        .route("/alerts", get(alerts::get_alerts))
        .route("/vehicles", get(vehicles::list_vehicles))
        .route("/stats", get(vehicles::get_route_stats))
        .route("/ws", get(ws::ws_alerts))
        .with_state(state)
}
