use axum::{extract::State, Json};
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;

use super::AppState;
use crate::models::VehicleState;

/// One tracked vehicle as exposed by the read API
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrackedVehicle {
    pub vehicle_id: String,
    pub route_id: String,
    pub lat: f64,
    pub lng: f64,
    pub speed_kmh: f64,
    /// Delay in minutes (positive = late, negative = early)
    pub delay_minutes: i32,
    /// Timestamp of the last accepted update (RFC 3339)
    pub last_update: String,
}

/// Response containing all currently tracked vehicles
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VehicleListResponse {
    pub vehicles: Vec<TrackedVehicle>,
    pub total_count: usize,
    /// Timestamp when this list was generated (RFC 3339)
    pub timestamp: String,
}

/// Aggregate statistics for one route
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RouteStats {
    pub vehicle_count: usize,
    /// Average delay in minutes, rounded to two decimals
    pub avg_delay_minutes: f64,
    /// Average speed in km/h, rounded to two decimals
    pub avg_speed_kmh: f64,
}

/// Response containing per-route aggregates
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RouteStatsResponse {
    pub routes: HashMap<String, RouteStats>,
    pub timestamp: String,
}

/// List all currently tracked vehicles
#[utoipa::path(
    get,
    path = "/api/vehicles",
    responses(
        (status = 200, description = "All currently tracked vehicles", body = VehicleListResponse)
    ),
    tag = "vehicles"
)]
pub async fn list_vehicles(State(state): State<AppState>) -> Json<VehicleListResponse> {
    let mut snapshot = state.engine.vehicle_snapshot().await;
    snapshot.sort_by(|a, b| a.0.cmp(&b.0));

    let vehicles: Vec<TrackedVehicle> = snapshot
        .into_iter()
        .map(|(vehicle_id, state)| TrackedVehicle {
            vehicle_id,
            route_id: state.route_id,
            lat: state.lat,
            lng: state.lng,
            speed_kmh: state.speed_kmh,
            delay_minutes: state.delay_minutes,
            last_update: state.last_update.to_rfc3339(),
        })
        .collect();

    Json(VehicleListResponse {
        total_count: vehicles.len(),
        vehicles,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Per-route fleet aggregates (vehicle count, average delay and speed)
#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Per-route aggregates", body = RouteStatsResponse)
    ),
    tag = "vehicles"
)]
pub async fn get_route_stats(State(state): State<AppState>) -> Json<RouteStatsResponse> {
    let snapshot = state.engine.vehicle_snapshot().await;

    Json(RouteStatsResponse {
        routes: aggregate_routes(&snapshot),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

fn aggregate_routes(vehicles: &[(String, VehicleState)]) -> HashMap<String, RouteStats> {
    struct Accumulator {
        count: usize,
        sum_delay: f64,
        sum_speed: f64,
    }

    let mut by_route: HashMap<String, Accumulator> = HashMap::new();
    for (_, state) in vehicles {
        let acc = by_route
            .entry(state.route_id.clone())
            .or_insert(Accumulator {
                count: 0,
                sum_delay: 0.0,
                sum_speed: 0.0,
            });
        acc.count += 1;
        acc.sum_delay += state.delay_minutes as f64;
        acc.sum_speed += state.speed_kmh;
    }

    by_route
        .into_iter()
        .map(|(route_id, acc)| {
            let round2 = |x: f64| (x * 100.0).round() / 100.0;
            (
                route_id,
                RouteStats {
                    vehicle_count: acc.count,
                    avg_delay_minutes: round2(acc.sum_delay / acc.count as f64),
                    avg_speed_kmh: round2(acc.sum_speed / acc.count as f64),
                },
            )
        })
        .collect()
}
