use chrono::{DateTime, Utc};

/// One normalized telemetry record from the ingestion feed.
///
/// Consumed exactly once per update: the poller hands it to the detection
/// engine, which fans it out to the tracker, stuck monitor, grid and headway
/// estimator.
#[derive(Debug, Clone)]
pub struct PositionUpdate {
    pub vehicle_id: String,
    pub route_id: String,
    pub lat: f64,
    pub lng: f64,
    /// Speed in km/h as normalized by the ingestion layer.
    pub speed_kmh: f64,
    /// Delay in minutes (positive = late, negative = early).
    pub delay_minutes: i32,
    pub timestamp: DateTime<Utc>,
}

/// Latest known state of a single vehicle, owned by the tracker.
///
/// Overwritten on every accepted update for that vehicle.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub lat: f64,
    pub lng: f64,
    pub route_id: String,
    pub speed_kmh: f64,
    pub delay_minutes: i32,
    pub last_update: DateTime<Utc>,
}
