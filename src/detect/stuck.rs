//! Continuous low-speed tracking and stuck-vehicle alerting.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{Alert, AlertDetails, AlertKind, Severity, Solution, VehicleState};

use super::diversion::DiversionRecommender;

/// Speeds at or below this (feed unit, km/h after normalization) count as
/// stopped.
const STOPPED_SPEED: f64 = 1.0;

/// Tracks when each vehicle's current low-speed streak began.
///
/// Invariant: a vehicle has an entry if and only if its most recent observed
/// speed was at or below the stopped threshold.
#[derive(Debug, Default)]
pub struct StuckMonitor {
    since: HashMap<String, DateTime<Utc>>,
}

impl StuckMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one speed observation into the streak map.
    pub fn observe(&mut self, vehicle_id: &str, speed_kmh: f64, at: DateTime<Utc>) {
        if speed_kmh <= STOPPED_SPEED {
            self.since.entry(vehicle_id.to_string()).or_insert(at);
        } else {
            self.since.remove(vehicle_id);
        }
    }

    /// Vehicles whose streak is at least `min_duration` old, ordered by
    /// vehicle id for deterministic alert output.
    pub fn overdue(&self, now: DateTime<Utc>, min_duration: Duration) -> Vec<(String, DateTime<Utc>)> {
        let mut result: Vec<(String, DateTime<Utc>)> = self
            .since
            .iter()
            .filter(|(_, since)| now.signed_duration_since(**since) >= min_duration)
            .map(|(id, since)| (id.clone(), *since))
            .collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Drop the streak record for an evicted vehicle.
    pub fn forget(&mut self, vehicle_id: &str) {
        self.since.remove(vehicle_id);
    }

    pub fn len(&self) -> usize {
        self.since.len()
    }

    pub fn is_empty(&self) -> bool {
        self.since.is_empty()
    }
}

/// Emit one `stuck_bus` alert per overdue vehicle.
///
/// An overdue vehicle re-alerts on every tick until a faster update clears
/// its record; there is deliberately no suppression window.
pub fn detect(
    overdue: &[(String, DateTime<Utc>)],
    vehicles: &[(String, VehicleState)],
    recommender: &DiversionRecommender,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for (vehicle_id, since) in overdue {
        let minutes =
            (now.signed_duration_since(*since).num_seconds() as f64 / 60.0).round() as i64;
        let state = vehicles
            .iter()
            .find(|(id, _)| id == vehicle_id)
            .map(|(_, state)| state);

        let route_id = state
            .map(|s| s.route_id.clone())
            .unwrap_or_else(|| "UNKNOWN".to_string());

        let solution = state.and_then(|s| {
            recommender
                .find_candidate(s.lat, s.lng, Some(s.route_id.as_str()))
                .map(|candidate| Solution {
                    action: "Divert & Reroute".to_string(),
                    suggestion: format!(
                        "Divert bus {} (Route {}) to bypass the incident area and continue service on Route {}.",
                        candidate.vehicle_id, candidate.route_id, s.route_id
                    ),
                    target_vehicle_id: candidate.vehicle_id,
                })
        });

        alerts.push(Alert {
            id: Uuid::new_v4().to_string(),
            kind: AlertKind::StuckBus,
            severity: Severity::High,
            message: format!(
                "Possible incident: {} stationary for > {} min",
                vehicle_id, minutes
            ),
            vehicle_id: Some(vehicle_id.clone()),
            route_id: None,
            cell_key: None,
            details: AlertDetails::Stuck { route_id, minutes },
            solution,
        });
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, 10, min, sec).unwrap()
    }

    #[test]
    fn streak_starts_at_first_stopped_observation() {
        let mut monitor = StuckMonitor::new();
        monitor.observe("V1", 0.0, at(0, 0));
        monitor.observe("V1", 1.0, at(1, 0));

        // since must stay anchored at the first stopped observation
        assert_eq!(monitor.overdue(at(5, 0), Duration::minutes(5)).len(), 1);
        assert_eq!(
            monitor.overdue(at(5, 0), Duration::minutes(5))[0].1,
            at(0, 0)
        );
    }

    #[test]
    fn streak_clears_the_moment_speed_exceeds_threshold() {
        let mut monitor = StuckMonitor::new();
        monitor.observe("V1", 0.5, at(0, 0));
        monitor.observe("V1", 1.1, at(1, 0));

        assert!(monitor.is_empty());
    }

    #[test]
    fn overdue_requires_the_full_duration() {
        let mut monitor = StuckMonitor::new();
        monitor.observe("V1", 0.0, at(0, 0));

        assert!(monitor.overdue(at(4, 59), Duration::minutes(5)).is_empty());
        assert_eq!(monitor.overdue(at(5, 0), Duration::minutes(5)).len(), 1);
    }

    #[test]
    fn detect_emits_high_severity_with_minutes() {
        let overdue = vec![("V1".to_string(), at(0, 0))];
        let vehicles = vec![(
            "V1".to_string(),
            VehicleState {
                lat: 28.61,
                lng: 77.20,
                route_id: "R1".to_string(),
                speed_kmh: 0.0,
                delay_minutes: 0,
                last_update: at(6, 0),
            },
        )];
        let recommender = DiversionRecommender::new(&vehicles, 2000.0);

        let alerts = detect(&overdue, &vehicles, &recommender, at(6, 0));

        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.kind, AlertKind::StuckBus);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.vehicle_id.as_deref(), Some("V1"));
        match &alert.details {
            AlertDetails::Stuck { route_id, minutes } => {
                assert_eq!(route_id, "R1");
                assert_eq!(*minutes, 6);
            }
            other => panic!("wrong details: {other:?}"),
        }
        // Only vehicle on the map shares the route, so no diversion target.
        assert!(alert.solution.is_none());
    }

    #[test]
    fn detect_attaches_a_cross_route_solution() {
        let overdue = vec![("V1".to_string(), at(0, 0))];
        let vehicles = vec![
            (
                "V1".to_string(),
                VehicleState {
                    lat: 28.6100,
                    lng: 77.2300,
                    route_id: "R1".to_string(),
                    speed_kmh: 0.0,
                    delay_minutes: 0,
                    last_update: at(6, 0),
                },
            ),
            (
                "V2".to_string(),
                VehicleState {
                    lat: 28.6145,
                    lng: 77.2300,
                    route_id: "R2".to_string(),
                    speed_kmh: 30.0,
                    delay_minutes: 0,
                    last_update: at(6, 0),
                },
            ),
        ];
        let recommender = DiversionRecommender::new(&vehicles, 2000.0);

        let alerts = detect(&overdue, &vehicles, &recommender, at(6, 0));

        let solution = alerts[0].solution.as_ref().expect("solution expected");
        assert_eq!(solution.target_vehicle_id, "V2");
        assert_eq!(solution.action, "Divert & Reroute");
    }
}
