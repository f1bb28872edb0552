//! Per-route arrival-rate windows smoothed into a headway estimate.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{Alert, AlertDetails, AlertKind, Severity, Solution, VehicleState};

use super::diversion::DiversionRecommender;

/// An estimated headway above `target × HEADWAY_TRIGGER_FACTOR` raises an
/// alert.
const HEADWAY_TRIGGER_FACTOR: f64 = 1.5;

#[derive(Debug, Clone)]
struct RouteWindow {
    /// Unix minute of the bucket currently being counted.
    window_start: i64,
    /// Updates seen in the current bucket.
    count: u32,
    /// Smoothed updates-per-minute rate.
    ewma_count: f64,
}

/// Per-route update-rate estimation over one-minute buckets.
///
/// The bucket resets lazily: when an update arrives in a later wall-clock
/// minute than `window_start`, the count restarts for the new minute. The
/// EWMA is only touched at smoothing ticks.
#[derive(Debug, Default)]
pub struct HeadwayEstimator {
    routes: HashMap<String, RouteWindow>,
}

impl HeadwayEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one update for the route in the minute bucket of `at`.
    pub fn record(&mut self, route_id: &str, at: DateTime<Utc>) {
        let minute = at.timestamp().div_euclid(60);
        let window = self
            .routes
            .entry(route_id.to_string())
            .or_insert(RouteWindow {
                window_start: minute,
                count: 0,
                ewma_count: 0.0,
            });
        if window.window_start != minute {
            window.window_start = minute;
            window.count = 0;
        }
        window.count += 1;
    }

    /// Smoothing tick: fold each route's current bucket count into its EWMA.
    pub fn advance_tick(&mut self, alpha: f64) {
        for window in self.routes.values_mut() {
            window.ewma_count = alpha * window.count as f64 + (1.0 - alpha) * window.ewma_count;
        }
    }

    /// Smoothed updates-per-minute per route, ordered by route id for
    /// deterministic alert output.
    pub fn rate_snapshot(&self) -> Vec<(String, f64)> {
        let mut rates: Vec<(String, f64)> = self
            .routes
            .iter()
            .map(|(route, window)| (route.clone(), window.ewma_count))
            .collect();
        rates.sort_by(|a, b| a.0.cmp(&b.0));
        rates
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Emit a `headway_risk` alert for every route whose estimated headway
/// exceeds 1.5× the target.
///
/// Routes with a zero smoothed rate are skipped: an infinite estimate is not
/// actionable without a prior baseline.
pub fn detect(
    rates: &[(String, f64)],
    vehicles: &[(String, VehicleState)],
    recommender: &DiversionRecommender,
    target_headway_min: f64,
) -> Vec<Alert> {
    let mut alerts = Vec::new();

    for (route_id, ewma_count) in rates {
        if *ewma_count <= 0.0 {
            continue;
        }
        let estimated_headway = 60.0 / ewma_count;
        if estimated_headway <= target_headway_min * HEADWAY_TRIGGER_FACTOR {
            continue;
        }

        // Anchor the search at the most-delayed vehicle currently tracked on
        // this route (ties resolve to the smallest vehicle id). Early-running
        // vehicles are not anchors.
        let anchor = vehicles
            .iter()
            .filter(|(_, state)| state.route_id == *route_id && state.delay_minutes >= 0)
            .min_by(|(id_a, a), (id_b, b)| {
                b.delay_minutes
                    .cmp(&a.delay_minutes)
                    .then_with(|| id_a.cmp(id_b))
            });

        let solution = anchor.and_then(|(_, state)| {
            recommender
                .find_candidate(state.lat, state.lng, Some(route_id.as_str()))
                .map(|candidate| Solution {
                    action: "Fill Service Gap".to_string(),
                    suggestion: format!(
                        "Divert bus {} (Route {}) to cover upcoming stops on Route {} and reduce wait times.",
                        candidate.vehicle_id, candidate.route_id, route_id
                    ),
                    target_vehicle_id: candidate.vehicle_id,
                })
        });

        alerts.push(Alert {
            id: Uuid::new_v4().to_string(),
            kind: AlertKind::HeadwayRisk,
            severity: Severity::High,
            message: format!("Severe headway gap on route {}", route_id),
            vehicle_id: None,
            route_id: Some(route_id.clone()),
            cell_key: None,
            details: AlertDetails::Headway {
                estimated_headway_min: (estimated_headway * 10.0).round() / 10.0,
                target_min: target_headway_min,
            },
            solution,
        });
    }

    alerts
}
