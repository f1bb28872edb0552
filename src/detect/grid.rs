//! Spatial occupancy grid: per-cell visit counts smoothed over time, and
//! coverage-gap detection on the smoothed densities.

use std::collections::HashMap;
use uuid::Uuid;

use crate::geo::{self, CellKey};
use crate::models::{Alert, AlertDetails, AlertKind, Severity, Solution};

use super::diversion::DiversionRecommender;

/// One grid cell's raw and smoothed visit counts.
///
/// `count` accumulates between smoothing ticks and is reset to zero at every
/// tick; `ewma` is only ever updated at tick boundaries.
#[derive(Debug, Clone, Default)]
pub struct GridCell {
    pub count: u32,
    pub ewma: f64,
}

/// Fixed-size geographic cells accumulating per-tick visit counts.
#[derive(Debug)]
pub struct OccupancyGrid {
    cell_size_deg: f64,
    cells: HashMap<CellKey, GridCell>,
}

impl OccupancyGrid {
    pub fn new(cell_size_deg: f64) -> Self {
        Self {
            cell_size_deg,
            cells: HashMap::new(),
        }
    }

    /// Count one visit at the given position.
    pub fn record(&mut self, lat: f64, lng: f64) {
        if !lat.is_finite() || !lng.is_finite() {
            return;
        }
        let key = geo::cell_index(lat, lng, self.cell_size_deg);
        self.cells.entry(key).or_default().count += 1;
    }

    /// Smoothing tick: fold each cell's raw count into its EWMA and reset
    /// the count.
    pub fn advance_tick(&mut self, alpha: f64) {
        for cell in self.cells.values_mut() {
            cell.ewma = alpha * cell.count as f64 + (1.0 - alpha) * cell.ewma;
            cell.count = 0;
        }
    }

    /// Point-in-time view of smoothed densities per cell.
    pub fn density_snapshot(&self) -> HashMap<CellKey, f64> {
        self.cells
            .iter()
            .map(|(key, cell)| (*key, cell.ewma))
            .collect()
    }

    pub fn cell_size_deg(&self) -> f64 {
        self.cell_size_deg
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Emit a `coverage_gap` alert for every low-density cell directly adjacent
/// to a busy cell.
///
/// Cells are visited in key order so alert output is deterministic.
pub fn detect(
    densities: &HashMap<CellKey, f64>,
    cell_size_deg: f64,
    low_threshold: f64,
    high_threshold: f64,
    recommender: &DiversionRecommender,
) -> Vec<Alert> {
    let mut keys: Vec<&CellKey> = densities.keys().collect();
    keys.sort();

    let mut alerts = Vec::new();

    for key in keys {
        let ewma = densities[key];
        if ewma >= low_threshold {
            continue;
        }
        let has_busy_neighbor = geo::neighbors(*key)
            .iter()
            .any(|n| densities.get(n).is_some_and(|d| *d >= high_threshold));
        if !has_busy_neighbor {
            continue;
        }

        let (center_lat, center_lng) = geo::cell_center(*key, cell_size_deg);
        let solution = recommender
            .find_candidate(center_lat, center_lng, None)
            .map(|candidate| Solution {
                action: "Minor Reroute".to_string(),
                suggestion: format!(
                    "Order a minor reroute for bus {} (Route {}) to pass through the low-coverage zone.",
                    candidate.vehicle_id, candidate.route_id
                ),
                target_vehicle_id: candidate.vehicle_id,
            });

        alerts.push(Alert {
            id: Uuid::new_v4().to_string(),
            kind: AlertKind::CoverageGap,
            severity: Severity::Medium,
            message: "Low service density next to a busy area".to_string(),
            vehicle_id: None,
            route_id: None,
            cell_key: Some(format!("{}|{}", key.0, key.1)),
            details: AlertDetails::Coverage {
                ewma: (ewma * 100.0).round() / 100.0,
            },
            solution,
        });
    }

    alerts
}
