//! Latest-known vehicle state, keyed by vehicle id.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::{PositionUpdate, VehicleState};

/// In-memory map of the latest known state per vehicle.
///
/// Entries are overwritten on every accepted update and, unless the engine's
/// stale-vehicle eviction is enabled, never removed.
#[derive(Debug, Default)]
pub struct VehicleTracker {
    states: HashMap<String, VehicleState>,
}

impl VehicleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an update, overwriting any previous state for the vehicle.
    ///
    /// Updates with an empty vehicle id or a non-finite coordinate are
    /// dropped silently; the upstream feed occasionally emits partial
    /// records and they are not errors. Returns whether the update was kept.
    pub fn record(&mut self, update: &PositionUpdate) -> bool {
        if update.vehicle_id.is_empty() || !update.lat.is_finite() || !update.lng.is_finite() {
            return false;
        }

        self.states.insert(
            update.vehicle_id.clone(),
            VehicleState {
                lat: update.lat,
                lng: update.lng,
                route_id: update.route_id.clone(),
                speed_kmh: update.speed_kmh,
                delay_minutes: update.delay_minutes,
                last_update: update.timestamp,
            },
        );
        true
    }

    /// Latest state for a vehicle, if it has ever reported.
    pub fn state_of(&self, vehicle_id: &str) -> Option<&VehicleState> {
        self.states.get(vehicle_id)
    }

    /// Owned point-in-time view of all tracked vehicles.
    ///
    /// Detectors iterate this snapshot (restartable, finite) instead of
    /// holding the tracker lock across a whole detection pass.
    pub fn snapshot(&self) -> Vec<(String, VehicleState)> {
        self.states
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect()
    }

    /// Drop vehicles whose last update is older than `cutoff`.
    ///
    /// Returns the ids that were evicted so dependent per-vehicle records
    /// (stuck tracking) can be cleared alongside.
    pub fn evict_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<String> {
        let stale: Vec<String> = self
            .states
            .iter()
            .filter(|(_, state)| state.last_update < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.states.remove(id);
        }
        stale
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
