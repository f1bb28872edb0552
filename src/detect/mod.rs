//! Anomaly detection over the live fleet state.
//!
//! The [`DetectionEngine`] owns every stateful component (vehicle tracker,
//! stuck monitor, occupancy grid, headway estimator), fans incoming position
//! updates out to them, and runs the fixed-period detection cycle that
//! publishes alert snapshots.

pub mod diversion;
pub mod grid;
pub mod headway;
pub mod stuck;

use chrono::{DateTime, Duration, Utc};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::DetectionConfig;
use crate::models::{Alert, PositionUpdate, Snapshot, VehicleState};
use crate::tracker::VehicleTracker;

use diversion::DiversionRecommender;
use grid::OccupancyGrid;
use headway::HeadwayEstimator;
use stuck::StuckMonitor;

/// Sender side of the snapshot broadcast consumed by WebSocket subscribers.
pub type SnapshotSender = broadcast::Sender<Snapshot>;

struct SchedulerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns all detection state and the periodic detection cycle.
///
/// Ingestion and the scheduler are concurrent over the component maps; each
/// map sits behind its own `RwLock` so every keyed read-modify-write is
/// serialized. Detection itself runs over owned point-in-time snapshots and
/// never blocks on I/O.
pub struct DetectionEngine {
    config: DetectionConfig,
    tracker: RwLock<VehicleTracker>,
    stuck: RwLock<StuckMonitor>,
    grid: RwLock<OccupancyGrid>,
    headway: RwLock<HeadwayEstimator>,
    snapshot: RwLock<Snapshot>,
    snapshots_tx: SnapshotSender,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl DetectionEngine {
    pub fn new(config: DetectionConfig) -> Self {
        // Capacity 16 - subscribers only care about the latest snapshot anyway
        let (snapshots_tx, _) = broadcast::channel(16);
        let grid = OccupancyGrid::new(config.grid_cell_size_deg);

        Self {
            config,
            tracker: RwLock::new(VehicleTracker::new()),
            stuck: RwLock::new(StuckMonitor::new()),
            grid: RwLock::new(grid),
            headway: RwLock::new(HeadwayEstimator::new()),
            snapshot: RwLock::new(Snapshot::empty(Utc::now().to_rfc3339())),
            snapshots_tx,
            scheduler: Mutex::new(None),
        }
    }

    /// Fan one position update out to the tracker, stuck monitor, grid and
    /// headway estimator.
    ///
    /// Updates rejected by the tracker (missing id or position) are dropped
    /// before reaching the other components, so their maps only ever see
    /// validated records.
    pub async fn ingest(&self, update: PositionUpdate) {
        let kept = self.tracker.write().await.record(&update);
        if !kept {
            debug!(vehicle = %update.vehicle_id, "dropped partial position update");
            return;
        }

        self.stuck
            .write()
            .await
            .observe(&update.vehicle_id, update.speed_kmh, update.timestamp);
        self.grid.write().await.record(update.lat, update.lng);
        self.headway
            .write()
            .await
            .record(&update.route_id, update.timestamp);
    }

    /// Run one detection cycle: smooth, detect, sort, publish.
    pub async fn run_cycle(&self, now: DateTime<Utc>) {
        if let Some(timeout_secs) = self.config.stale_vehicle_timeout_secs {
            let cutoff = now - Duration::seconds(timeout_secs as i64);
            let evicted = self.tracker.write().await.evict_older_than(cutoff);
            if !evicted.is_empty() {
                let mut stuck = self.stuck.write().await;
                for vehicle_id in &evicted {
                    stuck.forget(vehicle_id);
                }
                info!(count = evicted.len(), "evicted stale vehicles");
            }
        }

        self.grid.write().await.advance_tick(self.config.smoothing_alpha);
        self.headway
            .write()
            .await
            .advance_tick(self.config.smoothing_alpha);

        let vehicles = self.tracker.read().await.snapshot();
        let overdue = self.stuck.read().await.overdue(
            now,
            Duration::seconds(self.config.stuck_duration_secs as i64),
        );
        let rates = self.headway.read().await.rate_snapshot();
        let densities = self.grid.read().await.density_snapshot();

        let recommender =
            DiversionRecommender::new(&vehicles, self.config.diversion_search_radius_m);

        // Detectors run in fixed order; a fault in one degrades the cycle
        // instead of aborting it.
        let mut alerts = Vec::new();
        alerts.extend(run_isolated("stuck", || {
            stuck::detect(&overdue, &vehicles, &recommender, now)
        }));
        alerts.extend(run_isolated("headway", || {
            headway::detect(
                &rates,
                &vehicles,
                &recommender,
                self.config.target_headway_minutes,
            )
        }));
        alerts.extend(run_isolated("coverage", || {
            grid::detect(
                &densities,
                self.config.grid_cell_size_deg,
                self.config.coverage_low_threshold,
                self.config.coverage_high_threshold,
                &recommender,
            )
        }));

        // Stable: high before medium, original order within a severity.
        alerts.sort_by_key(|alert| alert.severity);

        let snapshot = Snapshot {
            timestamp: now.to_rfc3339(),
            alerts,
        };

        info!(
            alerts = snapshot.alerts.len(),
            vehicles = vehicles.len(),
            "detection cycle complete"
        );

        *self.snapshot.write().await = snapshot.clone();
        // Ignore send errors - they just mean no one is listening
        let _ = self.snapshots_tx.send(snapshot);
    }

    /// Start the fixed-period detection scheduler.
    ///
    /// Any previously running scheduler is stopped first, so reconfiguring
    /// or restarting never produces duplicate concurrent ticks.
    pub async fn start(self: &Arc<Self>) {
        self.stop().await;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = Arc::clone(self);
        let period = std::time::Duration::from_secs(self.config.tick_period_secs);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // Skip the first tick which fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => engine.run_cycle(Utc::now()).await,
                    _ = stop_rx.changed() => break,
                }
            }
        });

        info!(period_secs = self.config.tick_period_secs, "detection scheduler started");
        *self.scheduler.lock().await = Some(SchedulerHandle { stop_tx, task });
    }

    /// Stop the scheduler between ticks.
    ///
    /// An in-flight cycle always runs to completion; this waits for the
    /// scheduler task to exit. Idempotent.
    pub async fn stop(&self) {
        if let Some(handle) = self.scheduler.lock().await.take() {
            let _ = handle.stop_tx.send(true);
            let _ = handle.task.await;
            info!("detection scheduler stopped");
        }
    }

    /// The most recently published snapshot (empty before the first tick).
    pub async fn latest_snapshot(&self) -> Snapshot {
        self.snapshot.read().await.clone()
    }

    /// Subscribe to snapshots published by future detection cycles.
    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.snapshots_tx.subscribe()
    }

    /// Point-in-time view of all tracked vehicles, for the read API.
    pub async fn vehicle_snapshot(&self) -> Vec<(String, VehicleState)> {
        self.tracker.read().await.snapshot()
    }
}

/// Run one detector pass, containing any panic to this tick.
fn run_isolated<F>(detector: &str, pass: F) -> Vec<Alert>
where
    F: FnOnce() -> Vec<Alert>,
{
    match std::panic::catch_unwind(AssertUnwindSafe(pass)) {
        Ok(alerts) => alerts,
        Err(_) => {
            error!(detector, "detector panicked; contributing no alerts this tick");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertDetails, AlertKind, Severity};
    use uuid::Uuid;

    fn alert(kind: AlertKind, severity: Severity, message: &str) -> Alert {
        Alert {
            id: Uuid::new_v4().to_string(),
            kind,
            severity,
            message: message.to_string(),
            vehicle_id: None,
            route_id: None,
            cell_key: None,
            details: AlertDetails::Coverage { ewma: 0.0 },
            solution: None,
        }
    }

    #[test]
    fn severity_sort_is_stable_high_first() {
        let mut alerts = vec![
            alert(AlertKind::CoverageGap, Severity::Medium, "gap-1"),
            alert(AlertKind::StuckBus, Severity::High, "stuck-1"),
            alert(AlertKind::CoverageGap, Severity::Medium, "gap-2"),
            alert(AlertKind::HeadwayRisk, Severity::High, "headway-1"),
        ];
        alerts.sort_by_key(|a| a.severity);

        let messages: Vec<&str> = alerts.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(messages, vec!["stuck-1", "headway-1", "gap-1", "gap-2"]);
    }

    #[test]
    fn run_isolated_contains_a_panicking_detector() {
        let alerts = run_isolated("test", || panic!("detector bug"));
        assert!(alerts.is_empty());
    }

    #[test]
    fn run_isolated_passes_alerts_through() {
        let alerts = run_isolated("test", || {
            vec![alert(AlertKind::StuckBus, Severity::High, "ok")]
        });
        assert_eq!(alerts.len(), 1);
    }
}
