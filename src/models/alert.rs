use serde::Serialize;
use utoipa::ToSchema;

/// Class of detected service anomaly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    StuckBus,
    HeadwayRisk,
    CoverageGap,
}

/// Alert severity. Declaration order is the sort order: high before medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

/// Type-specific detail payload attached to an alert
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(untagged)]
pub enum AlertDetails {
    Stuck {
        route_id: String,
        /// Whole minutes the vehicle has been stationary
        minutes: i64,
    },
    Headway {
        /// Estimated headway in minutes, rounded to one decimal
        estimated_headway_min: f64,
        target_min: f64,
    },
    Coverage {
        /// Smoothed visit density of the underserved cell, rounded to two decimals
        ewma: f64,
    },
}

/// Recommended remedial action attached to an alert
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Solution {
    /// Short action label (e.g. "Divert & Reroute")
    pub action: String,
    /// Human-readable dispatcher instruction
    pub suggestion: String,
    /// Vehicle proposed for the diversion
    pub target_vehicle_id: String,
}

/// A single detected anomaly, immutable once constructed
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Alert {
    /// Unique alert identifier (fresh per tick; alerts re-fire every tick
    /// until the underlying condition clears)
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    /// Vehicle the alert is about (stuck alerts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    /// Route the alert is about (headway alerts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
    /// Grid cell the alert is about, as "latBand|lngBand" (coverage alerts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_key: Option<String>,
    pub details: AlertDetails,
    pub solution: Option<Solution>,
}

/// Published result of one detection cycle.
///
/// Replaces the previous snapshot atomically; alerts are ordered high
/// severity first (stable within a severity).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Snapshot {
    /// Generation time (RFC 3339)
    pub timestamp: String,
    pub alerts: Vec<Alert>,
}

impl Snapshot {
    /// The snapshot served before the first detection cycle has run.
    pub fn empty(timestamp: String) -> Self {
        Self {
            timestamp,
            alerts: Vec::new(),
        }
    }
}
