use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    /// Address the HTTP server binds to
    #[serde(default = "Config::default_listen_addr")]
    pub listen_addr: String,
    /// Telemetry feed configuration
    pub feed: FeedConfig,
    /// Anomaly detection tunables
    #[serde(default)]
    pub detection: DetectionConfig,
}

impl Config {
    fn default_listen_addr() -> String {
        "0.0.0.0:3000".to_string()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Configuration for the GTFS-realtime position feed
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// VehiclePositions protobuf feed URL
    pub vehicle_positions_url: String,
    /// Optional TripUpdates protobuf feed URL (enriches updates with delays)
    #[serde(default)]
    pub trip_updates_url: Option<String>,
    /// Optional API key, appended as a `key` query parameter
    #[serde(default)]
    pub api_key: Option<String>,
    /// Seconds between feed polls (default: 15, the observed fleet refresh)
    #[serde(default = "FeedConfig::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum number of feed entities processed per refresh (default: 200)
    #[serde(default = "FeedConfig::default_vehicle_limit")]
    pub vehicle_limit: usize,
}

impl FeedConfig {
    fn default_poll_interval_secs() -> u64 {
        15
    }
    fn default_vehicle_limit() -> usize {
        200
    }
}

/// Anomaly detection tunables
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Spatial resolution of the occupancy grid, in degrees (default: 0.01)
    #[serde(default = "DetectionConfig::default_grid_cell_size_deg")]
    pub grid_cell_size_deg: f64,
    /// EWMA weight for both grid and headway smoothing (default: 0.5)
    #[serde(default = "DetectionConfig::default_smoothing_alpha")]
    pub smoothing_alpha: f64,
    /// A cell below this smoothed density is a coverage-gap candidate
    /// (default: 1.0)
    #[serde(default = "DetectionConfig::default_coverage_low_threshold")]
    pub coverage_low_threshold: f64,
    /// A neighbor at or above this smoothed density makes the gap alertable
    /// (default: 3.0)
    #[serde(default = "DetectionConfig::default_coverage_high_threshold")]
    pub coverage_high_threshold: f64,
    /// Minimum continuous low-speed duration before alerting, in seconds
    /// (default: 300)
    #[serde(default = "DetectionConfig::default_stuck_duration_secs")]
    pub stuck_duration_secs: u64,
    /// Baseline headway for risk comparison, in minutes (default: 10)
    #[serde(default = "DetectionConfig::default_target_headway_minutes")]
    pub target_headway_minutes: f64,
    /// Maximum distance to a diversion candidate, in meters (default: 2000)
    #[serde(default = "DetectionConfig::default_diversion_search_radius_m")]
    pub diversion_search_radius_m: f64,
    /// Detection cycle cadence, in seconds (default: 60)
    #[serde(default = "DetectionConfig::default_tick_period_secs")]
    pub tick_period_secs: u64,
    /// Drop vehicles unseen for this many seconds at tick time.
    /// Unset (the default) keeps stale entries forever.
    #[serde(default)]
    pub stale_vehicle_timeout_secs: Option<u64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            grid_cell_size_deg: Self::default_grid_cell_size_deg(),
            smoothing_alpha: Self::default_smoothing_alpha(),
            coverage_low_threshold: Self::default_coverage_low_threshold(),
            coverage_high_threshold: Self::default_coverage_high_threshold(),
            stuck_duration_secs: Self::default_stuck_duration_secs(),
            target_headway_minutes: Self::default_target_headway_minutes(),
            diversion_search_radius_m: Self::default_diversion_search_radius_m(),
            tick_period_secs: Self::default_tick_period_secs(),
            stale_vehicle_timeout_secs: None,
        }
    }
}

impl DetectionConfig {
    fn default_grid_cell_size_deg() -> f64 {
        0.01
    }
    fn default_smoothing_alpha() -> f64 {
        0.5
    }
    fn default_coverage_low_threshold() -> f64 {
        1.0
    }
    fn default_coverage_high_threshold() -> f64 {
        3.0
    }
    fn default_stuck_duration_secs() -> u64 {
        5 * 60
    }
    fn default_target_headway_minutes() -> f64 {
        10.0
    }
    fn default_diversion_search_radius_m() -> f64 {
        2000.0
    }
    fn default_tick_period_secs() -> u64 {
        60
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
