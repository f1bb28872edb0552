//! GTFS-realtime ingestion: polls the VehiclePositions feed (plus an
//! optional TripUpdates feed for delay enrichment), normalizes entities into
//! position updates and fans them into the detection engine.
//!
//! The upstream refreshes the whole fleet roughly every 15 seconds with no
//! ordering or deduplication guarantees; partial records are expected and
//! dropped downstream at the tracker boundary.

mod error;

pub use error::FeedError;

use chrono::{DateTime, Utc};
use prost::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::detect::DetectionEngine;
use crate::geo;
use crate::models::PositionUpdate;

/// Maximum allowed protobuf response size (50 MB)
const MAX_PROTOBUF_SIZE: usize = 50 * 1024 * 1024;

/// Delays outside this range (minutes) are feed noise and get clamped.
const DELAY_CLAMP_MIN: i32 = -60;
const DELAY_CLAMP_MAX: i32 = 240;

/// Last position seen per vehicle, kept by the poller to derive a speed when
/// the feed omits one.
#[derive(Debug, Clone)]
struct LastSeen {
    lat: f64,
    lng: f64,
    at: DateTime<Utc>,
}

/// Polls the GTFS-realtime feeds on a fixed interval and feeds the engine.
pub struct FeedPoller {
    client: reqwest::Client,
    config: FeedConfig,
    engine: Arc<DetectionEngine>,
    last_seen: HashMap<String, LastSeen>,
}

impl FeedPoller {
    pub fn new(config: FeedConfig, engine: Arc<DetectionEngine>) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            engine,
            last_seen: HashMap::new(),
        }
    }

    /// Run the poll loop forever. Fetch or decode failures are logged and
    /// the next poll proceeds.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.config.poll_interval_secs,
            vehicle_limit = self.config.vehicle_limit,
            "starting feed poller"
        );
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.poll_interval_secs));

        loop {
            interval.tick().await;
            match self.poll_once().await {
                Ok((total, ingested)) => {
                    info!(feed_entities = total, ingested, "feed poll complete");
                }
                Err(e) => {
                    warn!(error = %e, "feed poll failed");
                }
            }
        }
    }

    /// One fetch-decode-ingest pass. Returns (entities in feed, updates
    /// handed to the engine).
    async fn poll_once(&mut self) -> Result<(usize, usize), FeedError> {
        let positions_url = with_api_key(
            &self.config.vehicle_positions_url,
            self.config.api_key.as_deref(),
        );
        let feed = fetch_feed(&self.client, &positions_url).await?;

        // Delay enrichment is optional: a failed TripUpdates fetch degrades
        // to zero delays instead of aborting the poll.
        let delays = match &self.config.trip_updates_url {
            Some(url) => {
                let url = with_api_key(url, self.config.api_key.as_deref());
                match fetch_feed(&self.client, &url).await {
                    Ok(trip_feed) => build_delay_map(&trip_feed),
                    Err(e) => {
                        warn!(error = %e, "trip updates fetch failed, delays default to 0");
                        HashMap::new()
                    }
                }
            }
            None => HashMap::new(),
        };

        let total = feed.entity.len();
        let updates = normalize_feed(
            &feed,
            &delays,
            self.config.vehicle_limit,
            &mut self.last_seen,
            Utc::now(),
        );
        let ingested = updates.len();

        for update in updates {
            self.engine.ingest(update).await;
        }

        Ok((total, ingested))
    }
}

/// Append the API key as a `key` query parameter, if one is configured.
fn with_api_key(url: &str, api_key: Option<&str>) -> String {
    match api_key {
        Some(key) => {
            let separator = if url.contains('?') { '&' } else { '?' };
            format!("{}{}key={}", url, separator, urlencoding::encode(key))
        }
        None => url.to_string(),
    }
}

/// Fetch and decode a GTFS-realtime protobuf feed.
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
) -> Result<gtfs_realtime::FeedMessage, FeedError> {
    let response = client
        .get(url)
        .timeout(std::time::Duration::from_secs(30))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(FeedError::Status(response.status()));
    }

    let bytes = response.bytes().await?;

    if bytes.len() > MAX_PROTOBUF_SIZE {
        return Err(FeedError::TooLarge(bytes.len(), MAX_PROTOBUF_SIZE));
    }

    gtfs_realtime::FeedMessage::decode(bytes.as_ref()).map_err(FeedError::from)
}

/// Build a trip_id -> delay (minutes) map from a TripUpdates feed.
///
/// Per trip: the first stop-time update with an arrival delay wins, else the
/// first with a departure delay, else the trip-level delay. Seconds round to
/// minutes, clamped to [-60, 240].
pub fn build_delay_map(feed: &gtfs_realtime::FeedMessage) -> HashMap<String, i32> {
    let mut delays = HashMap::new();

    for entity in &feed.entity {
        let Some(trip_update) = &entity.trip_update else {
            continue;
        };
        let Some(ref trip_id) = trip_update.trip.trip_id else {
            continue;
        };

        let mut delay_secs: Option<i32> = None;
        for stu in &trip_update.stop_time_update {
            if let Some(delay) = stu.arrival.as_ref().and_then(|a| a.delay) {
                delay_secs = Some(delay);
                break;
            }
            if let Some(delay) = stu.departure.as_ref().and_then(|d| d.delay) {
                delay_secs = Some(delay);
                break;
            }
        }
        let delay_secs = delay_secs.or(trip_update.delay);

        if let Some(secs) = delay_secs {
            let minutes = (secs as f64 / 60.0).round() as i32;
            delays.insert(trip_id.clone(), minutes.clamp(DELAY_CLAMP_MIN, DELAY_CLAMP_MAX));
        }
    }

    delays
}

/// Normalize feed entities into position updates.
///
/// At most `limit` entities are processed per refresh. Entities without a
/// vehicle or position block are skipped; everything else degrades field by
/// field (route falls back to "UNKNOWN", timestamp to the header then `now`,
/// speed to a displacement-derived estimate then 0).
fn normalize_feed(
    feed: &gtfs_realtime::FeedMessage,
    delays: &HashMap<String, i32>,
    limit: usize,
    last_seen: &mut HashMap<String, LastSeen>,
    now: DateTime<Utc>,
) -> Vec<PositionUpdate> {
    let mut updates = Vec::new();

    for entity in feed.entity.iter().take(limit) {
        let Some(vehicle) = &entity.vehicle else {
            continue;
        };
        let Some(position) = &vehicle.position else {
            continue;
        };

        let vehicle_id = vehicle
            .vehicle
            .as_ref()
            .and_then(|descriptor| descriptor.id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| entity.id.clone());

        let trip = vehicle.trip.as_ref();
        let trip_id = trip.and_then(|t| t.trip_id.clone());
        let route_id = trip
            .and_then(|t| t.route_id.clone())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "UNKNOWN".to_string());

        let timestamp = vehicle
            .timestamp
            .or(feed.header.timestamp)
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
            .unwrap_or(now);

        let lat = position.latitude as f64;
        let lng = position.longitude as f64;

        let speed_kmh = match position.speed {
            Some(speed) if speed.is_finite() && speed >= 0.0 => (speed as f64 * 3.6).round(),
            _ => last_seen
                .get(&vehicle_id)
                .and_then(|prev| derive_speed_kmh(prev, lat, lng, timestamp))
                .unwrap_or(0.0),
        };

        if lat.is_finite() && lng.is_finite() {
            last_seen.insert(
                vehicle_id.clone(),
                LastSeen {
                    lat,
                    lng,
                    at: timestamp,
                },
            );
        }

        let delay_minutes = trip_id
            .as_deref()
            .and_then(|t| delays.get(t).copied())
            .unwrap_or(0);

        updates.push(PositionUpdate {
            vehicle_id,
            route_id,
            lat,
            lng,
            speed_kmh,
            delay_minutes,
            timestamp,
        });
    }

    if feed.entity.len() > limit {
        debug!(
            feed_entities = feed.entity.len(),
            limit, "feed larger than vehicle limit, truncating"
        );
    }

    updates
}

/// Estimate a speed from the displacement since the previous position.
///
/// Requires more than half a second of elapsed time; a displacement under
/// one meter reads as stationary.
fn derive_speed_kmh(prev: &LastSeen, lat: f64, lng: f64, at: DateTime<Utc>) -> Option<f64> {
    let elapsed_secs = at.signed_duration_since(prev.at).num_milliseconds() as f64 / 1000.0;
    if elapsed_secs <= 0.5 {
        return None;
    }

    let distance_m = geo::haversine_meters(prev.lat, prev.lng, lat, lng);
    if distance_m < 1.0 {
        return Some(0.0);
    }

    let kmh = (distance_m / elapsed_secs * 3.6).round();
    kmh.is_finite().then_some(kmh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn feed(entities: Vec<gtfs_realtime::FeedEntity>) -> gtfs_realtime::FeedMessage {
        gtfs_realtime::FeedMessage {
            header: gtfs_realtime::FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                incrementality: Some(0),
                timestamp: Some(1_770_000_000),
                ..Default::default()
            },
            entity: entities,
        }
    }

    fn vehicle_entity(
        entity_id: &str,
        vehicle_id: Option<&str>,
        route_id: Option<&str>,
        lat: f32,
        lng: f32,
        speed_ms: Option<f32>,
    ) -> gtfs_realtime::FeedEntity {
        gtfs_realtime::FeedEntity {
            id: entity_id.to_string(),
            vehicle: Some(gtfs_realtime::VehiclePosition {
                trip: route_id.map(|r| gtfs_realtime::TripDescriptor {
                    trip_id: Some(format!("trip_{entity_id}")),
                    route_id: Some(r.to_string()),
                    ..Default::default()
                }),
                vehicle: vehicle_id.map(|id| gtfs_realtime::VehicleDescriptor {
                    id: Some(id.to_string()),
                    ..Default::default()
                }),
                position: Some(gtfs_realtime::Position {
                    latitude: lat,
                    longitude: lng,
                    speed: speed_ms,
                    ..Default::default()
                }),
                timestamp: Some(1_770_000_100),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn trip_update_entity(
        trip_id: &str,
        arrival_delay: Option<i32>,
        departure_delay: Option<i32>,
        trip_delay: Option<i32>,
    ) -> gtfs_realtime::FeedEntity {
        let stu = gtfs_realtime::trip_update::StopTimeUpdate {
            arrival: arrival_delay.map(|d| gtfs_realtime::trip_update::StopTimeEvent {
                delay: Some(d),
                ..Default::default()
            }),
            departure: departure_delay.map(|d| gtfs_realtime::trip_update::StopTimeEvent {
                delay: Some(d),
                ..Default::default()
            }),
            ..Default::default()
        };
        gtfs_realtime::FeedEntity {
            id: format!("tu_{trip_id}"),
            trip_update: Some(gtfs_realtime::TripUpdate {
                trip: gtfs_realtime::TripDescriptor {
                    trip_id: Some(trip_id.to_string()),
                    ..Default::default()
                },
                stop_time_update: vec![stu],
                delay: trip_delay,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn delay_map_prefers_arrival_over_departure_over_trip_level() {
        let feed = feed(vec![
            trip_update_entity("t1", Some(120), Some(600), Some(900)),
            trip_update_entity("t2", None, Some(180), Some(900)),
            trip_update_entity("t3", None, None, Some(240)),
        ]);
        let delays = build_delay_map(&feed);

        assert_eq!(delays["t1"], 2);
        assert_eq!(delays["t2"], 3);
        assert_eq!(delays["t3"], 4);
    }

    #[test]
    fn delay_map_clamps_outliers() {
        let feed = feed(vec![
            trip_update_entity("early", Some(-100_000), None, None),
            trip_update_entity("late", Some(100_000), None, None),
        ]);
        let delays = build_delay_map(&feed);

        assert_eq!(delays["early"], -60);
        assert_eq!(delays["late"], 240);
    }

    #[test]
    fn delay_map_skips_trips_without_any_delay() {
        let feed = feed(vec![trip_update_entity("t1", None, None, None)]);
        assert!(build_delay_map(&feed).is_empty());
    }

    #[test]
    fn normalize_converts_feed_speed_to_kmh() {
        let feed = feed(vec![vehicle_entity(
            "e1",
            Some("V1"),
            Some("R1"),
            28.61,
            77.20,
            Some(10.0),
        )]);
        let mut last_seen = HashMap::new();
        let updates = normalize_feed(&feed, &HashMap::new(), 200, &mut last_seen, Utc::now());

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].vehicle_id, "V1");
        assert_eq!(updates[0].route_id, "R1");
        assert_eq!(updates[0].speed_kmh, 36.0);
    }

    #[test]
    fn normalize_falls_back_to_entity_id_and_unknown_route() {
        let feed = feed(vec![vehicle_entity("e9", None, None, 28.61, 77.20, None)]);
        let mut last_seen = HashMap::new();
        let updates = normalize_feed(&feed, &HashMap::new(), 200, &mut last_seen, Utc::now());

        assert_eq!(updates[0].vehicle_id, "e9");
        assert_eq!(updates[0].route_id, "UNKNOWN");
    }

    #[test]
    fn normalize_skips_entities_without_position() {
        let entity = gtfs_realtime::FeedEntity {
            id: "e1".to_string(),
            vehicle: Some(gtfs_realtime::VehiclePosition {
                position: None,
                ..Default::default()
            }),
            ..Default::default()
        };
        let feed = feed(vec![entity]);
        let mut last_seen = HashMap::new();
        assert!(normalize_feed(&feed, &HashMap::new(), 200, &mut last_seen, Utc::now()).is_empty());
    }

    #[test]
    fn normalize_respects_the_vehicle_limit() {
        let feed = feed(vec![
            vehicle_entity("e1", Some("V1"), Some("R1"), 28.61, 77.20, Some(5.0)),
            vehicle_entity("e2", Some("V2"), Some("R1"), 28.62, 77.21, Some(5.0)),
            vehicle_entity("e3", Some("V3"), Some("R1"), 28.63, 77.22, Some(5.0)),
        ]);
        let mut last_seen = HashMap::new();
        let updates = normalize_feed(&feed, &HashMap::new(), 2, &mut last_seen, Utc::now());

        assert_eq!(updates.len(), 2);
    }

    #[test]
    fn normalize_attaches_delay_by_trip_id() {
        let feed = feed(vec![vehicle_entity(
            "e1",
            Some("V1"),
            Some("R1"),
            28.61,
            77.20,
            Some(5.0),
        )]);
        let mut delays = HashMap::new();
        delays.insert("trip_e1".to_string(), 7);
        let mut last_seen = HashMap::new();
        let updates = normalize_feed(&feed, &delays, 200, &mut last_seen, Utc::now());

        assert_eq!(updates[0].delay_minutes, 7);
    }

    #[test]
    fn derive_speed_from_displacement() {
        let t0 = Utc.with_ymd_and_hms(2026, 8, 7, 10, 0, 0).unwrap();
        let prev = LastSeen {
            lat: 28.6100,
            lng: 77.2000,
            at: t0,
        };
        // ~1112 m north in 60 s -> ~67 km/h.
        let speed = derive_speed_kmh(&prev, 28.6200, 77.2000, t0 + chrono::Duration::seconds(60))
            .unwrap();
        assert!((speed - 67.0).abs() <= 1.0, "got {speed}");
    }

    #[test]
    fn derive_speed_reads_tiny_displacement_as_stationary() {
        let t0 = Utc.with_ymd_and_hms(2026, 8, 7, 10, 0, 0).unwrap();
        let prev = LastSeen {
            lat: 28.6100,
            lng: 77.2000,
            at: t0,
        };
        let speed = derive_speed_kmh(
            &prev,
            28.6100001,
            77.2000,
            t0 + chrono::Duration::seconds(60),
        );
        assert_eq!(speed, Some(0.0));
    }

    #[test]
    fn derive_speed_needs_elapsed_time() {
        let t0 = Utc.with_ymd_and_hms(2026, 8, 7, 10, 0, 0).unwrap();
        let prev = LastSeen {
            lat: 28.6100,
            lng: 77.2000,
            at: t0,
        };
        assert!(derive_speed_kmh(&prev, 28.6200, 77.2000, t0).is_none());
    }

    #[test]
    fn api_key_is_appended_and_encoded() {
        assert_eq!(
            with_api_key("https://example.com/feed.pb", Some("a b")),
            "https://example.com/feed.pb?key=a%20b"
        );
        assert_eq!(
            with_api_key("https://example.com/feed.pb?v=2", Some("k")),
            "https://example.com/feed.pb?v=2&key=k"
        );
        assert_eq!(
            with_api_key("https://example.com/feed.pb", None),
            "https://example.com/feed.pb"
        );
    }
}
