//! Nearest-candidate search used to attach a remediation suggestion to an
//! alert: which tracked vehicle could be redirected toward a problem spot.

use crate::geo;
use crate::models::VehicleState;

/// Vehicles already this late are not asked to cover for someone else.
const MAX_CANDIDATE_DELAY_MIN: i32 = 10;

/// A vehicle proposed for rerouting.
#[derive(Debug, Clone, PartialEq)]
pub struct DiversionCandidate {
    pub vehicle_id: String,
    pub route_id: String,
    pub lat: f64,
    pub lng: f64,
}

/// Brute-force nearest-candidate search over a point-in-time view of the
/// tracked fleet.
///
/// O(n) per call; fine for fleets up to a few thousand vehicles per tick.
/// Replace with a spatial index if the fleet grows materially.
pub struct DiversionRecommender<'a> {
    vehicles: &'a [(String, VehicleState)],
    search_radius_m: f64,
}

impl<'a> DiversionRecommender<'a> {
    pub fn new(vehicles: &'a [(String, VehicleState)], search_radius_m: f64) -> Self {
        Self {
            vehicles,
            search_radius_m,
        }
    }

    /// Find the closest eligible vehicle to `(origin_lat, origin_lng)`.
    ///
    /// A candidate is eligible when its distance to the origin is strictly
    /// below the search radius, its delay is strictly below 10 minutes, and
    /// its route differs from `exclude_route_id` (when given). Equal
    /// distances resolve to the lexicographically smallest vehicle id.
    pub fn find_candidate(
        &self,
        origin_lat: f64,
        origin_lng: f64,
        exclude_route_id: Option<&str>,
    ) -> Option<DiversionCandidate> {
        let mut best: Option<(f64, &String, &VehicleState)> = None;

        for (vehicle_id, state) in self.vehicles {
            if exclude_route_id == Some(state.route_id.as_str()) {
                continue;
            }
            if state.delay_minutes >= MAX_CANDIDATE_DELAY_MIN {
                continue;
            }

            let distance = geo::haversine_meters(origin_lat, origin_lng, state.lat, state.lng);
            if distance >= self.search_radius_m {
                continue;
            }

            let closer = match best {
                None => true,
                Some((best_distance, best_id, _)) => {
                    distance < best_distance
                        || (distance == best_distance && vehicle_id < best_id)
                }
            };
            if closer {
                best = Some((distance, vehicle_id, state));
            }
        }

        best.map(|(_, vehicle_id, state)| DiversionCandidate {
            vehicle_id: vehicle_id.clone(),
            route_id: state.route_id.clone(),
            lat: state.lat,
            lng: state.lng,
        })
    }
}
