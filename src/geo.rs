//! Geographic helpers: great-circle distance and grid-cell indexing.
//!
//! Everything here is a pure function over coordinate pairs; all stateful
//! spatial bookkeeping lives in the occupancy grid.

/// Mean Earth radius in meters, used for haversine distance.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Discretized grid cell: (latitude band, longitude band).
pub type CellKey = (i32, i32);

/// Great-circle distance in meters between two coordinate pairs.
///
/// Any non-finite input coordinate yields 0.0: the pair is treated as
/// coincident rather than an error, so callers never have to pre-validate
/// feed coordinates before asking for a distance.
pub fn haversine_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    if ![lat1, lng1, lat2, lng2].iter().all(|c| c.is_finite()) {
        return 0.0;
    }

    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Map a position to its grid cell for the given cell size in degrees.
pub fn cell_index(lat: f64, lng: f64, cell_size_deg: f64) -> CellKey {
    (
        (lat / cell_size_deg).floor() as i32,
        (lng / cell_size_deg).floor() as i32,
    )
}

/// Center coordinate (lat, lng) of a grid cell.
pub fn cell_center(cell: CellKey, cell_size_deg: f64) -> (f64, f64) {
    (
        (cell.0 as f64 + 0.5) * cell_size_deg,
        (cell.1 as f64 + 0.5) * cell_size_deg,
    )
}

/// The eight grid neighbors of a cell.
pub fn neighbors(cell: CellKey) -> [CellKey; 8] {
    let (i, j) = cell;
    [
        (i - 1, j - 1),
        (i - 1, j),
        (i - 1, j + 1),
        (i, j - 1),
        (i, j + 1),
        (i + 1, j - 1),
        (i + 1, j),
        (i + 1, j + 1),
    ]
}
