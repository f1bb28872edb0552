mod alert;
mod vehicle;

pub use alert::{Alert, AlertDetails, AlertKind, Severity, Snapshot, Solution};
pub use vehicle::{PositionUpdate, VehicleState};
