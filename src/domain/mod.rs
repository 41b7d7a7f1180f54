//! Domain models - core types shared across the control loop
//!
//! - `Credential` - identifier presented at the reader
//! - `GateState` / `GatePosition` - gate lifecycle and actuator command
//! - `DistanceReading` - passage detector output
//! - `Spot` / `OccupancySnapshot` - per-cycle occupancy

pub mod occupancy;
pub mod types;

pub use occupancy::{OccupancySnapshot, Spot};
pub use types::{Credential, DistanceReading, GatePosition, GateState};
