//! Services - control logic and state management
//!
//! This module contains the core control services:
//! - `controller` - The control loop that owns all gate state
//! - `sampler` - Occupancy sampling and classification
//! - `authorizer` - Authorized credential set and ACL commands
//! - `passage` - Passage detection at the gate threshold
//! - `gate` - Gate/access state machine
//! - `reporter` - Display and telemetry reporting per cycle

pub mod authorizer;
pub mod controller;
pub mod gate;
pub mod passage;
pub mod reporter;
pub mod sampler;

// Re-export commonly used types
pub use authorizer::{AclCommand, AuthorizedSet};
pub use controller::{CycleOutcome, ParkingController};
pub use gate::{CloseReason, GateEvent, GateStateMachine};
