//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `hardware` - Collaborator traits for the gate peripherals
//! - `bridge` - Serial link to the sensor/actuator microcontroller
//! - `sim` - Simulated peripherals for tests and the simulator binary
//! - `display` - Status display frames and a log-backed display
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `mqtt_egress` - MQTT publisher for telemetry
//! - `mqtt_acl` - MQTT subscriber for runtime ACL provisioning
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod bridge;
pub mod display;
pub mod egress_channel;
pub mod hardware;
pub mod mqtt_acl;
pub mod mqtt_egress;
pub mod prometheus;
pub mod sim;

// Re-export commonly used types
pub use bridge::SerialBridge;
pub use display::{DisplayFrame, LogDisplay};
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender};
pub use hardware::Peripherals;
pub use mqtt_acl::{create_acl_channel, start_acl_listener};
pub use mqtt_egress::MqttPublisher;
pub use sim::{SimHardware, SimPeripheral};
