//! Collaborator interfaces consumed by the control loop
//!
//! Each trait is one physical peripheral. Implementations may block on I/O;
//! the control loop wraps every call in its own timeout, so an implementation
//! never needs to bound itself beyond returning eventually.

use crate::domain::types::{Credential, GatePosition};
use crate::io::display::DisplayFrame;
use async_trait::async_trait;
use std::time::Duration;

/// Occupancy sensors (one analog channel per spot)
#[async_trait]
pub trait AnalogInput: Send {
    /// Read the first `count` channels. A `None` entry marks a channel the
    /// hardware reports as disconnected.
    async fn read_channels(&mut self, count: usize) -> anyhow::Result<Vec<Option<u16>>>;
}

/// Ultrasonic ranger at the gate threshold
#[async_trait]
pub trait EchoRanger: Send {
    /// Emit a trigger pulse and return the echo round-trip time, or `None`
    /// if nothing came back within `max_wait`.
    async fn ping(&mut self, max_wait: Duration) -> anyhow::Result<Option<Duration>>;
}

/// Card reader
#[async_trait]
pub trait CredentialReader: Send {
    /// Return the identifier of a newly presented card, if any
    async fn poll_credential(&mut self) -> anyhow::Result<Option<Credential>>;
}

/// Barrier actuator (open loop, no acknowledgement of the reached position)
#[async_trait]
pub trait GateActuator: Send {
    async fn command(&mut self, position: GatePosition) -> anyhow::Result<()>;
}

/// Local status display
#[async_trait]
pub trait StatusDisplay: Send {
    async fn render(&mut self, frame: &DisplayFrame) -> anyhow::Result<()>;
}

/// The full set of peripherals handed to the controller
pub struct Peripherals {
    pub analog: Box<dyn AnalogInput>,
    pub ranger: Box<dyn EchoRanger>,
    pub reader: Box<dyn CredentialReader>,
    pub actuator: Box<dyn GateActuator>,
    pub display: Box<dyn StatusDisplay>,
}

impl Peripherals {
    /// Use one handle for every peripheral (serial bridge, simulator)
    pub fn from_shared<H>(handle: H) -> Self
    where
        H: AnalogInput
            + EchoRanger
            + CredentialReader
            + GateActuator
            + StatusDisplay
            + Clone
            + 'static,
    {
        Self {
            analog: Box::new(handle.clone()),
            ranger: Box::new(handle.clone()),
            reader: Box::new(handle.clone()),
            actuator: Box::new(handle.clone()),
            display: Box::new(handle),
        }
    }

    /// Replace the display, e.g. with a log display when the bridge has no screen
    pub fn with_display(mut self, display: Box<dyn StatusDisplay>) -> Self {
        self.display = display;
        self
    }
}
