//! Typed channel for MQTT egress messages
//!
//! The control loop hands telemetry to the publisher through a bounded
//! channel with `try_send`. A full channel drops the message; telemetry
//! must never hold up the gate.

use crate::domain::occupancy::OccupancySnapshot;
use crate::domain::types::{Credential, GateState};
use crate::infra::metrics::{Metrics, MetricsSummary};
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// Milliseconds since the Unix epoch (wall clock, for payload timestamps only)
pub fn epoch_ms() -> u64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}

/// Messages that can be sent to the MQTT publisher
#[derive(Debug)]
pub enum EgressMessage {
    /// Available-spot count for the single published availability channel
    Availability(usize),
    /// Occupancy vector and gate state
    Status(StatusPayload),
    /// Gate transition, denial or anomaly
    GateEvent(GateEventPayload),
    /// Periodic metrics snapshot
    Metrics(MetricsPayload),
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: u64,
    pub available: usize,
    pub total: usize,
    pub free: Vec<bool>,
    /// Spots whose sensor could not be read this cycle
    pub faults: usize,
    pub gate: &'static str,
}

impl StatusPayload {
    pub fn new(snapshot: &OccupancySnapshot, gate: GateState) -> Self {
        Self {
            site: None,
            ts: epoch_ms(),
            available: snapshot.available_count(),
            total: snapshot.total(),
            free: snapshot.free_flags().to_vec(),
            faults: snapshot.fault_count(),
            gate: gate.as_str(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GateEventPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    pub ts: u64,
    /// access_granted, access_denied, passage_confirmed, gate_closed, gate_forced_close
    pub t: &'static str,
    /// Resulting gate state
    pub gate: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<Credential>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_cm: Option<f32>,
    /// How long the barrier was up (on close)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_ms: Option<u64>,
    /// Set for events that need operator attention
    pub anomaly: bool,
}

impl GateEventPayload {
    pub fn new(t: &'static str, gate: GateState) -> Self {
        Self {
            site: None,
            ts: epoch_ms(),
            t,
            gate: gate.as_str(),
            uid: None,
            distance_cm: None,
            open_ms: None,
            anomaly: false,
        }
    }

    pub fn with_uid(mut self, uid: Credential) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_distance(mut self, distance_cm: f32) -> Self {
        self.distance_cm = Some(distance_cm);
        self
    }

    pub fn with_open_ms(mut self, open_ms: u64) -> Self {
        self.open_ms = Some(open_ms);
        self
    }

    pub fn anomaly(mut self) -> Self {
        self.anomaly = true;
        self
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsPayload {
    pub site: String,
    pub ts: u64,
    #[serde(flatten)]
    pub summary: MetricsSummary,
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped and counted.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    site_id: String,
    metrics: Arc<Metrics>,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, site_id: String, metrics: Arc<Metrics>) -> Self {
        Self { tx, site_id, metrics }
    }

    fn try_send(&self, msg: EgressMessage) {
        if self.tx.try_send(msg).is_err() {
            self.metrics.record_telemetry_dropped();
        }
    }

    pub fn send_availability(&self, available: usize) {
        self.try_send(EgressMessage::Availability(available));
    }

    /// Injects site_id into the payload
    pub fn send_status(&self, mut payload: StatusPayload) {
        payload.site = Some(self.site_id.clone());
        self.try_send(EgressMessage::Status(payload));
    }

    /// Injects site_id into the payload
    pub fn send_gate_event(&self, mut payload: GateEventPayload) {
        payload.site = Some(self.site_id.clone());
        self.try_send(EgressMessage::GateEvent(payload));
    }

    pub fn send_metrics(&self, summary: MetricsSummary) {
        let payload = MetricsPayload { site: self.site_id.clone(), ts: epoch_ms(), summary };
        self.try_send(EgressMessage::Metrics(payload));
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_egress_channel(
    buffer_size: usize,
    site_id: String,
    metrics: Arc<Metrics>,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, site_id, metrics), rx)
}
