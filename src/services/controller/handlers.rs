//! Side effects of gate events: logging, metrics and telemetry

use super::ParkingController;
use crate::domain::types::Credential;
use crate::io::egress_channel::GateEventPayload;
use crate::services::gate::{CloseReason, GateEvent};
use tracing::{debug, info, warn};

impl ParkingController {
    pub(crate) fn handle_gate_event(&self, event: GateEvent, uid: Option<&Credential>) {
        let state = self.gate.state();
        let payload = match event {
            GateEvent::Opened => {
                self.metrics.record_access(true);
                info!(uid = ?uid.map(Credential::to_hex), "access_granted");
                Some(GateEventPayload::new("access_granted", state))
            }
            GateEvent::AccessDenied => {
                self.metrics.record_access(false);
                info!(uid = ?uid.map(Credential::to_hex), "access_denied");
                Some(GateEventPayload::new("access_denied", state))
            }
            GateEvent::CredentialIgnored => {
                self.metrics.record_credential_ignored();
                debug!(uid = ?uid.map(Credential::to_hex), state = %state, "credential_ignored");
                None
            }
            GateEvent::PassageConfirmed { distance_cm } => {
                self.metrics.record_passage();
                info!(distance_cm = %distance_cm, "passage_confirmed");
                Some(GateEventPayload::new("passage_confirmed", state).with_distance(distance_cm))
            }
            GateEvent::Closed { reason: CloseReason::PassageConfirmed, open_for } => {
                self.metrics.record_gate_close(false);
                info!(open_ms = %open_for.as_millis(), "gate_closed");
                Some(GateEventPayload::new("gate_closed", state).with_open_ms(open_for.as_millis() as u64))
            }
            GateEvent::Closed { reason: CloseReason::MaxOpenExceeded, open_for } => {
                self.metrics.record_gate_close(true);
                warn!(
                    open_ms = %open_for.as_millis(),
                    max_open_ms = %self.config.max_open().as_millis(),
                    "gate_forced_close"
                );
                Some(
                    GateEventPayload::new("gate_forced_close", state)
                        .with_open_ms(open_for.as_millis() as u64)
                        .anomaly(),
                )
            }
        };

        if let (Some(egress), Some(mut payload)) = (self.egress.as_ref(), payload) {
            if let Some(uid) = uid {
                payload = payload.with_uid(uid.clone());
            }
            egress.send_gate_event(payload);
        }
    }
}
