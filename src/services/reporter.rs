//! Per-cycle status reporting
//!
//! Hands the cycle's occupancy and gate state to the display and to
//! telemetry. Neither path can stall the loop: the display call is bounded
//! and telemetry is a `try_send`.

use crate::domain::occupancy::OccupancySnapshot;
use crate::domain::types::GateState;
use crate::infra::metrics::{
    Metrics, GATE_STATE_CLOSED, GATE_STATE_CLOSING_PENDING, GATE_STATE_OPEN,
};
use crate::io::display::DisplayFrame;
use crate::io::egress_channel::{EgressSender, StatusPayload};
use crate::io::hardware::StatusDisplay;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct StatusReporter {
    display: Box<dyn StatusDisplay>,
    egress: Option<EgressSender>,
    metrics: Arc<Metrics>,
    render_timeout: Duration,
    /// Last availability published; the count goes out only when it changes
    last_available: Option<usize>,
}

impl StatusReporter {
    pub fn new(
        display: Box<dyn StatusDisplay>,
        egress: Option<EgressSender>,
        metrics: Arc<Metrics>,
        render_timeout: Duration,
    ) -> Self {
        Self { display, egress, metrics, render_timeout, last_available: None }
    }

    pub async fn report(&mut self, snapshot: &OccupancySnapshot, gate: GateState) {
        self.metrics.set_occupancy(snapshot.available_count(), snapshot.total());
        self.metrics.set_gate_state(gate_state_gauge(gate));

        let frame = DisplayFrame::new(snapshot, gate);
        match tokio::time::timeout(self.render_timeout, self.display.render(&frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.record_display_error();
                warn!(error = %e, "display_render_failed");
            }
            Err(_) => {
                self.metrics.record_display_error();
                warn!(timeout_ms = %self.render_timeout.as_millis(), "display_render_timeout");
            }
        }

        if let Some(ref egress) = self.egress {
            let available = snapshot.available_count();
            if self.last_available != Some(available) {
                egress.send_availability(available);
                self.last_available = Some(available);
            }
            egress.send_status(StatusPayload::new(snapshot, gate));
        }
    }
}

fn gate_state_gauge(gate: GateState) -> u64 {
    match gate {
        GateState::Closed => GATE_STATE_CLOSED,
        GateState::ClosingPending => GATE_STATE_CLOSING_PENDING,
        GateState::Open => GATE_STATE_OPEN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::occupancy::Spot;
    use crate::io::egress_channel::{create_egress_channel, EgressMessage};
    use crate::io::sim::SimHardware;

    fn snapshot(free: &[bool]) -> OccupancySnapshot {
        OccupancySnapshot::new(free.iter().enumerate().map(|(index, &free)| Spot {
            index,
            raw: Some(if free { 100 } else { 600 }),
            threshold: 500,
            free,
            fault: false,
        }))
    }

    #[tokio::test]
    async fn test_availability_published_on_change_only() {
        let metrics = Arc::new(Metrics::new());
        let (egress, mut rx) = create_egress_channel(16, "lot".to_string(), metrics.clone());
        let hw = SimHardware::default();
        let mut reporter =
            StatusReporter::new(Box::new(hw.clone()), Some(egress), metrics, Duration::from_millis(50));

        reporter.report(&snapshot(&[false, true, false]), GateState::Closed).await;
        reporter.report(&snapshot(&[false, true, false]), GateState::Open).await;
        reporter.report(&snapshot(&[true, true, false]), GateState::Open).await;

        let mut availability = Vec::new();
        let mut statuses = 0;
        while let Ok(msg) = rx.try_recv() {
            match msg {
                EgressMessage::Availability(n) => availability.push(n),
                EgressMessage::Status(_) => statuses += 1,
                other => panic!("unexpected message: {:?}", other),
            }
        }
        assert_eq!(availability, vec![1, 2]);
        assert_eq!(statuses, 3);
        assert_eq!(hw.last_frame().unwrap().available, 2);
    }

    #[tokio::test]
    async fn test_display_failure_is_counted_not_propagated() {
        let metrics = Arc::new(Metrics::new());
        let hw = SimHardware::default();
        hw.set_display_fault(true);
        let mut reporter =
            StatusReporter::new(Box::new(hw), None, metrics.clone(), Duration::from_millis(50));

        reporter.report(&snapshot(&[true]), GateState::Open).await;

        let summary = metrics.report();
        assert_eq!(summary.display_errors, 1);
        assert_eq!(summary.available_spots, 1);
        assert_eq!(summary.gate_state, GATE_STATE_OPEN);
    }
}
