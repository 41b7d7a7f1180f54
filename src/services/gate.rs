//! Gate/access state machine
//!
//! Pure state: every input carries the cycle's monotonic `Instant`, so the
//! machine never sleeps and tests drive time explicitly. The controller
//! updates the machine first and commands the actuator from the resulting
//! state.
//!
//! ```text
//! Closed --authorized--> Open --distance <= threshold--> ClosingPending
//!   ^                     |                                   |
//!   +---- max_open -------+                                   |
//!   +------------------------- grace elapsed -----------------+
//! ```

use crate::domain::types::{DistanceReading, GateState};
use crate::infra::config::Config;
use std::time::{Duration, Instant};

/// Why the gate went back to `Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Vehicle detected at the threshold and the grace period elapsed
    PassageConfirmed,
    /// No passage within the max-open window (anomaly)
    MaxOpenExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateEvent {
    Opened,
    AccessDenied,
    /// Authorized or not, a credential presented while the gate is busy
    CredentialIgnored,
    PassageConfirmed { distance_cm: f32 },
    Closed { reason: CloseReason, open_for: Duration },
}

impl GateEvent {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, GateEvent::Closed { reason: CloseReason::MaxOpenExceeded, .. })
    }
}

#[derive(Debug)]
pub struct GateStateMachine {
    state: GateState,
    opened_at: Option<Instant>,
    passage_at: Option<Instant>,
    passage_threshold_cm: f32,
    closing_grace: Duration,
    max_open: Duration,
}

impl GateStateMachine {
    pub fn new(passage_threshold_cm: f32, closing_grace: Duration, max_open: Duration) -> Self {
        Self {
            state: GateState::Closed,
            opened_at: None,
            passage_at: None,
            passage_threshold_cm,
            closing_grace,
            max_open,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.passage_threshold_cm(), config.closing_grace(), config.max_open())
    }

    #[inline]
    pub fn state(&self) -> GateState {
        self.state
    }

    /// Time since the gate opened, if it is up
    pub fn open_for(&self, now: Instant) -> Option<Duration> {
        self.opened_at.map(|t| now.saturating_duration_since(t))
    }

    /// Apply the outcome of an authorization check
    pub fn on_credential(&mut self, now: Instant, authorized: bool) -> GateEvent {
        match self.state {
            GateState::Closed if authorized => {
                self.state = GateState::Open;
                self.opened_at = Some(now);
                self.passage_at = None;
                GateEvent::Opened
            }
            GateState::Closed => GateEvent::AccessDenied,
            GateState::Open | GateState::ClosingPending => GateEvent::CredentialIgnored,
        }
    }

    /// Apply a passage measurement; only meaningful while `Open`
    ///
    /// `NoEcho` and readings above the threshold leave the state unchanged
    /// and do not reset the max-open clock.
    pub fn on_distance(&mut self, now: Instant, reading: DistanceReading) -> Option<GateEvent> {
        if self.state != GateState::Open {
            return None;
        }
        match reading {
            DistanceReading::Cm(cm) if cm <= self.passage_threshold_cm => {
                self.state = GateState::ClosingPending;
                self.passage_at = Some(now);
                Some(GateEvent::PassageConfirmed { distance_cm: cm })
            }
            _ => None,
        }
    }

    /// Evaluate timing guards
    pub fn tick(&mut self, now: Instant) -> Option<GateEvent> {
        match self.state {
            GateState::Closed => None,
            GateState::Open => {
                let open_for = self.open_for(now)?;
                (open_for >= self.max_open).then(|| self.close(now, CloseReason::MaxOpenExceeded))
            }
            GateState::ClosingPending => {
                let since_passage = now.saturating_duration_since(self.passage_at?);
                (since_passage >= self.closing_grace)
                    .then(|| self.close(now, CloseReason::PassageConfirmed))
            }
        }
    }

    fn close(&mut self, now: Instant, reason: CloseReason) -> GateEvent {
        let open_for = self.open_for(now).unwrap_or_default();
        self.state = GateState::Closed;
        self.opened_at = None;
        self.passage_at = None;
        GateEvent::Closed { reason, open_for }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> GateStateMachine {
        GateStateMachine::new(12.0, Duration::from_millis(2500), Duration::from_secs(20))
    }

    fn ms(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    #[test]
    fn test_starts_closed() {
        assert_eq!(machine().state(), GateState::Closed);
    }

    #[test]
    fn test_authorized_opens() {
        let t0 = Instant::now();
        let mut gate = machine();

        assert_eq!(gate.on_credential(t0, true), GateEvent::Opened);
        assert_eq!(gate.state(), GateState::Open);
        assert_eq!(gate.open_for(t0 + ms(500)), Some(ms(500)));
    }

    #[test]
    fn test_unauthorized_stays_closed() {
        let t0 = Instant::now();
        let mut gate = machine();

        assert_eq!(gate.on_credential(t0, false), GateEvent::AccessDenied);
        assert_eq!(gate.state(), GateState::Closed);
        assert_eq!(gate.tick(t0 + ms(60_000)), None);
    }

    #[test]
    fn test_credentials_ignored_while_busy() {
        let t0 = Instant::now();
        let mut gate = machine();
        gate.on_credential(t0, true);

        assert_eq!(gate.on_credential(t0 + ms(500), true), GateEvent::CredentialIgnored);
        assert_eq!(gate.on_credential(t0 + ms(500), false), GateEvent::CredentialIgnored);
        assert_eq!(gate.state(), GateState::Open);
        // A second authorized card does not restart the max-open clock
        assert_eq!(gate.open_for(t0 + ms(1000)), Some(ms(1000)));

        gate.on_distance(t0 + ms(1000), DistanceReading::Cm(5.0));
        assert_eq!(gate.on_credential(t0 + ms(1500), true), GateEvent::CredentialIgnored);
        assert_eq!(gate.state(), GateState::ClosingPending);
    }

    #[test]
    fn test_passage_sequence() {
        let t0 = Instant::now();
        let mut gate = machine();
        gate.on_credential(t0, true);

        assert_eq!(gate.on_distance(t0 + ms(500), DistanceReading::Cm(15.0)), None);
        assert_eq!(gate.state(), GateState::Open);
        assert_eq!(gate.on_distance(t0 + ms(1000), DistanceReading::Cm(13.0)), None);
        assert_eq!(gate.state(), GateState::Open);
        assert_eq!(
            gate.on_distance(t0 + ms(1500), DistanceReading::Cm(9.0)),
            Some(GateEvent::PassageConfirmed { distance_cm: 9.0 })
        );
        assert_eq!(gate.state(), GateState::ClosingPending);

        assert_eq!(gate.tick(t0 + ms(3999)), None);
        assert_eq!(
            gate.tick(t0 + ms(4000)),
            Some(GateEvent::Closed { reason: CloseReason::PassageConfirmed, open_for: ms(4000) })
        );
        assert_eq!(gate.state(), GateState::Closed);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let t0 = Instant::now();
        let mut gate = machine();
        gate.on_credential(t0, true);

        assert!(gate.on_distance(t0, DistanceReading::Cm(12.0)).is_some());
        assert_eq!(gate.state(), GateState::ClosingPending);
    }

    #[test]
    fn test_no_echo_keeps_open_until_max_open() {
        let t0 = Instant::now();
        let mut gate = machine();
        gate.on_credential(t0, true);

        let mut now = t0;
        while now < t0 + ms(19_500) {
            now += ms(500);
            assert_eq!(gate.on_distance(now, DistanceReading::NoEcho), None);
            assert_eq!(gate.tick(now), None);
            assert_eq!(gate.state(), GateState::Open);
        }

        now += ms(500);
        let event = gate.tick(now).unwrap();
        assert_eq!(
            event,
            GateEvent::Closed { reason: CloseReason::MaxOpenExceeded, open_for: ms(20_000) }
        );
        assert!(event.is_anomaly());
        assert_eq!(gate.state(), GateState::Closed);
    }

    #[test]
    fn test_above_threshold_does_not_reset_max_open() {
        let t0 = Instant::now();
        let mut gate = machine();
        gate.on_credential(t0, true);

        gate.on_distance(t0 + ms(19_000), DistanceReading::Cm(40.0));
        assert!(gate.tick(t0 + ms(20_000)).is_some_and(|e| e.is_anomaly()));
    }

    #[test]
    fn test_distance_ignored_unless_open() {
        let t0 = Instant::now();
        let mut gate = machine();

        assert_eq!(gate.on_distance(t0, DistanceReading::Cm(1.0)), None);
        assert_eq!(gate.state(), GateState::Closed);

        gate.on_credential(t0, true);
        gate.on_distance(t0, DistanceReading::Cm(5.0));
        // A second vehicle-close reading during grace does not extend it
        assert_eq!(gate.on_distance(t0 + ms(2000), DistanceReading::Cm(5.0)), None);
        assert!(gate.tick(t0 + ms(2500)).is_some());
    }

    #[test]
    fn test_reopen_after_close() {
        let t0 = Instant::now();
        let mut gate = machine();
        gate.on_credential(t0, true);
        gate.tick(t0 + ms(20_000));

        let t1 = t0 + ms(21_000);
        assert_eq!(gate.on_credential(t1, true), GateEvent::Opened);
        assert_eq!(gate.open_for(t1), Some(Duration::ZERO));
    }
}
