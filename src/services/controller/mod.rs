//! The parking control loop
//!
//! One task owns every piece of control state: sampler, authorized set,
//! passage detector, gate machine and reporter. A cycle runs, in order:
//! - apply pending ACL changes
//! - sample occupancy
//! - poll the card reader and authorize
//! - measure passage (only while the gate is `Open`)
//! - evaluate timing guards
//! - reconcile the actuator with the gate state
//! - report status

mod handlers;

use crate::domain::occupancy::OccupancySnapshot;
use crate::domain::types::{Credential, DistanceReading, GatePosition, GateState};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::egress_channel::EgressSender;
use crate::io::hardware::{CredentialReader, GateActuator, Peripherals};
use crate::services::authorizer::{AclCommand, AuthorizedSet};
use crate::services::gate::{GateEvent, GateStateMachine};
use crate::services::passage::PassageDetector;
use crate::services::reporter::StatusReporter;
use crate::services::sampler::OccupancySampler;
use anyhow::Context;
use smallvec::SmallVec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// What one cycle observed and did
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub snapshot: OccupancySnapshot,
    pub state: GateState,
    pub events: SmallVec<[GateEvent; 2]>,
    pub distance: Option<DistanceReading>,
}

pub struct ParkingController {
    pub(crate) config: Config,
    pub(crate) sampler: OccupancySampler,
    pub(crate) authorized: AuthorizedSet,
    pub(crate) reader: Box<dyn CredentialReader>,
    pub(crate) passage: PassageDetector,
    pub(crate) gate: GateStateMachine,
    pub(crate) actuator: Box<dyn GateActuator>,
    pub(crate) reporter: StatusReporter,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) egress: Option<EgressSender>,
    pub(crate) acl_rx: Option<mpsc::Receiver<AclCommand>>,
    /// Position the actuator last accepted; `None` until the next send succeeds
    pub(crate) commanded: Option<GatePosition>,
    /// Faulted spot count of the previous cycle, for edge-triggered logging
    pub(crate) last_faults: usize,
}

impl ParkingController {
    pub fn new(
        config: Config,
        peripherals: Peripherals,
        metrics: Arc<Metrics>,
        egress: Option<EgressSender>,
    ) -> Self {
        let Peripherals { analog, ranger, reader, actuator, display } = peripherals;
        Self {
            sampler: OccupancySampler::new(analog, &config),
            authorized: AuthorizedSet::new(config.authorized_uids().iter().cloned()),
            reader,
            passage: PassageDetector::new(ranger, &config),
            gate: GateStateMachine::from_config(&config),
            actuator,
            reporter: StatusReporter::new(
                display,
                egress.clone(),
                metrics.clone(),
                config.io_timeout(),
            ),
            metrics,
            egress,
            acl_rx: None,
            commanded: None,
            last_faults: 0,
            config,
        }
    }

    /// Accept runtime ACL changes from this channel
    pub fn with_acl(mut self, acl_rx: mpsc::Receiver<AclCommand>) -> Self {
        self.acl_rx = Some(acl_rx);
        self
    }

    pub fn state(&self) -> GateState {
        self.gate.state()
    }

    pub fn authorized_count(&self) -> usize {
        self.authorized.len()
    }

    /// Drive the barrier down before the first cycle
    ///
    /// A gate that cannot be closed must not start accepting cards.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let io_timeout = self.config.io_timeout();
        tokio::time::timeout(io_timeout, self.actuator.command(GatePosition::Closed))
            .await
            .context("timed out closing the gate at startup")?
            .context("failed to close the gate at startup")?;
        self.commanded = Some(GatePosition::Closed);
        info!(
            spots = %self.sampler.spot_count(),
            authorized = %self.authorized.len(),
            "controller_started"
        );
        Ok(())
    }

    /// Run cycles at the configured period until shutdown, then close the gate
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.cycle_period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(cycle_ms = %self.config.cycle_period().as_millis(), "control_loop_started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.run_cycle(Instant::now()).await;
                }
            }
        }

        self.shutdown().await;
    }

    /// Fail closed: command the barrier down whatever the state
    pub async fn shutdown(&mut self) {
        let state = self.gate.state();
        if state != GateState::Closed {
            warn!(state = %state, "shutdown_with_gate_up");
        }
        let io_timeout = self.config.io_timeout();
        match tokio::time::timeout(io_timeout, self.actuator.command(GatePosition::Closed)).await {
            Ok(Ok(())) => {
                self.commanded = Some(GatePosition::Closed);
                info!("controller_stopped");
            }
            Ok(Err(e)) => error!(error = %e, "shutdown_close_failed"),
            Err(_) => error!(timeout_ms = %io_timeout.as_millis(), "shutdown_close_timeout"),
        }
    }

    /// Execute one control cycle at `now`
    pub async fn run_cycle(&mut self, now: Instant) -> CycleOutcome {
        let started = Instant::now();
        let mut events: SmallVec<[GateEvent; 2]> = SmallVec::new();

        self.apply_acl_updates();

        let snapshot = self.sampler.sample().await;
        self.note_sensor_faults(&snapshot);

        if let Some(uid) = self.poll_credential().await {
            // Busy gate: the card is not even checked
            let authorized =
                self.gate.state() == GateState::Closed && self.authorized.authorize(uid.as_bytes());
            let event = self.gate.on_credential(now, authorized);
            self.handle_gate_event(event, Some(&uid));
            events.push(event);
        }

        let mut distance = None;
        if self.gate.state() == GateState::Open {
            let reading = self.passage.measure_distance_cm().await;
            if reading == DistanceReading::NoEcho {
                self.metrics.record_no_echo();
            }
            if let Some(event) = self.gate.on_distance(now, reading) {
                self.handle_gate_event(event, None);
                events.push(event);
            }
            distance = Some(reading);
        }

        if let Some(event) = self.gate.tick(now) {
            self.handle_gate_event(event, None);
            events.push(event);
        }

        self.reconcile_actuator().await;

        let state = self.gate.state();
        self.reporter.report(&snapshot, state).await;

        let elapsed = started.elapsed();
        self.record_cycle(elapsed);
        trace!(
            state = %state,
            available = %snapshot.available_count(),
            elapsed_us = %elapsed.as_micros(),
            "cycle"
        );

        CycleOutcome { snapshot, state, events, distance }
    }

    fn apply_acl_updates(&mut self) {
        let Some(rx) = self.acl_rx.as_mut() else {
            return;
        };
        while let Ok(command) = rx.try_recv() {
            if self.authorized.apply(command) {
                self.metrics.record_acl_update();
            }
        }
    }

    fn note_sensor_faults(&mut self, snapshot: &OccupancySnapshot) {
        let faults = snapshot.fault_count();
        if faults > 0 {
            self.metrics.record_sensor_faults(faults as u64);
        }
        if faults != self.last_faults {
            if faults > 0 {
                let spots: SmallVec<[usize; 8]> =
                    snapshot.spots().iter().filter(|s| s.fault).map(|s| s.index).collect();
                warn!(faults = %faults, spots = ?spots, "sensor_fault");
            } else {
                info!("sensor_recovered");
            }
            self.last_faults = faults;
        }
    }

    async fn poll_credential(&mut self) -> Option<Credential> {
        let io_timeout = self.config.io_timeout();
        match tokio::time::timeout(io_timeout, self.reader.poll_credential()).await {
            Ok(Ok(uid)) => uid,
            Ok(Err(e)) => {
                self.metrics.record_credential_read_error();
                warn!(error = %e, "credential_read_failed");
                None
            }
            Err(_) => {
                self.metrics.record_credential_read_error();
                warn!(timeout_ms = %io_timeout.as_millis(), "credential_read_timeout");
                None
            }
        }
    }

    /// Send the position the gate state requires, unless the actuator
    /// already accepted it. A failed send is retried next cycle.
    async fn reconcile_actuator(&mut self) {
        let desired = self.gate.state().position();
        if self.commanded == Some(desired) {
            return;
        }
        let io_timeout = self.config.io_timeout();
        match tokio::time::timeout(io_timeout, self.actuator.command(desired)).await {
            Ok(Ok(())) => {
                self.commanded = Some(desired);
                debug!(position = %desired.as_str(), "gate_commanded");
            }
            Ok(Err(e)) => {
                self.commanded = None;
                self.metrics.record_actuator_error();
                warn!(error = %e, position = %desired.as_str(), "gate_command_failed");
            }
            Err(_) => {
                self.commanded = None;
                self.metrics.record_actuator_error();
                warn!(
                    timeout_ms = %io_timeout.as_millis(),
                    position = %desired.as_str(),
                    "gate_command_timeout"
                );
            }
        }
    }

    fn record_cycle(&self, elapsed: Duration) {
        self.metrics.record_cycle(elapsed.as_micros() as u64);
        let period = self.config.cycle_period();
        if elapsed > period {
            self.metrics.record_cycle_overrun();
            warn!(
                elapsed_ms = %elapsed.as_millis(),
                period_ms = %period.as_millis(),
                "cycle_overrun"
            );
        }
    }
}
