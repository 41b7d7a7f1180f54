//! Simulated peripherals
//!
//! All peripherals share one `SimState`; tests and the simulator binary hold
//! a clone of the handle and script the world through it.

use crate::domain::types::{Credential, GatePosition};
use crate::io::display::DisplayFrame;
use crate::io::hardware::{AnalogInput, CredentialReader, EchoRanger, GateActuator, StatusDisplay};
use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Round-trip time of an echo from `distance_cm` away
pub fn echo_for_distance(distance_cm: f32) -> Duration {
    Duration::from_secs_f64(distance_cm as f64 * 2.0 / 0.0343 / 1_000_000.0)
}

/// Which simulated peripheral a stall applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPeripheral {
    Analog,
    Ranger,
    Reader,
    Actuator,
    Display,
}

impl SimPeripheral {
    fn index(self) -> usize {
        match self {
            SimPeripheral::Analog => 0,
            SimPeripheral::Ranger => 1,
            SimPeripheral::Reader => 2,
            SimPeripheral::Actuator => 3,
            SimPeripheral::Display => 4,
        }
    }
}

#[derive(Debug, Default)]
pub struct SimState {
    /// Raw value per channel, `None` for a disconnected sensor
    pub channels: Vec<Option<u16>>,
    /// Fail the next analog read entirely
    pub analog_fault: bool,
    /// Cards waiting to be presented, one per poll
    pub cards: VecDeque<Credential>,
    /// Echo returned by every ping until changed
    pub echo: Option<Duration>,
    /// Scripted echoes consumed before falling back to `echo`
    pub echo_script: VecDeque<Option<Duration>>,
    pub pings: usize,
    /// Every position the actuator was commanded to, in order
    pub commands: Vec<GatePosition>,
    pub actuator_fault: bool,
    pub display_fault: bool,
    pub frames: Vec<DisplayFrame>,
    /// Delay before each call completes, per peripheral; models a hung device
    pub stalls: [Option<Duration>; 5],
}

#[derive(Clone, Default)]
pub struct SimHardware {
    state: Arc<Mutex<SimState>>,
}

impl SimHardware {
    pub fn new(channels: Vec<Option<u16>>) -> Self {
        let hardware = Self::default();
        hardware.state.lock().channels = channels;
        hardware
    }

    pub fn set_channel(&self, index: usize, raw: Option<u16>) {
        let mut state = self.state.lock();
        if index >= state.channels.len() {
            state.channels.resize(index + 1, None);
        }
        state.channels[index] = raw;
    }

    pub fn set_analog_fault(&self, fault: bool) {
        self.state.lock().analog_fault = fault;
    }

    pub fn present_card(&self, credential: Credential) {
        self.state.lock().cards.push_back(credential);
    }

    /// Place a reflector `distance_cm` in front of the ranger; `None` removes it
    pub fn set_distance(&self, distance_cm: Option<f32>) {
        self.state.lock().echo = distance_cm.map(echo_for_distance);
    }

    pub fn script_distances(&self, distances: &[Option<f32>]) {
        let mut state = self.state.lock();
        state.echo_script.extend(distances.iter().map(|d| d.map(echo_for_distance)));
    }

    pub fn set_actuator_fault(&self, fault: bool) {
        self.state.lock().actuator_fault = fault;
    }

    pub fn set_display_fault(&self, fault: bool) {
        self.state.lock().display_fault = fault;
    }

    /// Make every call to `peripheral` hang for `delay` before it has any
    /// effect; `None` clears the stall
    pub fn set_stall(&self, peripheral: SimPeripheral, delay: Option<Duration>) {
        self.state.lock().stalls[peripheral.index()] = delay;
    }

    async fn stall(&self, peripheral: SimPeripheral) {
        let delay = self.state.lock().stalls[peripheral.index()];
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn commands(&self) -> Vec<GatePosition> {
        self.state.lock().commands.clone()
    }

    pub fn last_command(&self) -> Option<GatePosition> {
        self.state.lock().commands.last().copied()
    }

    pub fn pings(&self) -> usize {
        self.state.lock().pings
    }

    pub fn last_frame(&self) -> Option<DisplayFrame> {
        self.state.lock().frames.last().cloned()
    }
}

#[async_trait]
impl AnalogInput for SimHardware {
    async fn read_channels(&mut self, count: usize) -> anyhow::Result<Vec<Option<u16>>> {
        self.stall(SimPeripheral::Analog).await;
        let state = self.state.lock();
        if state.analog_fault {
            bail!("simulated ADC failure");
        }
        Ok((0..count).map(|i| state.channels.get(i).copied().flatten()).collect())
    }
}

#[async_trait]
impl EchoRanger for SimHardware {
    async fn ping(&mut self, max_wait: Duration) -> anyhow::Result<Option<Duration>> {
        self.stall(SimPeripheral::Ranger).await;
        let mut state = self.state.lock();
        state.pings += 1;
        let echo = match state.echo_script.pop_front() {
            Some(scripted) => scripted,
            None => state.echo,
        };
        Ok(echo.filter(|e| *e <= max_wait))
    }
}

#[async_trait]
impl CredentialReader for SimHardware {
    async fn poll_credential(&mut self) -> anyhow::Result<Option<Credential>> {
        self.stall(SimPeripheral::Reader).await;
        Ok(self.state.lock().cards.pop_front())
    }
}

#[async_trait]
impl GateActuator for SimHardware {
    async fn command(&mut self, position: GatePosition) -> anyhow::Result<()> {
        self.stall(SimPeripheral::Actuator).await;
        let mut state = self.state.lock();
        if state.actuator_fault {
            bail!("simulated servo failure");
        }
        state.commands.push(position);
        Ok(())
    }
}

#[async_trait]
impl StatusDisplay for SimHardware {
    async fn render(&mut self, frame: &DisplayFrame) -> anyhow::Result<()> {
        self.stall(SimPeripheral::Display).await;
        let mut state = self.state.lock();
        if state.display_fault {
            bail!("simulated display failure");
        }
        state.frames.push(frame.clone());
        Ok(())
    }
}
