//! Parking gate simulator
//!
//! Runs the real control loop against simulated peripherals and plays a
//! scripted day at the gate:
//! - an unknown card is refused
//! - an authorized car arrives, drives through and parks
//! - a second authorized card opens the gate but nobody drives through,
//!   so the max-open guard closes it
//! - a parked car leaves
//!
//! Usage:
//!   cargo run --bin parking-sim -- --config config/sim.toml

use clap::Parser;
use parking_gate::domain::types::Credential;
use parking_gate::infra::{Config, HardwareMode, Metrics};
use parking_gate::io::{create_egress_channel, LogDisplay, MqttPublisher, Peripherals, SimHardware};
use parking_gate::services::ParkingController;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "parking-sim")]
#[command(about = "Run the parking controller against simulated hardware")]
struct Args {
    /// Config file path (defaults are used if it cannot be loaded)
    #[arg(short, long, default_value = "config/sim.toml")]
    config: String,

    /// Override the max-open guard to shorten the abandoned-gate scene
    #[arg(long)]
    max_open_ms: Option<u64>,
}

/// Raw reading of an empty spot and of a parked car
const EMPTY: u16 = 100;
const PARKED: u16 = 900;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let mut config = Config::load_from_path(&args.config).with_hardware_mode(HardwareMode::Sim);
    if let Some(max_open_ms) = args.max_open_ms {
        let closing_grace = config.closing_grace();
        config = config.with_gate_timing(closing_grace, Duration::from_millis(max_open_ms));
        config.validate()?;
    }

    let authorized = config
        .authorized_uids()
        .first()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("the simulation needs at least one authorized card"))?;

    info!(
        config_file = %config.config_file(),
        spots = %config.spot_count(),
        max_open_ms = %config.max_open().as_millis(),
        "parking-sim starting"
    );

    // Spot 0 starts occupied, the rest empty
    let mut channels = vec![Some(EMPTY); config.spot_count()];
    channels[0] = Some(PARKED);
    let hw = SimHardware::new(channels);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) =
            create_egress_channel(256, config.site_id().to_string(), metrics.clone());
        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });
        Some(egress_sender)
    } else {
        None
    };

    let peripherals =
        Peripherals::from_shared(hw.clone()).with_display(Box::new(LogDisplay::new()));
    let mut controller =
        ParkingController::new(config.clone(), peripherals, metrics.clone(), egress_sender);
    controller.start().await?;

    let scenario = tokio::spawn(play_scenario(hw, config.clone(), authorized, shutdown_tx));

    controller.run(shutdown_rx).await;
    scenario.await?;

    metrics.report().log();
    info!("parking-sim finished");
    Ok(())
}

async fn play_scenario(
    hw: SimHardware,
    config: Config,
    authorized: Credential,
    shutdown_tx: watch::Sender<bool>,
) {
    let cycle = config.cycle_period();
    let free_spot = config.spot_count().saturating_sub(1);

    sleep(cycle * 2).await;
    info!("scene: unknown card");
    hw.present_card(Credential::from_bytes(&[0xDE, 0xAD, 0xBE, 0xEF]));

    sleep(cycle * 4).await;
    info!("scene: authorized arrival");
    hw.present_card(authorized.clone());
    hw.script_distances(&[Some(150.0), Some(60.0), Some(25.0), Some(9.0)]);

    // Through the barrier, then into the last spot
    sleep(cycle * 6 + config.closing_grace()).await;
    info!(spot = %free_spot, "scene: car parks");
    hw.set_channel(free_spot, Some(PARKED));

    sleep(cycle * 4).await;
    info!("scene: gate opened, nobody drives through");
    hw.present_card(authorized);
    sleep(config.max_open() + cycle * 2).await;

    info!("scene: car leaves spot 0");
    hw.set_channel(0, Some(EMPTY));
    sleep(cycle * 4).await;

    info!(commands = ?hw.commands(), "scene: done");
    let _ = shutdown_tx.send(true);
}
