//! Parking gate controller
//!
//! Runs the access-and-occupancy control loop for a small parking facility:
//! authenticate a card, raise the barrier, confirm the vehicle has passed,
//! lower it again, and track free spots throughout.
//!
//! Module structure:
//! - `domain/` - Core types (Credential, GateState, OccupancySnapshot)
//! - `io/` - External interfaces (serial bridge, display, MQTT, Prometheus)
//! - `services/` - Control logic (sampler, authorizer, passage, gate, controller)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use parking_gate::infra::{Config, HardwareMode, Metrics};
use parking_gate::io::{
    create_acl_channel, create_egress_channel, start_acl_listener, LogDisplay, MqttPublisher,
    Peripherals, SerialBridge, SimHardware,
};
use parking_gate::services::ParkingController;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Parking gate controller - access control and occupancy tracking
#[derive(Parser, Debug)]
#[command(name = "parking-gate", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Render status frames to the log instead of the bridge display
    #[arg(long)]
    log_display: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-cycle detail
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(revision = %env!("PARKING_GATE_REVISION"), "parking-gate starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));

    // A gate must not run on guessed settings
    let config = Config::from_file(&config_path)?;

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        spots = %config.spot_count(),
        authorized = %config.authorized_uids().len(),
        passage_threshold_cm = %config.passage_threshold_cm(),
        closing_grace_ms = %config.closing_grace().as_millis(),
        max_open_ms = %config.max_open().as_millis(),
        cycle_ms = %config.cycle_period().as_millis(),
        hardware = ?config.hardware_mode(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    let peripherals = match config.hardware_mode() {
        HardwareMode::Serial => {
            let bridge = SerialBridge::open(&config)
                .with_context(|| format!("opening hardware link {}", config.hardware_device()))?;
            let peripherals = Peripherals::from_shared(bridge);
            if args.log_display {
                peripherals.with_display(Box::new(LogDisplay::new()))
            } else {
                peripherals
            }
        }
        HardwareMode::Sim => {
            info!("hardware_simulated");
            let hw = SimHardware::new(vec![Some(0); config.spot_count()]);
            Peripherals::from_shared(hw).with_display(Box::new(LogDisplay::new()))
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_site = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = parking_gate::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_site,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Periodic metrics summary in the log
    let metrics_log = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_log.report().log();
        }
    });

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) =
            create_egress_channel(256, config.site_id().to_string(), metrics.clone());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        let metrics_egress = egress_sender.clone();
        let metrics_for_egress = metrics.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(egress_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                metrics_egress.send_metrics(metrics_for_egress.report());
            }
        });

        Some(egress_sender)
    } else {
        None
    };

    let mut controller = ParkingController::new(config.clone(), peripherals, metrics, egress_sender);

    // Runtime ACL provisioning (if enabled)
    if config.acl_enabled() {
        let (acl_tx, acl_rx) = create_acl_channel(32);
        controller = controller.with_acl(acl_rx);
        let acl_config = config.clone();
        let acl_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_acl_listener(&acl_config, acl_tx, acl_shutdown).await {
                tracing::error!(error = %e, "ACL listener error");
            }
        });
    }

    controller.start().await?;

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    controller.run(shutdown_rx).await;

    info!("parking-gate shutdown complete");
    Ok(())
}
