//! MQTT publisher for egress telemetry
//!
//! Publishes controller telemetry to MQTT topics for downstream consumers:
//! - parking/available - Available-spot count, plain integer (QoS 1, retained)
//! - parking/status - Occupancy vector and gate state per cycle (QoS 0)
//! - parking/gate - Gate transitions, denials and anomalies (QoS 0)
//! - parking/metrics - Periodic metrics snapshots (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    availability_topic: String,
    status_topic: String,
    events_topic: String,
    metrics_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("parking-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            rx,
            availability_topic: config.mqtt_egress_availability_topic().to_string(),
            status_topic: config.mqtt_egress_status_topic().to_string(),
            events_topic: config.mqtt_egress_events_topic().to_string(),
            metrics_topic: config.mqtt_egress_metrics_topic().to_string(),
        }
    }

    /// Run the publisher loop until shutdown, then drain what is queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            availability = %self.availability_topic,
            status = %self.status_topic,
            events = %self.events_topic,
            metrics = %self.metrics_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                msg = self.rx.recv() => {
                    match msg {
                        Some(msg) => self.publish_message(msg).await,
                        None => {
                            info!("mqtt_egress_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        match msg {
            EgressMessage::Availability(available) => {
                // Retained so a late subscriber sees the current count immediately
                if let Err(e) = self
                    .client
                    .publish(
                        &self.availability_topic,
                        QoS::AtLeastOnce,
                        true,
                        available.to_string().into_bytes(),
                    )
                    .await
                {
                    error!(error = %e, "mqtt_egress_availability_failed");
                }
            }
            EgressMessage::Status(payload) => {
                self.publish_json(&self.status_topic, &payload, "mqtt_egress_status_failed").await;
            }
            EgressMessage::GateEvent(payload) => {
                self.publish_json(&self.events_topic, &payload, "mqtt_egress_gate_failed").await;
            }
            EgressMessage::Metrics(payload) => {
                self.publish_json(&self.metrics_topic, &payload, "mqtt_egress_metrics_failed")
                    .await;
            }
        }
    }

    async fn publish_json<T: Serialize>(&self, topic: &str, payload: &T, failure: &'static str) {
        let json = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, topic = %topic, "mqtt_egress_serialize_failed");
                return;
            }
        };
        if let Err(e) = self.client.publish(topic, QoS::AtMostOnce, false, json.into_bytes()).await
        {
            debug!(error = %e, topic = %topic, "{}", failure);
        }
    }
}
