//! MQTT subscriber for runtime ACL provisioning
//!
//! Parses add/revoke commands from the ACL topic and forwards them to the
//! control loop. Malformed payloads are logged and discarded.

use crate::infra::config::Config;
use crate::services::authorizer::AclCommand;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Create a bounded ACL command channel
pub fn create_acl_channel(buffer_size: usize) -> (mpsc::Sender<AclCommand>, mpsc::Receiver<AclCommand>) {
    mpsc::channel(buffer_size)
}

/// Subscribe to the ACL topic and forward commands until shutdown
pub async fn start_acl_listener(
    config: &Config,
    acl_tx: mpsc::Sender<AclCommand>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let client_id = format!("parking-acl-{}", std::process::id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);
    let topic = config.acl_topic().to_string();

    info!(topic = %topic, host = %config.mqtt_host(), port = %config.mqtt_port(), "acl_listener_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("acl_listener_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Clean session: resubscribe on every (re)connect
                        if let Err(e) = client.subscribe(topic.as_str(), QoS::AtLeastOnce).await {
                            error!(error = %e, "acl_subscribe_failed");
                        } else {
                            info!(topic = %topic, "acl_subscribed");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if !forward_command(&acl_tx, &publish.payload).await {
                            warn!("acl_channel_closed");
                            return Ok(());
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "acl_mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Parse one ACL payload and hand it to the control loop, waiting for room
/// when the channel is full. Returns false once the loop has gone away.
async fn forward_command(acl_tx: &mpsc::Sender<AclCommand>, payload: &[u8]) -> bool {
    let command = match AclCommand::from_json(payload) {
        Ok(command) => command,
        Err(e) => {
            warn!(error = %e, "acl_message_invalid");
            return true;
        }
    };
    if acl_tx.capacity() == 0 {
        debug!(op = %command.op(), uid = %command.uid(), "acl_channel_full_waiting");
    }
    acl_tx.send(command).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Credential;

    #[tokio::test]
    async fn test_full_channel_waits_instead_of_dropping() {
        let (acl_tx, mut acl_rx) = create_acl_channel(1);
        assert!(forward_command(&acl_tx, br#"{"op":"add","uid":"030C4916"}"#).await);

        // Channel is full: the revoke must be delivered once the loop drains
        let sender = acl_tx.clone();
        let pending = tokio::spawn(async move {
            forward_command(&sender, br#"{"op":"revoke","uid":"030C4916"}"#).await
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        let uid = Credential::from_bytes(&[0x03, 0x0C, 0x49, 0x16]);
        assert_eq!(acl_rx.recv().await, Some(AclCommand::Add(uid.clone())));
        assert!(pending.await.unwrap());
        assert_eq!(acl_rx.recv().await, Some(AclCommand::Revoke(uid)));
    }

    #[tokio::test]
    async fn test_invalid_payload_skipped() {
        let (acl_tx, mut acl_rx) = create_acl_channel(1);
        assert!(forward_command(&acl_tx, b"not json").await);
        assert!(acl_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_reported() {
        let (acl_tx, acl_rx) = create_acl_channel(1);
        drop(acl_rx);
        assert!(!forward_command(&acl_tx, br#"{"op":"add","uid":"030C4916"}"#).await);
    }
}
