//! MQTT status publisher
//!
//! Publishes presence status to the broker at QoS 0 without the retain flag.
//! A background task drives the client event loop and reconnects after
//! errors. Publishes made while the broker is unreachable fail immediately
//! instead of being queued, so a stale status is never delivered late.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ClientError, Event, EventLoop, MqttOptions, Packet, QoS};
use tracing::{debug, info, warn};

use super::graceful_shutdown::{spawn_until_shutdown, ShutdownSignal};
use super::{NotifyError, StatusPublisher};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Capacity of the client request queue
    pub queue_capacity: usize,
}

impl MqttConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            host: host.into(),
            port,
            client_id: format!("rfid-ledger-{}", &suffix[..8]),
            keep_alive: Duration::from_secs(15),
            queue_capacity: 16,
        }
    }

    /// Load from `MQTT_HOST`, `MQTT_PORT` and `MQTT_CLIENT_ID`.
    ///
    /// Returns `None` when `MQTT_HOST` is unset, which disables notifications.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("MQTT_HOST").ok().filter(|h| !h.trim().is_empty())?;

        let port: u16 = std::env::var("MQTT_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(1883);

        let mut config = Self::new(host.trim(), port);
        if let Ok(client_id) = std::env::var("MQTT_CLIENT_ID") {
            if !client_id.trim().is_empty() {
                config.client_id = client_id.trim().to_string();
            }
        }
        Some(config)
    }
}

/// MQTT-backed [`StatusPublisher`]
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl MqttPublisher {
    /// Create the client and start driving its event loop until shutdown
    pub fn start(config: &MqttConfig, shutdown: ShutdownSignal) -> Self {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive);
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, config.queue_capacity);
        let connected = Arc::new(AtomicBool::new(false));

        info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            "Starting MQTT client"
        );
        spawn_until_shutdown(shutdown, drive_event_loop(eventloop, connected.clone()));

        Self { client, connected }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

async fn drive_event_loop(mut eventloop: EventLoop, connected: Arc<AtomicBool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                connected.store(true, Ordering::SeqCst);
                info!("Connected to MQTT broker");
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                warn!("MQTT broker closed the connection");
            }
            Ok(event) => debug!(?event, "MQTT event"),
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    warn!(error = %e, "Lost MQTT connection");
                } else {
                    debug!(error = %e, "MQTT broker unreachable, retrying");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl StatusPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), NotifyError> {
        if !self.is_connected() {
            return Err(NotifyError::Publish("not connected to MQTT broker".to_string()));
        }

        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| match e {
                ClientError::TryRequest(_) => {
                    NotifyError::Publish("MQTT request queue is full".to_string())
                }
                other => NotifyError::Publish(other.to_string()),
            })
    }
}

/// Publisher used when no broker is configured; every publish is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPublisher;

#[async_trait]
impl StatusPublisher for DisabledPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), NotifyError> {
        debug!(topic, payload, "Notifications disabled, skipping publish");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::ShutdownCoordinator;

    #[test]
    fn test_config_defaults() {
        let config = MqttConfig::new("10.0.0.5", 1883);
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 1883);
        assert!(config.client_id.starts_with("rfid-ledger-"));
        assert_eq!(config.client_id.len(), "rfid-ledger-".len() + 8);
    }

    #[tokio::test]
    async fn test_publish_fails_fast_without_broker() {
        let coordinator = ShutdownCoordinator::new();
        // Nothing listens on port 1 locally.
        let publisher = MqttPublisher::start(&MqttConfig::new("127.0.0.1", 1), coordinator.signal());

        let result = publisher.publish("RFID_LOGIN", "1").await;
        assert!(matches!(result, Err(NotifyError::Publish(_))));

        coordinator.shutdown();
    }

    #[tokio::test]
    async fn test_disabled_publisher_accepts_everything() {
        assert!(DisabledPublisher.publish("RFID_LOGIN", "0").await.is_ok());
    }
}
