//! Broker transport seam and its MQTT implementation

use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use tracing::debug;

use iot_config::MqttConfig;
use crate::error::TransportError;

/// Minimum keepalive accepted by the MQTT client
const MIN_KEEPALIVE_SECS: u64 = 5;

/// Publish/subscribe primitives of a broker session
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;
    async fn subscribe(&self, filter: &str) -> Result<(), TransportError>;
}

/// MQTT transport backed by `rumqttc`.
///
/// The paired [`EventLoop`] must be driven by [`crate::session::run_session`]
/// for any request issued here to reach the broker.
pub struct MqttTransport {
    client: AsyncClient,
    qos: QoS,
}

impl MqttTransport {
    pub fn new(config: &MqttConfig) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(&config.client_id, &config.broker_ip, config.broker_port);
        options.set_keep_alive(Duration::from_secs(config.keepalive_interval.max(MIN_KEEPALIVE_SECS)));
        options.set_clean_session(true);
        if let Some(user) = &config.auth_user {
            options.set_credentials(user, config.auth_psw.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, config.request_capacity);
        let transport = Self {
            client,
            qos: qos_from_level(config.qos),
        };
        (transport, eventloop)
    }

    /// Ask the broker for a clean disconnect
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        debug!(topic = %topic, bytes = payload.len(), "Publishing");
        self.client
            .publish_bytes(topic, self.qos, false, payload)
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(filter, self.qos)
            .await
            .map_err(|e| TransportError::Client(e.to_string()))
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}
