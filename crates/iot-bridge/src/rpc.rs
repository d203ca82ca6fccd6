//! Update requests: request/response over fire-and-forget topics
//!
//! `request_update` allocates a correlation id, publishes `{"reqId": id}` on
//! `bin/<id>/update` and waits for the matching `bin/<id>/update/response`
//! to be fed into the shared [`Correlator`] by the response handler.

use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, warn};

use iot_common::{update_topic, ConnectionState, UpdateRequest};
use crate::correlator::Correlator;
use crate::error::{RpcError, TransportError};
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct UpdateClientConfig {
    /// `None` waits for as long as the connection stays up
    pub request_timeout: Option<Duration>,
}

impl Default for UpdateClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl From<&iot_config::RpcConfig> for UpdateClientConfig {
    fn from(config: &iot_config::RpcConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
        }
    }
}

/// Outbound RPC facade over the correlator and the transport
#[derive(Clone)]
pub struct UpdateClient {
    correlator: Correlator<f64>,
    transport: Arc<dyn Transport>,
    state: watch::Receiver<ConnectionState>,
    config: UpdateClientConfig,
}

impl UpdateClient {
    pub fn new(
        correlator: Correlator<f64>,
        transport: Arc<dyn Transport>,
        state: watch::Receiver<ConnectionState>,
        config: UpdateClientConfig,
    ) -> Self {
        Self { correlator, transport, state, config }
    }

    /// Ask a bin for a fresh reading and wait for its answer
    pub async fn request_update(&self, bin_id: &str) -> Result<f64, RpcError> {
        // Responses are only routed for hex ids, anything else could never complete
        if bin_id.is_empty() || !bin_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RpcError::InvalidTarget(bin_id.to_string()));
        }

        if !self.state.borrow().is_connected() {
            return Err(RpcError::Publish(TransportError::NotConnected.to_string()));
        }

        let (req_id, pending) = self.correlator.create();
        let topic = update_topic(bin_id);

        let payload = match serde_json::to_vec(&UpdateRequest { req_id }) {
            Ok(p) => Bytes::from(p),
            Err(e) => {
                self.correlator.cancel(req_id);
                return Err(RpcError::Publish(e.to_string()));
            }
        };

        if let Err(e) = self.transport.publish(&topic, payload).await {
            self.correlator.cancel(req_id);
            warn!(bin_id = %bin_id, req_id = req_id, error = %e, "Update request publish failed");
            return Err(RpcError::Publish(e.to_string()));
        }

        // A disconnect that raced the publish may have run its bulk reject before the
        // entry existed; any later one still finds the entry pending
        if !self.state.borrow().is_connected() && self.correlator.cancel(req_id) {
            warn!(bin_id = %bin_id, req_id = req_id, "Disconnected while publishing update request");
            return Err(RpcError::Disconnected);
        }

        debug!(bin_id = %bin_id, req_id = req_id, "Update request published, awaiting response");

        let Some(limit) = self.config.request_timeout else {
            return pending.await;
        };

        match tokio::time::timeout(limit, pending).await {
            Ok(completion) => completion,
            Err(_) => {
                self.correlator.cancel(req_id);
                warn!(bin_id = %bin_id, req_id = req_id, timeout = ?limit, "Update request timed out");
                Err(RpcError::Timeout(limit))
            }
        }
    }

    pub fn correlator(&self) -> &Correlator<f64> {
        &self.correlator
    }
}
