//! Bridge - wires the correlator, topic router and handlers to one transport session
//!
//! Session lifecycle events are fed in through [`Bridge::handle_event`]:
//! - Connected: (re-)subscribe to every filter the routing table needs, on a
//!   separate task since the client's request queue is drained by the session loop
//! - Disconnected: reject all outstanding update requests
//! - Message: route to the first matching handler

use std::sync::Arc;
use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use iot_common::{BridgeStats, ConnectionState};
use crate::correlator::Correlator;
use crate::error::{PatternError, RpcError};
use crate::handlers::{
    HandlerStats, MeasurementHandler, UpdateResponseHandler,
    MEASUREMENT_PATTERN, UPDATE_RESPONSE_PATTERN,
};
use crate::repository::MeasurementRepository;
use crate::rpc::{UpdateClient, UpdateClientConfig};
use crate::topic::TopicRouter;
use crate::transport::Transport;

/// Transport session event
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connecting,
    Connected,
    Disconnected { reason: String },
    Message { topic: String, payload: Bytes },
}

pub struct Bridge {
    transport: Arc<dyn Transport>,
    router: TopicRouter,
    correlator: Correlator<f64>,
    client: UpdateClient,
    repository: Arc<dyn MeasurementRepository>,
    stats: Arc<HandlerStats>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Bridge {
    /// Build a bridge with the measurement and update-response routes registered
    pub fn new(
        transport: Arc<dyn Transport>,
        repository: Arc<dyn MeasurementRepository>,
        config: UpdateClientConfig,
    ) -> Result<Self, PatternError> {
        let correlator = Correlator::new();
        let stats = Arc::new(HandlerStats::default());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let router = TopicRouter::new();
        router.register(
            MEASUREMENT_PATTERN,
            Arc::new(MeasurementHandler::new(repository.clone(), stats.clone())),
        )?;
        router.register(
            UPDATE_RESPONSE_PATTERN,
            Arc::new(UpdateResponseHandler::new(correlator.clone(), stats.clone())),
        )?;

        let client = UpdateClient::new(correlator.clone(), transport.clone(), state_rx, config);

        Ok(Self {
            transport,
            router,
            correlator,
            client,
            repository,
            stats,
            state_tx,
        })
    }

    /// Routing table; extra routes registered before connecting get subscribed too
    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    pub fn repository(&self) -> &Arc<dyn MeasurementRepository> {
        &self.repository
    }

    pub fn update_client(&self) -> &UpdateClient {
        &self.client
    }

    /// Ask a bin for a fresh reading
    pub async fn request_update(&self, bin_id: &str) -> Result<f64, RpcError> {
        self.client.request_update(bin_id).await
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Apply a session event. For messages and connects, returns the handle of the
    /// spawned handler or subscription task.
    pub async fn handle_event(&self, event: SessionEvent) -> Option<JoinHandle<()>> {
        match event {
            SessionEvent::Connecting => {
                self.set_state(ConnectionState::Connecting);
                None
            }
            SessionEvent::Connected => {
                self.set_state(ConnectionState::Connected);
                Some(self.spawn_subscriptions())
            }
            SessionEvent::Disconnected { reason } => {
                self.set_state(ConnectionState::Disconnected);
                let rejected = self.correlator.reject_all(RpcError::Disconnected);
                if rejected > 0 {
                    warn!(reason = %reason, rejected = rejected, "Disconnected with pending update requests");
                } else {
                    info!(reason = %reason, "Disconnected from broker");
                }
                None
            }
            SessionEvent::Message { topic, payload } => self.router.dispatch(&topic, payload),
        }
    }

    fn spawn_subscriptions(&self) -> JoinHandle<()> {
        let filters = self.router.subscription_filters();
        let transport = self.transport.clone();

        tokio::spawn(async move {
            let mut failed = 0;
            for filter in &filters {
                if let Err(e) = transport.subscribe(filter).await {
                    failed += 1;
                    error!(filter = %filter, error = %e, "Error subscribing to topic");
                }
            }

            if failed == 0 {
                info!(filters = ?filters, "MQTT subscriptions completed");
            }
        })
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Connection state changed");
        }
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            connection_state: self.connection_state(),
            pending_requests: self.correlator.pending_count(),
            messages_routed: self.router.routed_count(),
            messages_unrouted: self.router.unrouted_count(),
            measurements_recorded: self.stats.measurements_recorded(),
            messages_dropped: self.stats.dropped() + self.router.failed_count(),
        }
    }
}
