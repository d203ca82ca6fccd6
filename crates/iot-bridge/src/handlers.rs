//! Built-in inbound handlers
//!
//! Malformed payloads are logged and dropped here; only persistence failures
//! escape to the router's supervisor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use iot_common::{Measurement, ResponseOutcome, UpdateResponse};
use crate::correlator::Correlator;
use crate::error::RpcError;
use crate::repository::MeasurementRepository;
use crate::topic::{TopicHandler, TopicParams};

/// Route for unsolicited readings
pub const MEASUREMENT_PATTERN: &str = "bin/{id:hex}/measurement";
/// Route for answers to update requests
pub const UPDATE_RESPONSE_PATTERN: &str = "bin/{id:hex}/update/response";

/// Counters shared by the built-in handlers
#[derive(Debug, Default)]
pub struct HandlerStats {
    measurements_recorded: AtomicU64,
    responses_matched: AtomicU64,
    dropped: AtomicU64,
}

impl HandlerStats {
    pub fn measurements_recorded(&self) -> u64 {
        self.measurements_recorded.load(Ordering::Relaxed)
    }

    pub fn responses_matched(&self) -> u64 {
        self.responses_matched.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Persists readings from `bin/<id>/measurement`
pub struct MeasurementHandler {
    repository: Arc<dyn MeasurementRepository>,
    stats: Arc<HandlerStats>,
}

impl MeasurementHandler {
    pub fn new(repository: Arc<dyn MeasurementRepository>, stats: Arc<HandlerStats>) -> Self {
        Self { repository, stats }
    }
}

#[async_trait]
impl TopicHandler for MeasurementHandler {
    async fn handle(&self, payload: Bytes, params: TopicParams) -> anyhow::Result<()> {
        let bin_id = params.get("id").unwrap_or_default();

        let measurement: Measurement = match serde_json::from_slice(&payload) {
            Ok(m) => m,
            Err(e) => {
                self.stats.record_drop();
                warn!(bin_id = %bin_id, error = %e, "Malformed measurement payload, dropping");
                return Ok(());
            }
        };

        if let Err(e) = measurement.validate() {
            self.stats.record_drop();
            warn!(bin_id = %bin_id, error = %e, "Invalid measurement, dropping");
            return Ok(());
        }

        if !measurement.bin_id.eq_ignore_ascii_case(bin_id) {
            self.stats.record_drop();
            warn!(
                bin_id = %bin_id,
                payload_bin_id = %measurement.bin_id,
                "Measurement published on another bin's topic, dropping"
            );
            return Ok(());
        }

        self.repository
            .record_measurement(&measurement)
            .await
            .with_context(|| format!("storing measurement for bin {}", bin_id))?;

        self.stats.measurements_recorded.fetch_add(1, Ordering::Relaxed);
        info!(bin_id = %bin_id, value = measurement.value, "New measurement");
        Ok(())
    }
}

/// Feeds `bin/<id>/update/response` messages into the correlator
pub struct UpdateResponseHandler {
    correlator: Correlator<f64>,
    stats: Arc<HandlerStats>,
}

impl UpdateResponseHandler {
    pub fn new(correlator: Correlator<f64>, stats: Arc<HandlerStats>) -> Self {
        Self { correlator, stats }
    }
}

#[async_trait]
impl TopicHandler for UpdateResponseHandler {
    async fn handle(&self, payload: Bytes, params: TopicParams) -> anyhow::Result<()> {
        let bin_id = params.get("id").unwrap_or_default();

        let response: UpdateResponse = match serde_json::from_slice(&payload) {
            Ok(r) => r,
            Err(e) => {
                self.stats.record_drop();
                warn!(bin_id = %bin_id, error = %e, "Malformed update response, dropping");
                return Ok(());
            }
        };

        debug!(bin_id = %bin_id, req_id = response.req_id, status = ?response.status, "Response for update request");

        let completed = match response.outcome() {
            ResponseOutcome::Value(value) => self.correlator.resolve(response.req_id, value),
            ResponseOutcome::DeviceError(message) => {
                self.correlator.reject(response.req_id, RpcError::Device(message))
            }
            ResponseOutcome::MissingValue => self.correlator.reject(
                response.req_id,
                RpcError::InvalidResponse("status ok without a numeric value".to_string()),
            ),
        };

        if completed {
            self.stats.responses_matched.fetch_add(1, Ordering::Relaxed);
        } else {
            // Late, duplicate or foreign response
            debug!(bin_id = %bin_id, req_id = response.req_id, "Unknown request id, ignoring response");
        }
        Ok(())
    }
}
