//! Test doubles shared by the unit tests

use std::sync::atomic::{AtomicBool, Ordering};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use iot_common::{RequestId, UpdateRequest};
use crate::error::TransportError;
use crate::transport::Transport;

/// Records publishes and subscriptions instead of talking to a broker
#[derive(Default)]
pub struct MockTransport {
    published: Mutex<Vec<(String, Bytes)>>,
    subscriptions: Mutex<Vec<String>>,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    /// Ids of every update request published so far
    pub fn update_request_ids(&self) -> Vec<RequestId> {
        self.published
            .lock()
            .iter()
            .filter_map(|(_, payload)| serde_json::from_slice::<UpdateRequest>(payload).ok())
            .map(|r| r.req_id)
            .collect()
    }

    pub fn last_update_request(&self) -> Option<(String, RequestId)> {
        let published = self.published.lock();
        let (topic, payload) = published.last()?;
        let request: UpdateRequest = serde_json::from_slice(payload).ok()?;
        Some((topic.clone(), request.req_id))
    }

    /// Yield until at least `count` messages have been published
    pub async fn wait_for_publishes(&self, count: usize) {
        for _ in 0..1000 {
            if self.published.lock().len() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {} publishes, saw {}", count, self.published.lock().len());
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Client("broker rejected publish".to_string()));
        }
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, filter: &str) -> Result<(), TransportError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.subscriptions.lock().push(filter.to_string());
        Ok(())
    }
}
