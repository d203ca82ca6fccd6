//! MQTT session driver
//!
//! Polls the `rumqttc` event loop, turns broker traffic into [`SessionEvent`]s
//! for the [`Bridge`] and reconnects with exponential backoff when the
//! connection drops. Runs until the shutdown channel fires.

use std::sync::Arc;
use std::time::Duration;
use rumqttc::{ConnectReturnCode, Event, EventLoop, Incoming};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, SessionEvent};

const INITIAL_BACKOFF_MS: u64 = 5000;    // 5 seconds
const MAX_BACKOFF_MS: u64 = 60000;       // 60 seconds
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Reconnect delay, doubled after every consecutive failure
#[derive(Debug)]
pub struct Backoff {
    current_ms: u64,
    failures: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { current_ms: INITIAL_BACKOFF_MS, failures: 0 }
    }

    /// Delay to wait now; advances the next delay
    pub fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_millis(self.current_ms);
        self.failures += 1;
        self.current_ms = ((self.current_ms as f64 * BACKOFF_MULTIPLIER) as u64).min(MAX_BACKOFF_MS);
        delay
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.current_ms = INITIAL_BACKOFF_MS;
        self.failures = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive the broker connection until shutdown
pub async fn run_session(
    bridge: Arc<Bridge>,
    mut eventloop: EventLoop,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut backoff = Backoff::new();
    bridge.handle_event(SessionEvent::Connecting).await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("MQTT session shutting down");
                break;
            }
            polled = eventloop.poll() => match polled {
                Ok(event) => {
                    if let Some(session_event) = session_event(event) {
                        if matches!(session_event, SessionEvent::Connected) {
                            backoff.reset();
                        }
                        // Spawned handler and subscription tasks run detached; only
                        // this loop drains the client's request queue
                        bridge.handle_event(session_event).await;
                    }
                }
                Err(e) => {
                    bridge
                        .handle_event(SessionEvent::Disconnected { reason: e.to_string() })
                        .await;

                    let delay = backoff.next_delay();
                    warn!(
                        attempt = backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "MQTT connection error, reconnecting"
                    );

                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!("MQTT session shutting down");
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    bridge.handle_event(SessionEvent::Connecting).await;
                }
            }
        }
    }

    bridge
        .handle_event(SessionEvent::Disconnected { reason: "shutdown".to_string() })
        .await;
}

/// Map a raw client event to a bridge event; outgoing traffic and acks are ignored
fn session_event(event: Event) -> Option<SessionEvent> {
    match event {
        Event::Incoming(Incoming::ConnAck(ack)) => {
            if ack.code == ConnectReturnCode::Success {
                info!(session_present = ack.session_present, "Connected to MQTT broker");
                Some(SessionEvent::Connected)
            } else {
                warn!(code = ?ack.code, "MQTT broker refused connection");
                None
            }
        }
        Event::Incoming(Incoming::Publish(publish)) => {
            debug!(topic = %publish.topic, bytes = publish.payload.len(), "Message received");
            Some(SessionEvent::Message {
                topic: publish.topic,
                payload: publish.payload,
            })
        }
        Event::Incoming(Incoming::Disconnect) => Some(SessionEvent::Disconnected {
            reason: "broker sent disconnect".to_string(),
        }),
        _ => None,
    }
}
