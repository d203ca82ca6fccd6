//! Internet of Trash MQTT Bridge
//!
//! This crate connects waste bins to the backend over MQTT:
//! - Correlator: matches update responses to outstanding requests by `reqId`
//! - TopicRouter: pattern-based dispatch of inbound messages to handlers
//! - UpdateClient: request/response over `bin/<id>/update` topics with timeouts
//! - Bridge: composition root fed by session lifecycle events
//! - Session: `rumqttc` event loop driver with reconnect backoff
//! - MeasurementRepository: persistence seam (in-memory, MongoDB behind the `mongo` feature)

pub mod error;
pub mod correlator;
pub mod topic;
pub mod transport;
pub mod repository;
pub mod handlers;
pub mod rpc;
pub mod bridge;
pub mod session;

#[cfg(feature = "mongo")]
pub mod mongo;

#[cfg(test)]
mod testing;

pub use error::{PatternError, RpcError, TransportError};
pub use correlator::{Completion, Correlator, PendingResponse};
pub use topic::{handler_fn, CaptureClass, TopicHandler, TopicParams, TopicPattern, TopicRouter};
pub use transport::{MqttTransport, Transport};
pub use repository::{InMemoryMeasurementRepository, MeasurementRepository};
pub use handlers::{HandlerStats, MeasurementHandler, UpdateResponseHandler};
pub use rpc::{UpdateClient, UpdateClientConfig};
pub use bridge::{Bridge, SessionEvent};
pub use session::{run_session, Backoff};

#[cfg(feature = "mongo")]
pub use mongo::MongoMeasurementRepository;
