//! API Endpoint Tests
//!
//! Tests for:
//! - Health endpoint
//! - Forced bin update (success, device error, timeout, disconnected)
//! - Bulk measurement upload

use std::sync::Arc;
use std::time::Duration;
use axum::{
    body::Body,
    http::{Request, StatusCode, Method},
};
use tower::ServiceExt;
use http_body_util::BodyExt;
use async_trait::async_trait;
use bytes::Bytes;

use iot_bridge::{
    Bridge, InMemoryMeasurementRepository, MeasurementRepository, SessionEvent, Transport,
    TransportError, UpdateClientConfig,
};
use iot_common::{Measurement, UpdateRequest};

use iot_api::create_router;

/// Mock transport recording publishes
struct MockTransport {
    published: parking_lot::Mutex<Vec<(String, Bytes)>>,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            published: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn last_req_id(&self) -> Option<u32> {
        let published = self.published.lock();
        let (_, payload) = published.last()?;
        serde_json::from_slice::<UpdateRequest>(payload).ok().map(|r| r.req_id)
    }

    async fn wait_for_request(&self) -> u32 {
        for _ in 0..1000 {
            if let Some(id) = self.last_req_id() {
                return id;
            }
            tokio::task::yield_now().await;
        }
        panic!("no update request was published");
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }

    async fn subscribe(&self, _filter: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Repository that always fails
struct BrokenRepository;

#[async_trait]
impl MeasurementRepository for BrokenRepository {
    async fn record_measurement(&self, _measurement: &Measurement) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("connection reset"))
    }

    async fn record_many(&self, _measurements: &[Measurement]) -> anyhow::Result<usize> {
        Err(anyhow::anyhow!("connection reset"))
    }
}

struct TestApp {
    app: axum::Router,
    bridge: Arc<Bridge>,
    transport: Arc<MockTransport>,
    repository: Arc<InMemoryMeasurementRepository>,
}

async fn create_test_app(config: UpdateClientConfig, connected: bool) -> TestApp {
    let transport = Arc::new(MockTransport::new());
    let repository = Arc::new(InMemoryMeasurementRepository::new());
    let bridge = Arc::new(Bridge::new(transport.clone(), repository.clone(), config).unwrap());
    if connected {
        if let Some(subscriptions) = bridge.handle_event(SessionEvent::Connected).await {
            subscriptions.await.unwrap();
        }
    }

    TestApp {
        app: create_router(bridge.clone()),
        bridge,
        transport,
        repository,
    }
}

async fn get_body_json(body: Body) -> serde_json::Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap()
}

async fn answer(bridge: &Bridge, bin_id: &str, body: String) {
    let event = SessionEvent::Message {
        topic: format!("bin/{}/update/response", bin_id),
        payload: Bytes::from(body),
    };
    if let Some(handle) = bridge.handle_event(event).await {
        handle.await.unwrap();
    }
}

// ============================================================================
// Health Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_health_reports_connection_state() {
    let t = create_test_app(UpdateClientConfig::default(), true).await;

    let response = t.app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["status"], "UP");
    assert_eq!(json["bridge"]["connectionState"], "CONNECTED");
    assert_eq!(json["bridge"]["pendingRequests"], 0);
}

#[tokio::test]
async fn test_health_degraded_when_disconnected() {
    let t = create_test_app(UpdateClientConfig::default(), false).await;

    let response = t.app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["status"], "DEGRADED");
    assert_eq!(json["bridge"]["connectionState"], "DISCONNECTED");
}

// ============================================================================
// Forced Update Tests
// ============================================================================

#[tokio::test]
async fn test_update_returns_device_value() {
    let t = create_test_app(UpdateClientConfig::default(), true).await;

    let call = tokio::spawn(t.app.clone().oneshot(post("/api/bins/a1/update", Body::empty())));
    let req_id = t.transport.wait_for_request().await;
    answer(&t.bridge, "a1", format!(r#"{{"reqId":{},"status":"ok","value":42}}"#, req_id)).await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["value"], 42.0);
}

#[tokio::test]
async fn test_update_device_error_is_bad_gateway() {
    let t = create_test_app(UpdateClientConfig::default(), true).await;

    let call = tokio::spawn(t.app.clone().oneshot(post("/api/bins/a1/update", Body::empty())));
    let req_id = t.transport.wait_for_request().await;
    answer(
        &t.bridge,
        "a1",
        format!(r#"{{"reqId":{},"status":"error","error":"Lid not closed."}}"#, req_id),
    )
    .await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["error"], "Lid not closed.");
}

#[tokio::test]
async fn test_update_timeout_is_gateway_timeout() {
    let config = UpdateClientConfig { request_timeout: Some(Duration::from_millis(50)) };
    let t = create_test_app(config, true).await;

    let response = t.app
        .oneshot(post("/api/bins/a1/update", Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(t.bridge.stats().pending_requests, 0);
}

#[tokio::test]
async fn test_update_while_disconnected_is_unavailable() {
    let t = create_test_app(UpdateClientConfig::default(), false).await;

    let response = t.app
        .oneshot(post("/api/bins/a1/update", Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(t.transport.published.lock().is_empty());
}

#[tokio::test]
async fn test_update_rejects_non_hex_bin() {
    let t = create_test_app(UpdateClientConfig::default(), true).await;

    let response = t.app
        .oneshot(post("/api/bins/not-a-bin/update", Body::empty()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Bulk Measurement Tests
// ============================================================================

#[tokio::test]
async fn test_bulk_measurements_stored() {
    let t = create_test_app(UpdateClientConfig::default(), true).await;
    let body = r#"[
        {"timestamp":"2018-05-04T10:15:00Z","binId":"a1","value":10},
        {"timestamp":"2018-05-04T10:20:00Z","binId":"a1","value":20},
        {"timestamp":"2018-05-04T10:25:00Z","binId":"b2","value":55.5}
    ]"#;

    let response = t.app
        .oneshot(post("/api/bulkmeasurements", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = get_body_json(response.into_body()).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["inserted"], 3);
    assert_eq!(t.repository.len(), 3);
    assert_eq!(t.repository.all()[1].value, 20.0);
}

#[tokio::test]
async fn test_bulk_measurements_from_gateway() {
    let t = create_test_app(UpdateClientConfig::default(), true).await;
    // Shape produced by the RPi gateway: naive UTC timestamps with microseconds
    let body = r#"[
        {"timestamp":"2018-05-04T10:15:00.123456","binId":"000000000000000000000001","value":42},
        {"timestamp":"2018-05-04T10:16:00.654321","binId":"000000000000000000000002","value":7}
    ]"#;

    let response = t.app
        .oneshot(post("/api/bulkmeasurements", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let stored = t.repository.all();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].bin_id, "000000000000000000000001");
    assert_eq!(stored[0].timestamp.to_rfc3339(), "2018-05-04T10:15:00.123456+00:00");
}

#[tokio::test]
async fn test_bulk_measurements_invalid_body() {
    let t = create_test_app(UpdateClientConfig::default(), true).await;

    for body in [r#"{"binId":"a1"}"#, r#"[{"binId":"a1","value":1}]"#, "not json"] {
        let response = t.app
            .clone()
            .oneshot(post("/api/bulkmeasurements", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = get_body_json(response.into_body()).await;
        assert_eq!(json["error"], "Invalid request.");
    }
    assert!(t.repository.is_empty());
}

#[tokio::test]
async fn test_bulk_measurements_rejects_blank_bin_id() {
    let t = create_test_app(UpdateClientConfig::default(), true).await;
    let body = r#"[
        {"timestamp":"2018-05-04T10:15:00Z","binId":"a1","value":10},
        {"timestamp":"2018-05-04T10:20:00Z","binId":"  ","value":20}
    ]"#;

    let response = t.app
        .oneshot(post("/api/bulkmeasurements", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(t.repository.is_empty());
}

#[tokio::test]
async fn test_bulk_measurements_storage_failure() {
    let transport = Arc::new(MockTransport::new());
    let bridge = Arc::new(
        Bridge::new(transport, Arc::new(BrokenRepository), UpdateClientConfig::default()).unwrap(),
    );
    let app = create_router(bridge);
    let body = serde_json::to_string(&vec![Measurement::new("a1", 12.0)]).unwrap();

    let response = app
        .oneshot(post("/api/bulkmeasurements", body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
