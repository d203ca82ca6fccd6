use serde::{de, Deserialize, Deserializer, Serialize};
use chrono::{DateTime, NaiveDateTime, Utc};

// ============================================================================
// Topic Layout
// ============================================================================

/// Topic the server publishes update requests on
pub fn update_topic(bin_id: &str) -> String {
    format!("bin/{}/update", bin_id)
}

// ============================================================================
// Wire Message Types
// ============================================================================

/// Correlation id embedded in an update request and echoed in its response.
/// Zero is never allocated.
pub type RequestId = u32;

/// A fill-level reading pushed by a bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    /// RFC 3339, or ISO-8601 without an offset (read as UTC) as the RPi gateway sends it
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub bin_id: String,
    pub value: f64,
}

impl Measurement {
    pub fn new(bin_id: impl Into<String>, value: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            bin_id: bin_id.into(),
            value,
        }
    }

    /// Structural checks that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.bin_id.trim().is_empty() {
            return Err(IotError::Validation("binId must not be empty".to_string()));
        }
        if !self.value.is_finite() {
            return Err(IotError::Validation(format!(
                "value must be a finite number, got {}",
                self.value
            )));
        }
        Ok(())
    }
}

/// Body of `bin/<id>/update`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub req_id: RequestId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Body of `bin/<id>/update/response`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResponse {
    /// Devices may echo the id as a number or a numeric string
    #[serde(deserialize_with = "deserialize_request_id")]
    pub req_id: RequestId,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What a response means for the waiting caller
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Value(f64),
    DeviceError(String),
    /// `status: "ok"` without a usable value
    MissingValue,
}

impl UpdateResponse {
    pub fn ok(req_id: RequestId, value: f64) -> Self {
        Self { req_id, status: ResponseStatus::Ok, value: Some(value), error: None }
    }

    pub fn error(req_id: RequestId, error: impl Into<String>) -> Self {
        Self { req_id, status: ResponseStatus::Error, value: None, error: Some(error.into()) }
    }

    pub fn outcome(&self) -> ResponseOutcome {
        match self.status {
            ResponseStatus::Ok => match self.value {
                Some(v) if v.is_finite() => ResponseOutcome::Value(v),
                _ => ResponseOutcome::MissingValue,
            },
            ResponseStatus::Error => ResponseOutcome::DeviceError(
                self.error
                    .clone()
                    .unwrap_or_else(|| "Device reported an unspecified error".to_string()),
            ),
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;

    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    raw.parse::<NaiveDateTime>()
        .map(|naive| naive.and_utc())
        .map_err(|e| de::Error::custom(format!("invalid timestamp '{}': {}", raw, e)))
}

fn deserialize_request_id<'de, D>(deserializer: D) -> std::result::Result<RequestId, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => RequestId::try_from(n)
            .map_err(|_| de::Error::custom(format!("reqId {} out of range", n))),
        Raw::Text(s) => s
            .trim()
            .parse::<RequestId>()
            .map_err(|e| de::Error::custom(format!("reqId '{}' is not an integer: {}", s, e))),
    }
}

// ============================================================================
// Connection & Health Types
// ============================================================================

/// Broker session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    pub connection_state: ConnectionState,
    pub pending_requests: usize,
    pub messages_routed: u64,
    pub messages_unrouted: u64,
    pub measurements_recorded: u64,
    pub messages_dropped: u64,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IotError {
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, IotError>;
