//! Transport messages
//!
//! Every message exchanged over the emulated push channel is an envelope of
//! the form `{type, timestamp, ...fields}`. The `outbound` module holds the
//! fixed vocabulary of messages the agent sends.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message type names used by the agent and the coordination service
pub mod kind {
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    pub const DISCONNECTED: &str = "disconnected";
    pub const DISCONNECT: &str = "disconnect";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
    pub const REGISTER: &str = "register";
    pub const SUBSCRIBE: &str = "subscribe";
    pub const JOB_CREATED: &str = "job_created";
    pub const JOB_PROGRESS: &str = "job_progress";
    pub const STAGE_COMPLETED: &str = "stage_completed";
    pub const JOB_STARTED: &str = "job_started";
    pub const JOB_COMPLETED: &str = "job_completed";
    pub const JOB_FAILED: &str = "job_failed";
    pub const ERROR_OCCURRED: &str = "error_occurred";
    pub const PROCESSING_METRICS: &str = "processing_metrics";
}

/// A typed, timestamped envelope
///
/// `kind` is optional because inbound messages are not trusted to carry one;
/// the dispatcher and the sender both reject messages without it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Unix seconds on outbound messages; inbound values are kept as sent
    /// since peers may use fractional seconds or RFC 3339 strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            timestamp: None,
            fields: Map::new(),
        }
    }

    /// Adds (or replaces) a type-specific field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref().filter(|k| !k.is_empty())
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Stamps the given time unless the message already carries one
    pub fn stamp_if_missing(&mut self, now: i64) {
        if self.timestamp.is_none() {
            self.timestamp = Some(Value::from(now));
        }
    }
}

/// Builders for the messages the agent sends
///
/// Optional fields are always present on the wire with an empty default so
/// consumers never have to special-case a missing key.
pub mod outbound {
    use super::{Message, kind};
    use serde_json::{Map, Value, json};

    fn or_empty_object(details: Option<Value>) -> Value {
        details.unwrap_or_else(|| Value::Object(Map::new()))
    }

    /// Client identification sent right after a successful handshake
    pub fn register(client_type: &str, client_name: &str, version: &str) -> Message {
        Message::new(kind::REGISTER)
            .with("client_type", client_type)
            .with("client_name", client_name)
            .with("version", version)
    }

    pub fn subscribe(channels: &[String]) -> Message {
        Message::new(kind::SUBSCRIBE).with("channels", json!(channels))
    }

    pub fn ping() -> Message {
        Message::new(kind::PING)
    }

    pub fn disconnect() -> Message {
        Message::new(kind::DISCONNECT)
    }

    /// Local notification emitted to listeners when the channel drops
    pub fn disconnected(reason: &str) -> Message {
        Message::new(kind::DISCONNECTED).with("reason", reason)
    }

    /// Progress of a running job; `percent` is clamped to 0..=100
    pub fn job_progress(
        job_id: &str,
        stage: &str,
        percent: f64,
        message: Option<&str>,
        details: Option<Value>,
    ) -> Message {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        Message::new(kind::JOB_PROGRESS)
            .with("job_id", job_id)
            .with("stage", stage)
            .with("progress", percent)
            .with("message", message.unwrap_or_default())
            .with("details", or_empty_object(details))
    }

    pub fn stage_completed(job_id: &str, stage: &str, result: Option<Value>) -> Message {
        Message::new(kind::STAGE_COMPLETED)
            .with("job_id", job_id)
            .with("stage", stage)
            .with("result", or_empty_object(result))
    }

    pub fn job_started(job_id: &str, photo_id: &str, photo_info: Option<Value>) -> Message {
        Message::new(kind::JOB_STARTED)
            .with("job_id", job_id)
            .with("photo_id", photo_id)
            .with("photo_info", or_empty_object(photo_info))
    }

    /// Terminal job message; `duration` is in seconds
    pub fn job_completed(job_id: &str, success: bool, result: Option<Value>, duration: f64) -> Message {
        let kind = if success {
            kind::JOB_COMPLETED
        } else {
            kind::JOB_FAILED
        };
        Message::new(kind)
            .with("job_id", job_id)
            .with("success", success)
            .with("result", or_empty_object(result))
            .with("duration", duration)
    }

    pub fn job_failed(job_id: &str, result: Option<Value>, duration: f64) -> Message {
        job_completed(job_id, false, result, duration)
    }

    pub fn error_occurred(
        error_type: &str,
        message: &str,
        details: Option<Value>,
        stage: Option<&str>,
    ) -> Message {
        Message::new(kind::ERROR_OCCURRED)
            .with("error_type", error_type)
            .with("message", message)
            .with("details", or_empty_object(details))
            .with("stage", stage.map(Value::from).unwrap_or(Value::Null))
    }

    pub fn processing_metrics(metrics: Map<String, Value>) -> Message {
        Message::new(kind::PROCESSING_METRICS).with("metrics", Value::Object(metrics))
    }
}
