//! Job domain types

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Opaque job identifier assigned by the coordination service
///
/// The service may send either a string or a number; both are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        JobId::from_value(&value).ok_or_else(|| {
            serde::de::Error::custom(format!("job id must be a string or number, got {}", value))
        })
    }
}

impl JobId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

/// Staged edit configuration carried by a job
///
/// The pipeline is kept as raw JSON: validating its shape is the pipeline
/// engine's job, and a bad pipeline must still be reported as a job failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobConfig {
    /// Returns the stage list if the pipeline is a non-empty array
    pub fn stages(&self) -> Option<&[Value]> {
        match &self.pipeline {
            Some(Value::Array(stages)) if !stages.is_empty() => Some(stages.as_slice()),
            _ => None,
        }
    }
}

/// A unit of work handed out by `GET /job/next`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    #[serde(rename = "jobId")]
    pub id: JobId,
    pub config: JobConfig,
}

/// Errors raised while decoding a job envelope
#[derive(Debug, Error)]
pub enum JobDecodeError {
    #[error("malformed job envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("job envelope is not a JSON object")]
    NotAnObject,

    #[error("job envelope has no usable jobId")]
    MissingJobId,

    #[error("job envelope has no config")]
    MissingConfig,

    #[error("job config is invalid: {0}")]
    InvalidConfig(String),
}

impl Job {
    /// Decodes a job envelope from the raw response body
    pub fn from_json(body: &str) -> Result<Self, JobDecodeError> {
        let value: Value = serde_json::from_str(body)?;
        Self::from_value(value)
    }

    /// Decodes a job envelope from an already parsed JSON value
    pub fn from_value(value: Value) -> Result<Self, JobDecodeError> {
        let Value::Object(mut envelope) = value else {
            return Err(JobDecodeError::NotAnObject);
        };

        let id = envelope
            .get("jobId")
            .and_then(JobId::from_value)
            .ok_or(JobDecodeError::MissingJobId)?;

        let config = match envelope.remove("config") {
            None | Some(Value::Null) => return Err(JobDecodeError::MissingConfig),
            Some(config @ Value::Object(_)) => serde_json::from_value::<JobConfig>(config)
                .map_err(|e| JobDecodeError::InvalidConfig(e.to_string()))?,
            Some(other) => {
                return Err(JobDecodeError::InvalidConfig(format!(
                    "expected an object, got {}",
                    other
                )));
            }
        };

        Ok(Self { id, config })
    }
}

/// Terminal status reported to `POST /job/{jobId}/result`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failure,
}

/// Body of the result submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResultPayload {
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobResultPayload {
    pub fn success() -> Self {
        Self {
            status: ResultStatus::Success,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Failure,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}
