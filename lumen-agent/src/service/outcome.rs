//! Per-operation and per-stage outcomes
//!
//! Every assignment the engine attempts is recorded as an `OperationOutcome`.
//! A failed operation never stops its stage; the stage's status summarises
//! how many of its operations went through.

use serde::Serialize;
use serde_json::Value;

use crate::host::HostError;

/// Result of one attempted assignment (setting, curve, or preset)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationOutcome {
    pub key: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationOutcome {
    pub fn applied(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ok: true,
            error: None,
        }
    }

    pub fn failed(key: impl Into<String>, error: impl ToString) -> Self {
        Self {
            key: key.into(),
            ok: false,
            error: Some(error.to_string()),
        }
    }

    pub fn from_result(key: impl Into<String>, result: Result<(), HostError>) -> Self {
        match result {
            Ok(()) => Self::applied(key),
            Err(e) => Self::failed(key, e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Every operation succeeded (or there was nothing to do)
    Applied,
    /// Some operations failed
    Partial,
    /// Every operation failed
    Failed,
    /// Unknown or malformed stage; nothing attempted
    Skipped,
}

/// What happened to one pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcome {
    pub index: usize,
    pub total: usize,
    pub name: String,
    pub status: StageStatus,
    pub operations: Vec<OperationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl StageOutcome {
    pub fn from_operations(
        index: usize,
        total: usize,
        name: &str,
        operations: Vec<OperationOutcome>,
    ) -> Self {
        let failed = operations.iter().filter(|op| !op.ok).count();
        let status = if failed == 0 {
            StageStatus::Applied
        } else if failed == operations.len() {
            StageStatus::Failed
        } else {
            StageStatus::Partial
        };

        Self {
            index,
            total,
            name: name.to_string(),
            status,
            operations,
            note: None,
        }
    }

    pub fn skipped(index: usize, total: usize, name: &str, reason: impl Into<String>) -> Self {
        Self {
            index,
            total,
            name: name.to_string(),
            status: StageStatus::Skipped,
            operations: Vec::new(),
            note: Some(reason.into()),
        }
    }

    pub fn applied_count(&self) -> usize {
        self.operations.iter().filter(|op| op.ok).count()
    }

    pub fn failed_count(&self) -> usize {
        self.operations.len() - self.applied_count()
    }

    /// Share of the pipeline finished once this stage is done, 0..=100
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.index + 1) as f64 * 100.0 / self.total as f64
    }

    /// JSON form used in `stage_completed` messages
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
