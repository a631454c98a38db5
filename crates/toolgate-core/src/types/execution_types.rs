//! Tool execution types

use crate::error::{Error, ErrorCode, ExecutionError, SandboxError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Execution state machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Id allocated, not yet racing
    Pending,
    /// Executor racing against the timeout
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl Default for ExecutionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Advisory resource limits handed to executors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceLimits {
    pub max_memory_bytes: Option<u64>,
    pub max_output_bytes: Option<usize>,
    pub max_file_size: Option<u64>,
}

impl ResourceLimits {
    /// Field-wise merge, values set in `overrides` win
    pub fn merged_with(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            max_memory_bytes: overrides.max_memory_bytes.or(self.max_memory_bytes),
            max_output_bytes: overrides.max_output_bytes.or(self.max_output_bytes),
            max_file_size: overrides.max_file_size.or(self.max_file_size),
        }
    }
}

/// A single tool parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Json(serde_json::Value),
    Binary(Vec<u8>),
}

impl From<serde_json::Value> for ParamValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Json(serde_json::Value::String(s.to_string()))
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::Json(serde_json::Value::String(s))
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Json(serde_json::Value::Bool(b))
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        Self::Json(serde_json::Value::from(n))
    }
}

/// Tool call parameters keyed by name
pub type ToolParams = BTreeMap<String, ParamValue>;

/// Why an execution did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionFailure {
    pub code: ErrorCode,
    pub message: String,
    /// Limit that expired, set for timeouts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl From<&Error> for ExecutionFailure {
    fn from(err: &Error) -> Self {
        let timeout_ms = match err {
            Error::Execution(ExecutionError::Timeout { timeout_ms, .. })
            | Error::Sandbox(SandboxError::OperationTimeout { timeout_ms, .. }) => Some(*timeout_ms),
            _ => None,
        };
        Self {
            code: err.code(),
            message: err.to_string(),
            timeout_ms,
        }
    }
}

impl std::fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of a sandboxed execution
#[derive(Debug, Clone)]
pub struct ExecutionResult<T> {
    pub execution_id: String,
    pub tool_name: String,
    pub success: bool,
    pub status: ExecutionStatus,
    pub result: Option<T>,
    pub error: Option<ExecutionFailure>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
}

impl<T> ExecutionResult<T> {
    /// Convert into a plain `Result`, turning failures back into errors.
    ///
    /// The error keeps the failure's code. Timeouts and cancellations are
    /// rebuilt as their typed variants, anything else carries the recorded
    /// message unchanged.
    pub fn into_result(self) -> crate::error::Result<T> {
        match (self.result, self.error) {
            (Some(value), None) => Ok(value),
            (_, Some(failure)) => Err(match (failure.code, failure.timeout_ms) {
                (ErrorCode::Timeout, Some(timeout_ms)) => Error::Execution(ExecutionError::Timeout {
                    execution_id: self.execution_id,
                    tool_name: self.tool_name,
                    timeout_ms,
                }),
                (ErrorCode::Cancelled, _) => Error::Execution(ExecutionError::Cancelled {
                    execution_id: self.execution_id,
                    tool_name: self.tool_name,
                }),
                _ => Error::Failure(failure),
            }),
            (None, None) => Err(Error::Internal(format!(
                "execution {} finished without a result",
                self.execution_id
            ))),
        }
    }
}

/// Finalized record of one execution, kept in the bounded history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: String,
    pub tool_name: String,
    /// Sanitized copy of the call parameters
    pub params: serde_json::Value,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub source: String,
    pub session_id: String,
}

/// Snapshot of an in-flight execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveExecutionInfo {
    pub id: String,
    pub tool_name: String,
    pub status: ExecutionStatus,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

/// Aggregate statistics computed from the execution history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub average_duration_ms: f64,
    pub by_tool: BTreeMap<String, usize>,
    pub active: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_limits_merge() {
        let defaults = ResourceLimits {
            max_memory_bytes: Some(512),
            max_output_bytes: Some(1024),
            max_file_size: None,
        };
        let overrides = ResourceLimits {
            max_output_bytes: Some(64),
            ..Default::default()
        };
        let merged = defaults.merged_with(&overrides);
        assert_eq!(merged.max_memory_bytes, Some(512));
        assert_eq!(merged.max_output_bytes, Some(64));
        assert_eq!(merged.max_file_size, None);
    }

    fn failed_with(status: ExecutionStatus, err: &Error) -> ExecutionResult<()> {
        ExecutionResult {
            execution_id: "exec-1".into(),
            tool_name: "terminal".into(),
            success: false,
            status,
            result: None,
            error: Some(ExecutionFailure::from(err)),
            started_at: chrono::Utc::now(),
            ended_at: chrono::Utc::now(),
            duration_ms: 0,
        }
    }

    #[test]
    fn test_into_result_failure() {
        let cancelled = Error::Execution(ExecutionError::Cancelled {
            execution_id: "exec-1".into(),
            tool_name: "terminal".into(),
        });
        let err = failed_with(ExecutionStatus::Cancelled, &cancelled)
            .into_result()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Cancelled);
    }

    #[test]
    fn test_into_result_keeps_timeout() {
        let timeout = Error::Execution(ExecutionError::Timeout {
            execution_id: "exec-1".into(),
            tool_name: "terminal".into(),
            timeout_ms: 20,
        });
        let failure = ExecutionFailure::from(&timeout);
        assert_eq!(failure.timeout_ms, Some(20));

        let err = failed_with(ExecutionStatus::Failed, &timeout)
            .into_result()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(err.to_string(), timeout.to_string());
    }

    #[test]
    fn test_into_result_keeps_code_and_message() {
        let denied = Error::Sandbox(SandboxError::FileTooLarge {
            path: "/tmp/big.bin".into(),
            size: 64,
            max: 16,
        });
        let err = failed_with(ExecutionStatus::Failed, &denied)
            .into_result()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileTooLarge);
        assert_eq!(err.to_string(), denied.to_string());
    }

    #[test]
    fn test_failure_without_timeout_skips_field() {
        let failure = ExecutionFailure::from(&Error::Internal("boom".into()));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json, serde_json::json!({
            "code": "INTERNAL_ERROR",
            "message": "Internal error: boom",
        }));
    }
}
