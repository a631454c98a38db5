//! Error types for Toolgate Core

use crate::types::{ExecutionFailure, FileOperation};
use serde::Serialize;
use thiserror::Error;

/// Main error type for Toolgate operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// A recorded execution failure turned back into an error
    #[error("{0}")]
    Failure(ExecutionFailure),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// File access and path errors
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Access denied for {operation} on {path}: {reason}")]
    AccessDenied {
        path: String,
        operation: FileOperation,
        reason: String,
        is_blocked: bool,
    },

    #[error("File too large: {path} is {size} bytes (max {max})")]
    FileTooLarge { path: String, size: u64, max: u64 },

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("{operation} on {path} timed out after {timeout_ms}ms")]
    OperationTimeout {
        operation: FileOperation,
        path: String,
        timeout_ms: u64,
    },

    #[error("{operation} on {path} failed: {source}")]
    OperationFailed {
        operation: FileOperation,
        path: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Terminal denied: {0}")]
    TerminalDenied(String),
}

/// Tool execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Concurrency limit reached ({limit} executions in flight), rejected {tool_name}")]
    ConcurrencyLimit { tool_name: String, limit: usize },

    #[error("Tool '{tool_name}' timed out after {timeout_ms}ms (execution {execution_id})")]
    Timeout {
        execution_id: String,
        tool_name: String,
        timeout_ms: u64,
    },

    #[error("Tool '{tool_name}' was cancelled (execution {execution_id})")]
    Cancelled {
        execution_id: String,
        tool_name: String,
    },

    #[error("Tool '{tool_name}' panicked (execution {execution_id}): {message}")]
    Panicked {
        execution_id: String,
        tool_name: String,
        message: String,
    },
}

/// Stable, machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PathValidationError,
    AccessDenied,
    ConcurrencyLimit,
    Timeout,
    ExecutionError,
    Cancelled,
    FileTooLarge,
    NotFound,
    IoError,
    ConfigError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathValidationError => "PATH_VALIDATION_ERROR",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::ConcurrencyLimit => "CONCURRENCY_LIMIT",
            Self::Timeout => "TIMEOUT",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::NotFound => "NOT_FOUND",
            Self::IoError => "IO_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Sandbox(e) => match e {
                SandboxError::AccessDenied { .. } | SandboxError::TerminalDenied(_) => {
                    ErrorCode::AccessDenied
                }
                SandboxError::FileTooLarge { .. } => ErrorCode::FileTooLarge,
                SandboxError::FileNotFound(_) | SandboxError::DirectoryNotFound(_) => {
                    ErrorCode::NotFound
                }
                SandboxError::InvalidPath(_) => ErrorCode::PathValidationError,
                SandboxError::OperationTimeout { .. } => ErrorCode::Timeout,
                SandboxError::OperationFailed { source, .. } => source.code(),
            },
            Error::Execution(e) => match e {
                ExecutionError::ConcurrencyLimit { .. } => ErrorCode::ConcurrencyLimit,
                ExecutionError::Timeout { .. } => ErrorCode::Timeout,
                ExecutionError::Cancelled { .. } => ErrorCode::Cancelled,
                ExecutionError::Panicked { .. } => ErrorCode::ExecutionError,
            },
            Error::Failure(failure) => failure.code,
            Error::Config(_) | Error::Regex(_) => ErrorCode::ConfigError,
            Error::Io(_) | Error::Json(_) => ErrorCode::IoError,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether this error marks a path that can never be allowed
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            Error::Sandbox(SandboxError::AccessDenied { is_blocked: true, .. })
        )
    }
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
