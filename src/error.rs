//! Error types for tasklog
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, invalid names, unknown task ids)
//! - 3: State conflict (illegal transition, failed precondition)
//! - 4: Operation failed (unreplayable log, IO, serialization)

use std::path::PathBuf;
use thiserror::Error;

use crate::task::{Category, ProgressStatus, TaskId};

/// Exit codes for the tasklog CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const STATE_CONFLICT: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for tasklog operations
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors (exit code 2)
    #[error("Invalid task name: {0}")]
    InvalidName(String),

    #[error("Invalid context: {0}")]
    InvalidContext(String),

    #[error("Cannot {operation} task {task_id} with category {category:?}")]
    InvalidCategory {
        task_id: TaskId,
        operation: &'static str,
        category: Category,
    },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task id already in use: {0}")]
    DuplicateTaskId(TaskId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // State conflicts (exit code 3)
    #[error("Cannot {operation} task {task_id} while it is {status:?}")]
    InvalidStateTransition {
        task_id: TaskId,
        operation: &'static str,
        status: ProgressStatus,
    },

    #[error("Cannot {operation} task {task_id}: {reason}")]
    PreconditionFailed {
        task_id: TaskId,
        operation: &'static str,
        reason: String,
    },

    // Reconstruction and operation failures (exit code 4)
    #[error("Unreplayable {event_type} event for task {task_id}: {reason}")]
    UnreplayableEvent {
        event_type: String,
        task_id: TaskId,
        reason: String,
    },

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    #[error("Malformed {event_type} event for task {task_id}: missing or invalid `{field}`")]
    MalformedEvent {
        event_type: String,
        task_id: TaskId,
        field: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::InvalidName(_)
            | Error::InvalidContext(_)
            | Error::InvalidCategory { .. }
            | Error::TaskNotFound(_)
            | Error::DuplicateTaskId(_)
            | Error::InvalidConfig(_)
            | Error::InvalidArgument(_) => exit_codes::USER_ERROR,

            // State conflicts
            Error::InvalidStateTransition { .. } | Error::PreconditionFailed { .. } => {
                exit_codes::STATE_CONFLICT
            }

            // Operation failures
            Error::UnreplayableEvent { .. }
            | Error::UnknownEventType(_)
            | Error::MalformedEvent { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured context for JSON output, when the variant names a task.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::InvalidStateTransition {
                task_id,
                operation,
                status,
            } => Some(serde_json::json!({
                "task_id": task_id,
                "operation": operation,
                "status": status,
            })),
            Error::PreconditionFailed {
                task_id, operation, ..
            } => Some(serde_json::json!({
                "task_id": task_id,
                "operation": operation,
            })),
            Error::InvalidCategory {
                task_id,
                operation,
                category,
            } => Some(serde_json::json!({
                "task_id": task_id,
                "operation": operation,
                "category": category,
            })),
            Error::UnreplayableEvent {
                event_type,
                task_id,
                ..
            }
            | Error::MalformedEvent {
                event_type,
                task_id,
                ..
            } => Some(serde_json::json!({
                "event_type": event_type,
                "task_id": task_id,
            })),
            _ => None,
        }
    }

    pub(crate) fn transition(task_id: &str, operation: &'static str, status: ProgressStatus) -> Self {
        Error::InvalidStateTransition {
            task_id: task_id.to_string(),
            operation,
            status,
        }
    }

    pub(crate) fn precondition(
        task_id: &str,
        operation: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Error::PreconditionFailed {
            task_id: task_id.to_string(),
            operation,
            reason: reason.into(),
        }
    }
}

/// Result type alias for tasklog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
