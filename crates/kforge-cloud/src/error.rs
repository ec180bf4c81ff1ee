//! Engine error types

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Engine errors
///
/// Every variant raised for a task or resource names it in the message.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("{task}: required field {field} is not set")]
    RequiredField { task: String, field: String },

    #[error("{task}: field {field} cannot be changed (actual={actual}, expected={expected})")]
    CannotChangeField {
        task: String,
        field: String,
        actual: String,
        expected: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Duplicate task: {0}")]
    DuplicateTask(String),

    #[error("{task}: depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("Dependency cycle between tasks: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("{task}: existing resource differs in {}", .fields.join(", "))]
    ValidationFailed { task: String, fields: Vec<String> },

    #[error("{task}: required resource does not exist")]
    MissingRequiredResource { task: String },

    #[error("{task}: shared resource does not exist")]
    MissingSharedResource { task: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("Transient error during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("{operation} failed after {attempts} attempts: {message}")]
    OperationFailed {
        operation: String,
        attempts: u32,
        message: String,
    },

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("{kind} {name} is owned by cluster {owner:?}")]
    OwnershipConflict {
        kind: String,
        name: String,
        owner: String,
    },

    #[error("Deletion is stuck, remaining: {}", .0.join(", "))]
    DeletionStuck(Vec<String>),

    #[error("Found {count} {kind} resources matching {name}")]
    AmbiguousFind {
        kind: String,
        name: String,
        count: usize,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("{kind} does not support {operation}")]
    Unsupported { kind: String, operation: String },

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Model error: {0}")]
    Model(#[from] kforge_core::CoreError),

    #[error("Config error: {0}")]
    Config(#[from] kforge_config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stable, machine-readable discriminator of a [`CloudError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Configuration,
    NotFound,
    Transient,
    OperationFailed,
    AlreadyExists,
    Conflict,
    DeletionStuck,
    AmbiguousFind,
    Cancelled,
    Unsupported,
    Credentials,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Transient => "transient",
            ErrorKind::OperationFailed => "operation-failed",
            ErrorKind::AlreadyExists => "already-exists",
            ErrorKind::Conflict => "conflict",
            ErrorKind::DeletionStuck => "deletion-stuck",
            ErrorKind::AmbiguousFind => "ambiguous-find",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Credentials => "credentials",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CloudError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CloudError::RequiredField { .. }
            | CloudError::CannotChangeField { .. }
            | CloudError::InvalidConfig(_)
            | CloudError::DuplicateTask(_)
            | CloudError::UnknownDependency { .. }
            | CloudError::DependencyCycle(_)
            | CloudError::ValidationFailed { .. }
            | CloudError::Model(_) => ErrorKind::Configuration,
            CloudError::Config(kforge_config::ConfigError::MissingEnvVar(_)) => {
                ErrorKind::Credentials
            }
            CloudError::Config(_) => ErrorKind::Configuration,
            CloudError::MissingRequiredResource { .. }
            | CloudError::MissingSharedResource { .. }
            | CloudError::NotFound { .. } => ErrorKind::NotFound,
            CloudError::Transient { .. } => ErrorKind::Transient,
            CloudError::OperationFailed { .. } | CloudError::Timeout(_) => {
                ErrorKind::OperationFailed
            }
            CloudError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            CloudError::OwnershipConflict { .. } => ErrorKind::Conflict,
            CloudError::DeletionStuck(_) => ErrorKind::DeletionStuck,
            CloudError::AmbiguousFind { .. } => ErrorKind::AmbiguousFind,
            CloudError::Cancelled | CloudError::DeadlineExceeded => ErrorKind::Cancelled,
            CloudError::Unsupported { .. } => ErrorKind::Unsupported,
            CloudError::Credentials(_) => ErrorKind::Credentials,
            CloudError::Json(_) => ErrorKind::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    pub fn required(task: impl fmt::Display, field: impl Into<String>) -> Self {
        CloudError::RequiredField {
            task: task.to_string(),
            field: field.into(),
        }
    }

    pub fn cannot_change(
        task: impl fmt::Display,
        field: impl Into<String>,
        actual: impl fmt::Display,
        expected: impl fmt::Display,
    ) -> Self {
        CloudError::CannotChangeField {
            task: task.to_string(),
            field: field.into(),
            actual: actual.to_string(),
            expected: expected.to_string(),
        }
    }

    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        CloudError::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(kind: impl Into<String>, operation: impl Into<String>) -> Self {
        CloudError::Unsupported {
            kind: kind.into(),
            operation: operation.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
