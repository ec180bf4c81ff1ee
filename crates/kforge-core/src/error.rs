use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid value for {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("required field {0} is missing")]
    RequiredField(String),

    #[error("unexpected zone: {0}")]
    InvalidZone(String),

    #[error("invalid etcd member spec {value:?}: {message}")]
    InvalidMemberSpec { value: String, message: String },

    #[error("failed to read {path}: {message}")]
    ReadFailed { path: PathBuf, message: String },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CoreError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
