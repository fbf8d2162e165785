//! Error types for the solmig core library.

use serde::{Deserialize, Serialize};

/// Coarse error category surfaced to callers alongside the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Parse,
    Collaborator,
    CacheState,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Input => "input",
            ErrorKind::Parse => "parse",
            ErrorKind::Collaborator => "collaborator",
            ErrorKind::CacheState => "cache_state",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Top-level error enum for the solmig core library.
///
/// Every variant owns plain strings so the error can be cloned and handed
/// to all callers waiting on the same in-flight stage computation.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MigrationError {
    #[error("Invalid repository identifier: {0}")]
    InvalidRepository(String),

    #[error("Parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("{service} failed: {message}")]
    Collaborator { service: String, message: String },

    #[error("No {stage} artifact available for {key}: {reason}")]
    MissingUpstream {
        key: String,
        stage: String,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MigrationError {
    pub fn collaborator(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Collaborator {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn parse(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::InvalidRepository(_) => ErrorKind::Input,
            MigrationError::Parse { .. } => ErrorKind::Parse,
            MigrationError::Collaborator { .. } => ErrorKind::Collaborator,
            MigrationError::MissingUpstream { .. } => ErrorKind::CacheState,
            MigrationError::Config(_) => ErrorKind::Config,
            MigrationError::Io(_) | MigrationError::Json(_) | MigrationError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Structured form handed to callers instead of a raw error chain.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<std::io::Error> for MigrationError {
    fn from(err: std::io::Error) -> Self {
        MigrationError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MigrationError {
    fn from(err: serde_json::Error) -> Self {
        MigrationError::Json(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MigrationError {
    fn from(err: tokio::task::JoinError) -> Self {
        MigrationError::Internal(format!("worker task failed: {err}"))
    }
}

#[cfg(feature = "python")]
impl From<MigrationError> for pyo3::PyErr {
    fn from(err: MigrationError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
        match err.kind() {
            ErrorKind::Input | ErrorKind::Parse | ErrorKind::Config => {
                PyValueError::new_err(err.to_string())
            }
            ErrorKind::Internal if matches!(err, MigrationError::Io(_)) => {
                PyIOError::new_err(err.to_string())
            }
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

/// Serializable `{kind, message}` error payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

pub type MigrationResult<T> = Result<T, MigrationError>;
