//! Error types for metadata cache and reconciliation operations

use thiserror::Error;

/// Remote API failures, as seen by the cache subsystem.
///
/// This is a closed set: fetch helpers and reconciliation loops switch on it
/// explicitly instead of inspecting transport-specific error types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The requested resourceVersion has aged out of the server history (HTTP 410).
    #[error("Resource version too old: {message}")]
    Gone { message: String },

    /// Credentials were rejected (HTTP 401).
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    /// Network failures, 5xx responses, generic watch ERROR events.
    #[error("Transient API failure: {message}")]
    Transient { message: String },

    /// The object came back but could not be turned into metadata.
    #[error("Invalid payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("Fatal API failure: {message}")]
    Fatal { message: String },
}

impl ApiError {
    /// Map an HTTP or watch status code onto the closed error set.
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            401 => Self::Unauthorized { message },
            404 => Self::NotFound {
                kind: "object".to_string(),
                name: message,
            },
            408 | 504 => Self::Timeout { operation: message },
            410 => Self::Gone { message },
            400..=499 => Self::Fatal { message },
            _ => Self::Transient { message },
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn invalid_payload(reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            reason: reason.into(),
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Checkpoint persistence errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("Failed to open checkpoint environment: {0}")]
    EnvOpen(String),

    #[error("Failed to open checkpoint database {name}: {reason}")]
    DbOpen { name: String, reason: String },

    #[error("Checkpoint transaction error: {0}")]
    Transaction(String),

    #[error("Checkpoint serialization error: {0}")]
    Serialization(String),

    #[error("Checkpoint I/O error: {0}")]
    Io(String),
}

/// Master error type for the metadata subsystem.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KubeMetaError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Raised when a reconciliation loop has exhausted its retry budget.
    /// The embedding process is expected to restart.
    #[error("Unrecoverable {kind} watch failure after {retries} retries: {last_error}")]
    Unrecoverable {
        kind: String,
        retries: u32,
        last_error: String,
    },
}

impl KubeMetaError {
    /// The API error behind this failure, if any.
    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for metadata operations.
pub type KubeMetaResult<T> = Result<T, KubeMetaError>;

// =============================================================================
// TESTS
// =============================================================================
