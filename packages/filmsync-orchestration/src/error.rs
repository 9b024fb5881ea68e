use filmsync_storage::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: Box<OrchestratorError>,
    },

    #[error("Index '{index}' rejected {failed} documents (first: {first_error})")]
    BulkRejected {
        index: String,
        failed: usize,
        first_error: String,
    },

    #[error("Producer '{producer}' returned a page that does not advance its watermark")]
    StalledCursor { producer: String },

    #[error("Producer '{producer}' row has no usable state field '{field}'")]
    MissingStateField { producer: String, field: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// Retry classification
    ///
    /// Only storage errors flagged transient (connection refused, timeouts,
    /// overload statuses) are worth another attempt. Local I/O failures on the
    /// cursor file need an operator.
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestratorError::Storage(e) if e.is_transient() => ErrorCategory::Transient,
            OrchestratorError::Io(_) => ErrorCategory::Infrastructure,
            OrchestratorError::RetryExhausted { .. } => ErrorCategory::Infrastructure,
            _ => ErrorCategory::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Transient error - retry automatically (e.g., timeout, connection)
    Transient,
    /// Permanent error - don't retry (e.g., malformed query, mapping conflict)
    Permanent,
    /// Infrastructure error - alert ops (e.g., index unreachable after all retries)
    Infrastructure,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Infrastructure => "infrastructure",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
