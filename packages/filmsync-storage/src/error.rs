//! Error types for filmsync-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Relational query errors (malformed SQL, auth, decode)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// Document index rejected a request (bad mapping, 4xx)
    Index,
    /// Network-level failure talking to a backend (refused, timeout, 5xx)
    Transport,
    /// Configuration errors
    Config,
    /// I/O errors
    IO,
    /// Requested document or key does not exist
    NotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Index => "index",
            ErrorKind::Transport => "transport",
            ErrorKind::Config => "config",
            ErrorKind::IO => "io",
            ErrorKind::NotFound => "not_found",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
    /// Set when the failure is worth retrying (connection refused, pool timeout, 503...)
    pub transient: bool,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            transient: kind == ErrorKind::Transport,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn with_transient(mut self, transient: bool) -> Self {
        self.transient = transient;
        self
    }

    // Convenience constructors
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn index(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, format!("Not found: {}", what.into()))
    }

    /// Whether a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        self.transient
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        // Pool exhaustion and socket errors heal on their own; query errors don't
        let transient = matches!(
            err,
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
        );
        StorageError::database(format!("PostgreSQL error: {}", err))
            .with_transient(transient)
            .with_source(err)
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        let transient = err.is_connect()
            || err.is_timeout()
            || err.is_request()
            || err.status().map_or(false, |s| is_retryable_status(s.as_u16()));
        let kind = if transient {
            ErrorKind::Transport
        } else {
            ErrorKind::Index
        };
        StorageError::new(kind, format!("HTTP error: {}", err))
            .with_transient(transient)
            .with_source(err)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::database(format!("SQLite error: {}", err)).with_source(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {}", err)).with_source(err)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::new(ErrorKind::IO, format!("I/O error: {}", err)).with_source(err)
    }
}

/// HTTP statuses an index backend returns while overloaded or restarting
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;
