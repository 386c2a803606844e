use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Which connection of a partition an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Primary,
    /// Replica by declaration order within its partition.
    Replica(usize),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Replica(index) => write!(f, "replica {}", index),
        }
    }
}

/// Failure reported by a storage collaborator (a single connection handle).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Row decode failed: {0}")]
    Decode(String),

    #[error("Connection is closed")]
    Closed,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// A handle that failed to close during shutdown.
#[derive(Debug)]
pub struct CloseFailure {
    pub partition: usize,
    pub role: Role,
    pub error: StorageError,
}

impl fmt::Display for CloseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to close {} for partition {}: {}",
            self.role, self.partition, self.error
        )
    }
}

#[derive(Error, Debug)]
pub enum ShardError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to connect {role} for partition {partition}: {source}")]
    Connectivity {
        partition: usize,
        role: Role,
        #[source]
        source: StorageError,
    },

    #[error("Record not found: {key}")]
    NotFound { key: String },

    #[error("Write failed on partition {partition}: {source}")]
    WriteFailed {
        partition: usize,
        #[source]
        source: StorageError,
    },

    #[error("Read failed on partition {partition}: {source}")]
    ReadFailed {
        partition: usize,
        #[source]
        source: StorageError,
    },

    #[error("Partition {id} is out of range for partition count {count}")]
    OutOfRange { id: i64, count: usize },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation deadline exceeded")]
    Timeout,

    #[error("Topology is shut down")]
    Closed,

    #[error("Errors closing connections: {}", join_failures(.failures))]
    Shutdown { failures: Vec<CloseFailure> },

    #[error("Lock error: {0}")]
    Lock(String),
}

impl ShardError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// True for application-level absence, as opposed to infrastructure failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when the caller's deadline or cancellation signal ended the operation.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout)
    }
}

fn join_failures(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, ShardError>;

impl<T> From<std::sync::PoisonError<T>> for ShardError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
