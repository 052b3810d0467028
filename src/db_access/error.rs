use std::time::Duration;
use thiserror::Error;

/// Failure reported by a data-store call.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or is temporarily refusing work.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The caller handed the store data that violates its invariants.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// The store answered, but the query itself failed. Not retried, but
    /// still counted against the store's health.
    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    /// Whether retrying the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match err.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::OperationInterrupted
                | ErrorCode::OutOfMemory,
            ) => StoreError::Unavailable(err.to_string()),
            Some(ErrorCode::ConstraintViolation) => StoreError::Invalid(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        }
    }
}

/// Failure of a call routed through the [`QueryExecutor`](super::QueryExecutor).
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The named timeout profile does not exist. This is a programming error.
    #[error("unknown timeout profile '{0}'")]
    UnknownProfile(String),

    #[error("circuit breaker is open, retry in {remaining:?}")]
    CircuitOpen { remaining: Duration },

    #[error("query under profile '{profile}' timed out after {timeout:?}")]
    Timeout { profile: String, timeout: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExecutionError {
    /// Whether the failure may be retried under a retry-enabled profile.
    pub fn is_transient(&self) -> bool {
        match self {
            ExecutionError::Timeout { .. } => true,
            ExecutionError::Store(e) => e.is_transient(),
            ExecutionError::UnknownProfile(_) | ExecutionError::CircuitOpen { .. } => false,
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::UnknownProfile(_) => "unknown_profile",
            ExecutionError::CircuitOpen { .. } => "circuit_open",
            ExecutionError::Timeout { .. } => "timeout",
            ExecutionError::Store(StoreError::Unavailable(_)) => "unavailable",
            ExecutionError::Store(StoreError::Invalid(_)) => "invalid",
            ExecutionError::Store(StoreError::Query(_)) => "query",
        }
    }
}
