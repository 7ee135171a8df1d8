use std::borrow::Cow;

use crate::classify;
use crate::IsolationLevel;

/// Boxed error as reported by a [`Driver`](crate::Driver) or a unit of work.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for handle and transaction operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for handle and transaction operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open database: {0}")]
    Connect(#[source] BoxError),

    #[error("there is already a transaction in progress")]
    AlreadyInTransaction,

    #[error("failed to acquire connection: {0}")]
    Acquire(#[source] BoxError),

    #[error("failed to begin {isolation} transaction: {source}")]
    Begin {
        isolation: IsolationLevel,
        #[source]
        source: BoxError,
    },

    #[error("unit of work failed under {isolation}: {source}")]
    Work {
        isolation: IsolationLevel,
        #[source]
        source: BoxError,
    },

    #[error("failed to commit {isolation} transaction: {source}")]
    Commit {
        isolation: IsolationLevel,
        #[source]
        source: BoxError,
    },

    /// The failure mentions SQLSTATE `40001` but carries no structured code,
    /// so it was not retried.
    #[error("serialization failure under {isolation}: {source}")]
    SerializationFailure {
        isolation: IsolationLevel,
        #[source]
        source: Box<Error>,
    },

    #[error("exceeded max retries ({attempts} attempts under {isolation}): {source}")]
    RetriesExhausted {
        isolation: IsolationLevel,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("{operation} failed: {source}")]
    Driver {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("{operation} succeeded but the affected row count is unavailable: {source}")]
    Result {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("query returned no rows")]
    RowNotFound,

    #[error("transaction is no longer active")]
    TransactionClosed,

    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Whether this error carries a structured SQLSTATE `40001` anywhere in
    /// its source chain.
    pub fn is_serialization_failure(&self) -> bool {
        classify::is_serialization_failure(self)
    }

    /// First structured SQLSTATE found in the source chain.
    pub fn sqlstate(&self) -> Option<Cow<'_, str>> {
        classify::sqlstate(self)
    }

    /// Whether the error came from the context rather than the database.
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}
