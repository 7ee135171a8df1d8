//! Serialization-failure classification.
//!
//! Errors may reach the runner from either supported driver, each with its own
//! structured database error type. The SQLSTATE is extracted from every link
//! of the `source()` chain against the known error types in a fixed order;
//! matching the code inside the message text is only a last resort.

use std::borrow::Cow;
use std::error::Error as StdError;

use sqlx::postgres::PgDatabaseError;
use tokio_postgres::error::DbError;

/// SQLSTATE `serialization_failure`.
pub const SERIALIZATION_FAILURE: &str = "40001";

/// How confidently an error was recognised as a serialization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A structured driver error with SQLSTATE `40001`. Retryable.
    SerializationFailure,
    /// No structured code anywhere in the chain, but a message mentions
    /// `40001`. Reported as a serialization failure, never retried.
    Suspected,
    Other,
}

/// Error types that can carry a SQLSTATE.
trait SqlState {
    fn sqlstate(&self) -> Option<Cow<'_, str>>;
}

impl SqlState for sqlx::Error {
    fn sqlstate(&self) -> Option<Cow<'_, str>> {
        self.as_database_error().and_then(|db| db.code())
    }
}

impl SqlState for PgDatabaseError {
    fn sqlstate(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.code()))
    }
}

impl SqlState for tokio_postgres::Error {
    fn sqlstate(&self) -> Option<Cow<'_, str>> {
        self.code().map(|state| Cow::Borrowed(state.code()))
    }
}

impl SqlState for DbError {
    fn sqlstate(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.code().code()))
    }
}

fn extract<'a, T>(err: &'a (dyn StdError + 'static)) -> Option<Cow<'a, str>>
where
    T: SqlState + StdError + 'static,
{
    err.downcast_ref::<T>().and_then(|e| e.sqlstate())
}

fn structured_code<'a>(err: &'a (dyn StdError + 'static)) -> Option<Cow<'a, str>> {
    extract::<sqlx::Error>(err)
        .or_else(|| extract::<PgDatabaseError>(err))
        .or_else(|| extract::<tokio_postgres::Error>(err))
        .or_else(|| extract::<DbError>(err))
}

fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |&e| e.source())
}

/// First structured SQLSTATE found while walking the source chain.
pub fn sqlstate<'a>(err: &'a (dyn StdError + 'static)) -> Option<Cow<'a, str>> {
    chain(err).find_map(structured_code)
}

pub fn classify(err: &(dyn StdError + 'static)) -> Classification {
    match sqlstate(err) {
        Some(code) if code == SERIALIZATION_FAILURE => Classification::SerializationFailure,
        Some(_) => Classification::Other,
        None if chain(err).any(|e| e.to_string().contains(SERIALIZATION_FAILURE)) => {
            Classification::Suspected
        }
        None => Classification::Other,
    }
}

/// Only structured matches count; see [`Classification::Suspected`].
pub fn is_serialization_failure(err: &(dyn StdError + 'static)) -> bool {
    classify(err) == Classification::SerializationFailure
}
