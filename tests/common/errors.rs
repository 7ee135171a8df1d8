use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;

use postgres_tx_retry::BoxError;
use sqlx::error::{DatabaseError, ErrorKind};

/// Database error as the sqlx Postgres driver would report it.
#[derive(Debug)]
pub struct FakePgError {
    code: &'static str,
    message: &'static str,
}

impl fmt::Display for FakePgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

impl StdError for FakePgError {}

impl DatabaseError for FakePgError {
    fn message(&self) -> &str {
        self.message
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.code))
    }

    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> ErrorKind {
        match self.code {
            "23505" => ErrorKind::UniqueViolation,
            _ => ErrorKind::Other,
        }
    }
}

pub fn db_error(code: &'static str, message: &'static str) -> sqlx::Error {
    sqlx::Error::Database(Box::new(FakePgError { code, message }))
}

pub fn serialization_failure() -> sqlx::Error {
    db_error(
        "40001",
        "could not serialize access due to concurrent update",
    )
}

pub fn unique_violation() -> sqlx::Error {
    db_error("23505", "duplicate key value violates unique constraint")
}

/// A driver that only reports the code inside its message text.
pub fn textual_serialization_failure() -> BoxError {
    "ERROR: restart transaction (SQLSTATE 40001)".into()
}

/// Business error raised by a unit of work.
#[derive(Debug, PartialEq, Eq)]
pub struct InsufficientFunds {
    pub account: i64,
}

impl fmt::Display for InsufficientFunds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "insufficient funds in account {}", self.account)
    }
}

impl StdError for InsufficientFunds {}
