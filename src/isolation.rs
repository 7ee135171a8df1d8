use std::fmt;

/// Transaction isolation levels accepted by [`TransactionRunner`](crate::TransactionRunner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Whether a transaction at this level can fail with a serialization
    /// failure and is therefore worth retrying.
    ///
    /// PostgreSQL only raises SQLSTATE `40001` under snapshot-based isolation,
    /// i.e. `REPEATABLE READ` and `SERIALIZABLE`.
    pub fn can_retry(self) -> bool {
        matches!(self, Self::RepeatableRead | Self::Serializable)
    }

    /// SQL keyword form, as used after `ISOLATION LEVEL`.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    /// Statement that opens a transaction at this level.
    pub fn begin_statement(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "BEGIN ISOLATION LEVEL READ UNCOMMITTED",
            Self::ReadCommitted => "BEGIN ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "BEGIN ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "BEGIN ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}
