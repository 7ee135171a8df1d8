use async_trait::async_trait;

use crate::{BoxError, IsolationLevel, PoolConfig};

/// Snapshot of a driver's connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently open, idle or checked out
    pub size: usize,
    /// Open connections waiting in the pool
    pub idle: usize,
}

/// Outcome of a mutating statement.
pub trait RowsAffected {
    fn rows_affected(&self) -> Result<u64, BoxError>;
}

/// Connection pool and statement execution for one database client library.
///
/// A `Driver` owns the pool. Transaction control is expressed on an
/// exclusively checked-out connection: the runner acquires one, calls
/// [`begin`](Driver::begin), and finishes with exactly one of
/// [`commit`](Driver::commit) or [`rollback`](Driver::rollback) before the
/// connection is dropped back into the pool. A connection whose state is
/// unknown is handed to [`discard`](Driver::discard) instead.
///
/// Statement methods take `None` to run on the pool and `Some(conn)` to run
/// inside the transaction open on `conn`.
#[async_trait]
pub trait Driver: Send + Sync + Sized + 'static {
    /// A connection checked out of the pool; dropping it returns it.
    type Connection: Send + 'static;
    /// Bind parameters for one statement.
    type Arguments: Default + Send + 'static;
    type Row: Send + 'static;
    type Outcome: RowsAffected + Send + 'static;

    /// Build the pool. Need not touch the network; see [`ping`](Driver::ping).
    async fn connect(url: &str, config: &PoolConfig) -> Result<Self, BoxError>;

    /// Round-trip to the database on a pooled connection.
    async fn ping(&self) -> Result<(), BoxError>;

    async fn close(&self);

    fn status(&self) -> PoolStatus;

    async fn acquire(&self) -> Result<Self::Connection, BoxError>;

    /// Close `conn` instead of returning it to the pool.
    fn discard(&self, conn: Self::Connection);

    async fn begin(
        &self,
        conn: &mut Self::Connection,
        isolation: IsolationLevel,
    ) -> Result<(), BoxError>;

    async fn commit(&self, conn: &mut Self::Connection) -> Result<(), BoxError>;

    async fn rollback(&self, conn: &mut Self::Connection) -> Result<(), BoxError>;

    async fn execute(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Self::Outcome, BoxError>;

    async fn fetch_all(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Vec<Self::Row>, BoxError>;

    /// First row of the result, if any.
    async fn fetch_optional(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Option<Self::Row>, BoxError>;
}

impl RowsAffected for u64 {
    fn rows_affected(&self) -> Result<u64, BoxError> {
        Ok(*self)
    }
}
