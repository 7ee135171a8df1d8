use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgQueryResult, PgRow};
use sqlx::{Connection, Postgres};

use crate::driver::{Driver, PoolStatus, RowsAffected};
use crate::{BoxError, IsolationLevel, PoolConfig};

/// [`Driver`] backed by an sqlx [`PgPool`].
///
/// Errors surface as [`sqlx::Error`], whose database variant carries a
/// [`sqlx::postgres::PgDatabaseError`].
#[derive(Debug, Clone)]
pub struct SqlxDriver {
    pool: PgPool,
}

impl SqlxDriver {
    /// Wrap an existing pool, keeping whatever limits it was built with.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<PgPool> for SqlxDriver {
    fn from(pool: PgPool) -> Self {
        Self::new(pool)
    }
}

#[async_trait]
impl Driver for SqlxDriver {
    type Connection = PoolConnection<Postgres>;
    type Arguments = PgArguments;
    type Row = PgRow;
    type Outcome = PgQueryResult;

    async fn connect(url: &str, config: &PoolConfig) -> Result<Self, BoxError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_open)
            .max_lifetime(config.lifetime_limit())
            .acquire_timeout(config.acquire_timeout)
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    async fn ping(&self) -> Result<(), BoxError> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.pool.size() as usize,
            idle: self.pool.num_idle(),
        }
    }

    async fn acquire(&self) -> Result<Self::Connection, BoxError> {
        Ok(self.pool.acquire().await?)
    }

    fn discard(&self, conn: Self::Connection) {
        // The pool opens a replacement; the detached connection closes on drop.
        drop(conn.detach());
    }

    async fn begin(
        &self,
        conn: &mut Self::Connection,
        isolation: IsolationLevel,
    ) -> Result<(), BoxError> {
        sqlx::Executor::execute(&mut **conn, isolation.begin_statement()).await?;
        Ok(())
    }

    async fn commit(&self, conn: &mut Self::Connection) -> Result<(), BoxError> {
        sqlx::Executor::execute(&mut **conn, "COMMIT").await?;
        Ok(())
    }

    async fn rollback(&self, conn: &mut Self::Connection) -> Result<(), BoxError> {
        sqlx::Executor::execute(&mut **conn, "ROLLBACK").await?;
        Ok(())
    }

    async fn execute(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Self::Outcome, BoxError> {
        let query = sqlx::query_with::<Postgres, _>(sql, args);
        let outcome = match conn {
            Some(conn) => query.execute(&mut **conn).await?,
            None => query.execute(&self.pool).await?,
        };
        Ok(outcome)
    }

    async fn fetch_all(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Vec<Self::Row>, BoxError> {
        let query = sqlx::query_with::<Postgres, _>(sql, args);
        let rows = match conn {
            Some(conn) => query.fetch_all(&mut **conn).await?,
            None => query.fetch_all(&self.pool).await?,
        };
        Ok(rows)
    }

    async fn fetch_optional(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Option<Self::Row>, BoxError> {
        let query = sqlx::query_with::<Postgres, _>(sql, args);
        let row = match conn {
            Some(conn) => query.fetch_optional(&mut **conn).await?,
            None => query.fetch_optional(&self.pool).await?,
        };
        Ok(row)
    }
}

impl RowsAffected for PgQueryResult {
    fn rows_affected(&self) -> Result<u64, BoxError> {
        Ok(PgQueryResult::rows_affected(self))
    }
}
