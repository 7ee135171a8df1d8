use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Object, Pool, PoolError, Runtime};
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use crate::driver::{Driver, PoolStatus};
use crate::{BoxError, IsolationLevel, PoolConfig};

/// Positional bind parameters for [`DeadpoolDriver`].
pub type PgParams = Vec<Box<dyn ToSql + Send + Sync>>;

/// [`Driver`] backed by a deadpool pool of `tokio-postgres` clients.
///
/// Errors surface as [`tokio_postgres::Error`], whose database errors carry a
/// [`tokio_postgres::error::DbError`].
#[derive(Clone)]
pub struct DeadpoolDriver {
    pool: Pool,
    max_lifetime: Option<Duration>,
}

impl DeadpoolDriver {
    /// Wrap an existing pool. Connections older than `max_lifetime` are closed
    /// when they are next checked out; `None` keeps them indefinitely.
    pub fn new(pool: Pool, max_lifetime: Option<Duration>) -> Self {
        Self { pool, max_lifetime }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

impl std::fmt::Debug for DeadpoolDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadpoolDriver")
            .field("status", &self.pool.status())
            .field("max_lifetime", &self.max_lifetime)
            .finish()
    }
}

fn pool_error(err: PoolError) -> BoxError {
    match err {
        PoolError::Backend(err) => err.into(),
        other => other.to_string().into(),
    }
}

fn expired(age: Duration, max_lifetime: Option<Duration>) -> bool {
    max_lifetime.is_some_and(|limit| age >= limit)
}

fn bind_refs(args: &PgParams) -> Vec<&(dyn ToSql + Sync)> {
    args.iter()
        .map(|arg| &**arg as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl Driver for DeadpoolDriver {
    type Connection = Object;
    type Arguments = PgParams;
    type Row = Row;
    type Outcome = u64;

    async fn connect(url: &str, config: &PoolConfig) -> Result<Self, BoxError> {
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(url.to_string());
        let mut pool_config = deadpool_postgres::PoolConfig::new(config.max_open as usize);
        pool_config.timeouts.wait = Some(config.acquire_timeout);
        cfg.pool = Some(pool_config);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|err| BoxError::from(err.to_string()))?;
        Ok(Self::new(pool, config.lifetime_limit()))
    }

    async fn ping(&self) -> Result<(), BoxError> {
        let client = self.acquire().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close();
    }

    fn status(&self) -> PoolStatus {
        let status = self.pool.status();
        PoolStatus {
            size: status.size,
            idle: status.available,
        }
    }

    async fn acquire(&self) -> Result<Self::Connection, BoxError> {
        loop {
            let client = self.pool.get().await.map_err(pool_error)?;
            if !expired(Object::metrics(&client).age(), self.max_lifetime) {
                return Ok(client);
            }
            drop(Object::take(client));
        }
    }

    fn discard(&self, conn: Self::Connection) {
        drop(Object::take(conn));
    }

    async fn begin(
        &self,
        conn: &mut Self::Connection,
        isolation: IsolationLevel,
    ) -> Result<(), BoxError> {
        conn.batch_execute(isolation.begin_statement()).await?;
        Ok(())
    }

    async fn commit(&self, conn: &mut Self::Connection) -> Result<(), BoxError> {
        conn.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&self, conn: &mut Self::Connection) -> Result<(), BoxError> {
        conn.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn execute(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Self::Outcome, BoxError> {
        let params = bind_refs(&args);
        let rows = match conn {
            Some(conn) => conn.execute(sql, &params).await?,
            None => self.acquire().await?.execute(sql, &params).await?,
        };
        Ok(rows)
    }

    async fn fetch_all(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Vec<Self::Row>, BoxError> {
        let params = bind_refs(&args);
        let rows = match conn {
            Some(conn) => conn.query(sql, &params).await?,
            None => self.acquire().await?.query(sql, &params).await?,
        };
        Ok(rows)
    }

    async fn fetch_optional(
        &self,
        conn: Option<&mut Self::Connection>,
        sql: &str,
        args: Self::Arguments,
    ) -> Result<Option<Self::Row>, BoxError> {
        let rows = self.fetch_all(conn, sql, args).await?;
        Ok(rows.into_iter().next())
    }
}
