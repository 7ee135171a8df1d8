use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::driver::{Driver, PoolStatus, RowsAffected};
use crate::{BoxError, Context, Error, IsolationLevel, PoolConfig, Result, TransactionRunner};

pub(crate) type Slot<D> = Arc<Mutex<Option<BoundTransaction<D>>>>;
type SlotGuard<'a, D> = MutexGuard<'a, Option<BoundTransaction<D>>>;

/// A connection checked out for one attempt, with a transaction open on it.
///
/// The connection goes back to the pool on drop only when it is known to be
/// outside a transaction; otherwise it is discarded.
pub(crate) struct BoundTransaction<D: Driver> {
    driver: Arc<D>,
    conn: Option<D::Connection>,
    isolation: IsolationLevel,
    settled: bool,
}

impl<D: Driver> BoundTransaction<D> {
    pub(crate) fn new(driver: Arc<D>, conn: D::Connection, isolation: IsolationLevel) -> Self {
        Self {
            driver,
            conn: Some(conn),
            isolation,
            settled: true,
        }
    }

    pub(crate) fn connection(&mut self) -> Result<&mut D::Connection> {
        self.conn.as_mut().ok_or(Error::TransactionClosed)
    }

    pub(crate) async fn begin(&mut self, ctx: &Context) -> Result<()> {
        let isolation = self.isolation;
        self.settled = false;
        let conn = self.conn.as_mut().ok_or(Error::TransactionClosed)?;
        ctx.bound(self.driver.begin(conn, isolation))
            .await?
            .map_err(|source| Error::Begin { isolation, source })
    }

    pub(crate) async fn commit(&mut self) -> Result<(), BoxError> {
        let conn = self.conn.as_mut().ok_or(Error::TransactionClosed)?;
        self.driver.commit(conn).await?;
        self.settled = true;
        Ok(())
    }

    pub(crate) async fn rollback(&mut self) -> Result<(), BoxError> {
        let conn = self.conn.as_mut().ok_or(Error::TransactionClosed)?;
        self.driver.rollback(conn).await?;
        self.settled = true;
        Ok(())
    }
}

impl<D: Driver> Drop for BoundTransaction<D> {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.settled {
            debug!(isolation = %self.isolation, "connection released");
        } else {
            debug!(isolation = %self.isolation, "discarding connection in unknown transaction state");
            self.driver.discard(conn);
        }
    }
}

enum Binding<D: Driver> {
    Pool,
    Transaction {
        slot: Slot<D>,
        isolation: IsolationLevel,
    },
}

impl<D: Driver> Clone for Binding<D> {
    fn clone(&self) -> Self {
        match self {
            Self::Pool => Self::Pool,
            Self::Transaction { slot, isolation } => Self::Transaction {
                slot: Arc::clone(slot),
                isolation: *isolation,
            },
        }
    }
}

/// Routes statements to the pool, or to the transaction a
/// [`TransactionRunner`] opened for the current unit of work.
///
/// Handles are cheap to clone. A transaction-bound handle only stays usable
/// until its unit of work returns; afterwards every call fails with
/// [`Error::TransactionClosed`].
pub struct Handle<D: Driver> {
    driver: Arc<D>,
    binding: Binding<D>,
}

impl<D: Driver> Clone for Handle<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            binding: self.binding.clone(),
        }
    }
}

impl<D: Driver> fmt::Debug for Handle<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("in_transaction", &self.in_transaction())
            .field("isolation", &self.isolation_level())
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Handle<D> {
    /// Open a pool with the default [`PoolConfig`].
    pub async fn open(url: &str) -> Result<Self> {
        Self::open_with(url, PoolConfig::default()).await
    }

    /// Open a pool and check that the database answers within
    /// `config.connect_timeout`.
    pub async fn open_with(url: &str, config: PoolConfig) -> Result<Self> {
        let connecting = async {
            let driver = D::connect(url, &config).await?;
            if let Err(err) = driver.ping().await {
                driver.close().await;
                return Err(err);
            }
            Ok::<_, BoxError>(driver)
        };
        let driver = tokio::time::timeout(config.connect_timeout, connecting)
            .await
            .map_err(|_| {
                Error::Connect(
                    format!("database did not answer within {:?}", config.connect_timeout).into(),
                )
            })?
            .map_err(Error::Connect)?;

        info!(
            max_open = config.max_open,
            max_lifetime = ?config.max_lifetime,
            "database opened"
        );
        Ok(Self::from_driver(driver))
    }

    /// Wrap a driver whose pool was built elsewhere.
    pub fn from_driver(driver: D) -> Self {
        Self::from_shared(Arc::new(driver))
    }

    pub fn from_shared(driver: Arc<D>) -> Self {
        Self {
            driver,
            binding: Binding::Pool,
        }
    }

    pub(crate) fn bound(driver: Arc<D>, slot: Slot<D>, isolation: IsolationLevel) -> Self {
        Self {
            driver,
            binding: Binding::Transaction { slot, isolation },
        }
    }

    /// The shared driver, unless a transaction is already bound.
    pub(crate) fn pool_driver(&self) -> Result<&Arc<D>> {
        match self.binding {
            Binding::Pool => Ok(&self.driver),
            Binding::Transaction { .. } => Err(Error::AlreadyInTransaction),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn in_transaction(&self) -> bool {
        matches!(self.binding, Binding::Transaction { .. })
    }

    /// Isolation level of the bound transaction.
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        match self.binding {
            Binding::Pool => None,
            Binding::Transaction { isolation, .. } => Some(isolation),
        }
    }

    pub fn status(&self) -> PoolStatus {
        self.driver.status()
    }

    /// Close the pool. Not allowed from inside a unit of work.
    pub async fn close(&self) -> Result<()> {
        self.pool_driver()?.close().await;
        info!("database closed");
        Ok(())
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn exec(&self, ctx: &Context, sql: &str, args: D::Arguments) -> Result<u64> {
        let mut guard = self.lock(ctx).await?;
        let conn = Self::target(&mut guard)?;
        let outcome = ctx
            .bound(self.driver.execute(conn, sql, args))
            .await?
            .map_err(|source| Error::Driver {
                operation: "exec",
                source,
            })?;
        outcome.rows_affected().map_err(|source| Error::Result {
            operation: "exec",
            source,
        })
    }

    pub async fn query(&self, ctx: &Context, sql: &str, args: D::Arguments) -> Result<Vec<D::Row>> {
        let mut guard = self.lock(ctx).await?;
        let conn = Self::target(&mut guard)?;
        ctx.bound(self.driver.fetch_all(conn, sql, args))
            .await?
            .map_err(|source| Error::Driver {
                operation: "query",
                source,
            })
    }

    /// First row of the result, or [`Error::RowNotFound`].
    pub async fn query_row(&self, ctx: &Context, sql: &str, args: D::Arguments) -> Result<D::Row> {
        let mut guard = self.lock(ctx).await?;
        let conn = Self::target(&mut guard)?;
        ctx.bound(self.driver.fetch_optional(conn, sql, args))
            .await?
            .map_err(|source| Error::Driver {
                operation: "query_row",
                source,
            })?
            .ok_or(Error::RowNotFound)
    }

    /// Run `work` in a transaction with the default [`TransactionRunner`].
    pub async fn run<T, E, F, Fut>(&self, ctx: &Context, isolation: IsolationLevel, work: F) -> Result<T>
    where
        F: FnMut(Handle<D>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        TransactionRunner::default()
            .run(ctx, self, isolation, work)
            .await
    }

    async fn lock(&self, ctx: &Context) -> Result<Option<SlotGuard<'_, D>>> {
        match &self.binding {
            Binding::Pool => Ok(None),
            Binding::Transaction { slot, .. } => Ok(Some(ctx.bound(slot.lock()).await?)),
        }
    }

    fn target<'g>(guard: &'g mut Option<SlotGuard<'_, D>>) -> Result<Option<&'g mut D::Connection>> {
        match guard {
            None => Ok(None),
            Some(guard) => {
                let tx = guard.as_mut().ok_or(Error::TransactionClosed)?;
                tx.connection().map(Some)
            }
        }
    }
}
