use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::classify::{classify, Classification};
use crate::driver::Driver;
use crate::handle::BoundTransaction;
use crate::{BoxError, Context, Error, Handle, IsolationLevel, Result, RetryPolicy};

/// Runs units of work in transactions, retrying serialization failures.
///
/// Each attempt checks a connection out of the pool, opens a transaction at
/// the requested isolation level and hands `work` a transaction-bound
/// [`Handle`]. The transaction is committed if `work` succeeds and rolled back
/// if it fails or panics; the connection is released before the attempt
/// returns in every case.
///
/// Only `REPEATABLE READ` and `SERIALIZABLE` attempts are retried, and only
/// when the failure carries SQLSTATE `40001`. The whole unit of work is
/// replayed, so any side effects it has outside the transaction must tolerate
/// running more than once.
#[derive(Debug, Clone, Default)]
pub struct TransactionRunner {
    policy: RetryPolicy,
}

impl TransactionRunner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `work` inside a transaction on `handle`'s pool.
    ///
    /// # Errors
    /// * [`Error::AlreadyInTransaction`] if `handle` is transaction-bound;
    ///   `work` is not called.
    /// * [`Error::Begin`] if the transaction cannot be started; `work` is not
    ///   called.
    /// * [`Error::Work`] wrapping the error `work` returned, after rollback.
    /// * [`Error::Commit`] if the final commit fails.
    /// * [`Error::RetriesExhausted`] once every attempt hit a serialization
    ///   failure.
    /// * [`Error::SerializationFailure`] when a failure only mentions
    ///   SQLSTATE `40001` in its message.
    ///
    /// # Panics
    /// A panic inside `work` rolls the transaction back and is then resumed.
    pub async fn run<D, T, E, F, Fut>(
        &self,
        ctx: &Context,
        handle: &Handle<D>,
        isolation: IsolationLevel,
        mut work: F,
    ) -> Result<T>
    where
        D: Driver,
        F: FnMut(Handle<D>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let span = tracing::debug_span!("transaction", run_id = %Uuid::new_v4(), %isolation);
        async {
            if isolation.can_retry() {
                self.run_with_retry(ctx, handle, isolation, &mut work).await
            } else {
                self.attempt(ctx, handle, isolation, &mut work).await
            }
        }
        .instrument(span)
        .await
    }

    async fn run_with_retry<D, T, E, F, Fut>(
        &self,
        ctx: &Context,
        handle: &Handle<D>,
        isolation: IsolationLevel,
        work: &mut F,
    ) -> Result<T>
    where
        D: Driver,
        F: FnMut(Handle<D>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(attempt, max_attempts, "starting attempt");
            let err = match self.attempt(ctx, handle, isolation, &mut *work).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match classify(&err) {
                Classification::SerializationFailure => {}
                Classification::Suspected => {
                    return Err(Error::SerializationFailure {
                        isolation,
                        source: Box::new(err),
                    })
                }
                Classification::Other => return Err(err),
            }

            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %err, "serialization failure, retries exhausted");
                return Err(Error::RetriesExhausted {
                    isolation,
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.policy.delay_for(attempt - 1);
            warn!(attempt, ?delay, error = %err, "serialization failure, retrying");
            ctx.check()?;
            ctx.bound(tokio::time::sleep(delay)).await?;
        }
    }

    /// One transaction lifetime: acquire, begin, work, commit or rollback,
    /// release.
    async fn attempt<D, T, E, F, Fut>(
        &self,
        ctx: &Context,
        handle: &Handle<D>,
        isolation: IsolationLevel,
        work: &mut F,
    ) -> Result<T>
    where
        D: Driver,
        F: FnMut(Handle<D>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let driver = Arc::clone(handle.pool_driver()?);

        let conn = ctx.bound(driver.acquire()).await?.map_err(Error::Acquire)?;
        let mut tx = BoundTransaction::new(Arc::clone(&driver), conn, isolation);
        tx.begin(ctx).await?;
        debug!("transaction open");

        let slot = Arc::new(Mutex::new(Some(tx)));
        let scoped = Handle::bound(driver, Arc::clone(&slot), isolation);
        let outcome = AssertUnwindSafe(async move { work(scoped).await })
            .catch_unwind()
            .await;

        let mut tx = slot.lock().await.take().ok_or(Error::TransactionClosed)?;
        match outcome {
            Err(panic) => {
                if let Err(err) = tx.rollback().await {
                    warn!(error = %err, "rollback after panic failed");
                }
                drop(tx);
                resume_unwind(panic)
            }
            Ok(Err(err)) => {
                let source: BoxError = err.into();
                match tx.rollback().await {
                    Ok(()) => debug!("transaction rolled back"),
                    Err(err) => warn!(error = %err, "rollback failed"),
                }
                Err(Error::Work { isolation, source })
            }
            Ok(Ok(value)) => match tx.commit().await {
                Ok(()) => {
                    debug!("transaction committed");
                    Ok(value)
                }
                Err(source) => {
                    warn!(error = %source, "commit failed");
                    Err(Error::Commit { isolation, source })
                }
            },
        }
    }
}
