use std::future::{pending, Future};
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::{Error, Result};

/// Deadline and cancellation scope for database calls.
///
/// A context bounds connection acquisition, `BEGIN`, every statement, and the
/// backoff between retries. Commit and rollback are not bounded: once the
/// outcome of an attempt is decided it runs to completion.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    /// One signal per `with_cancel` in this context's ancestry.
    cancelled: Vec<watch::Receiver<bool>>,
}

/// Cancels every [`Context`] derived from the one that created it.
#[derive(Debug, Clone)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

impl Context {
    /// A context that never expires and cannot be cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// Expire after `timeout`, or earlier if the current deadline is sooner.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Derive a context that can also be cancelled on its own. Cancelling
    /// any ancestor still cancels it.
    pub fn with_cancel(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancelled.push(rx);
        (self, CancelHandle(tx))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `Cancelled` or `DeadlineExceeded` once the context is done.
    pub fn err(&self) -> Option<Error> {
        if self.cancelled.iter().any(|rx| *rx.borrow()) {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drive `fut` unless the context finishes first; `fut` is dropped then.
    pub(crate) async fn bound<F: Future>(&self, fut: F) -> Result<F::Output> {
        self.check()?;
        if self.deadline.is_none() && self.cancelled.is_empty() {
            return Ok(fut.await);
        }
        tokio::select! {
            biased;
            out = fut => Ok(out),
            err = self.done() => Err(err),
        }
    }

    /// Resolves once the context is cancelled or expired.
    async fn done(&self) -> Error {
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };
        let cancelled = async {
            if self.cancelled.is_empty() {
                return pending::<()>().await;
            }
            let signals = self.cancelled.iter().map(|rx| {
                let mut rx = rx.clone();
                Box::pin(async move {
                    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                        // Every handle was dropped without cancelling.
                        pending::<()>().await;
                    }
                })
            });
            select_all(signals).await;
        };
        tokio::select! {
            _ = cancelled => Error::Cancelled,
            _ = expired => Error::DeadlineExceeded,
        }
    }
}
