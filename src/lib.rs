//! Postgres Transaction Retry Module
//!
//! This module runs units of work inside PostgreSQL transactions and replays
//! them when the database reports a serialization failure (SQLSTATE `40001`)
//! under `REPEATABLE READ` or `SERIALIZABLE` isolation. Connections and
//! transactions are released on every exit path, including panics.
//!
//! ```rust,no_run
//! use postgres_tx_retry::{Context, Handle, IsolationLevel, SqlxDriver};
//! use sqlx::postgres::PgArguments;
//! use sqlx::Arguments;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let db = Handle::<SqlxDriver>::open("postgres://localhost/bank").await?;
//! let ctx = Context::background();
//!
//! db.run(&ctx, IsolationLevel::Serializable, |tx| {
//!     let ctx = ctx.clone();
//!     async move {
//!         let mut args = PgArguments::default();
//!         args.add(100_i64)?;
//!         args.add(1_i64)?;
//!         tx.exec(&ctx, "UPDATE accounts SET balance = balance - $1 WHERE id = $2", args)
//!             .await?;
//!         Ok::<_, Box<dyn std::error::Error + Send + Sync>>(())
//!     }
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod context;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod handle;
pub mod isolation;
pub mod runner;

pub use classify::{Classification, SERIALIZATION_FAILURE};
pub use config::{PoolConfig, RetryPolicy};
pub use context::{CancelHandle, Context};
pub use driver::{Driver, PoolStatus, RowsAffected};
pub use drivers::{DeadpoolDriver, PgParams, SqlxDriver};
pub use error::{BoxError, Error, Result};
pub use handle::Handle;
pub use isolation::IsolationLevel;
pub use runner::TransactionRunner;
