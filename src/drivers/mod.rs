//! Bundled [`Driver`](crate::Driver) implementations.

pub mod deadpool_pg;
pub mod sqlx_pg;

pub use deadpool_pg::{DeadpoolDriver, PgParams};
pub use sqlx_pg::SqlxDriver;
