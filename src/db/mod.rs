//! Connection pool for the user-account lookups behind registration/login (spec §4.4),
//! built on [`zero_mysql::sync`] with the crate's own [`crate::sync::Semaphore`] bounding
//! concurrent checkouts instead of delegating to a crate-provided pool.

pub mod pool;

pub use pool::{DbPool, PooledConn};
