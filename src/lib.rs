//! `server_proxy`: a single-host HTTP/1.1 server built around an mio reactor, a hand-rolled
//! HTTP state machine, and a small concurrency fabric (bounded queues, a semaphore, a
//! generation-checked timer list) rather than an async runtime.

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod lexer;
pub mod log;
pub mod reactor;
pub mod routing;
pub mod sync;
pub mod timer;
pub mod worker;

pub use error::{CleanError, Result, ServerError};
pub use reactor::Server;
