//! Hand-rolled synchronization primitives used by every other component: a counting
//! semaphore (std has no blocking semaphore) and a bounded blocking queue built on top of
//! `std::sync::{Mutex, Condvar}`. Construction failures surface as
//! `ServerError::ResourceInitFailed`, though on this platform `Mutex::new`/`Condvar::new`
//! are infallible — the fallible shape is kept because the spec requires every
//! synchronization primitive to be able to report one.

pub mod queue;
pub mod semaphore;

pub use queue::BoundedQueue;
pub use semaphore::Semaphore;
