pub mod connection;
pub mod request;
pub mod response;

pub use connection::{ConnState, Connection, MAX_FD, MAX_FILENAME, R_BUF, W_BUF};
pub use request::{Method, ReadOutcome, Request};
pub use response::FulfillOutcome;
