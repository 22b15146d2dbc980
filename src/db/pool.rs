use std::collections::VecDeque;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use zero_mysql::Opts;
use zero_mysql::sync::Conn;

use crate::config::types::AppConfig;
use crate::error::ServerError;
use crate::sync::Semaphore;

/// Bounds the number of live connections at `db_pool_size`; checkouts beyond that block on
/// `sem` rather than opening unbounded connections to the database.
pub struct DbPool {
    opts: Opts,
    idle: Mutex<VecDeque<Conn>>,
    sem: Semaphore,
}

impl DbPool {
    pub fn new(config: &AppConfig) -> Result<Arc<Self>, ServerError> {
        let opts = Opts {
            host: Some(config.db_url.clone()),
            port: config.db_port,
            user: config.db_user.clone(),
            password: Some(config.db_password.clone()),
            db: Some(config.db_name.clone()),
            ..Opts::default()
        };
        Ok(Arc::new(Self {
            opts,
            idle: Mutex::new(VecDeque::with_capacity(config.db_pool_size)),
            sem: Semaphore::new(config.db_pool_size),
        }))
    }

    /// Blocks until a permit and a live connection are available.
    pub fn get(self: &Arc<Self>) -> Result<PooledConn, ServerError> {
        self.sem.wait();
        self.checkout()
    }

    /// Bounded wait; returns `ResourceExhausted` if no permit frees up in time.
    pub fn get_timeout(self: &Arc<Self>, timeout: Duration) -> Result<PooledConn, ServerError> {
        if !self.sem.wait_until(Instant::now() + timeout) {
            return Err(ServerError::ResourceExhausted);
        }
        self.checkout()
    }

    fn checkout(self: &Arc<Self>) -> Result<PooledConn, ServerError> {
        let existing = self.idle.lock().unwrap().pop_front();
        let conn = match existing {
            Some(mut conn) if conn.ping().is_ok() => conn,
            _ => Conn::new(self.opts.clone())
                .map_err(|e| ServerError::ResourceInitFailed(e.to_string()))?,
        };
        Ok(PooledConn {
            pool: Arc::clone(self),
            conn: ManuallyDrop::new(conn),
        })
    }

    fn check_in(&self, conn: Conn) {
        self.idle.lock().unwrap().push_back(conn);
        self.sem.signal();
    }
}

/// A checked-out connection. Returns to the pool's idle queue on drop.
pub struct PooledConn {
    pool: Arc<DbPool>,
    conn: ManuallyDrop<Conn>,
}

impl Deref for PooledConn {
    type Target = Conn;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        // SAFETY: conn is never touched again after this take.
        let conn = unsafe { ManuallyDrop::take(&mut self.conn) };
        self.pool.check_in(conn);
    }
}
