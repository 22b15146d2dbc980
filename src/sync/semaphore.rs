use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A counting semaphore with blocking wait and non-blocking signal, the seat of the DB
/// pool's and the worker pool's "items available" handshake.
pub struct Semaphore {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then consumes one.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.cv.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Blocks until a permit is available or `deadline` passes. Returns `false` on timeout.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut count = self.count.lock().unwrap();
        loop {
            if *count > 0 {
                *count -= 1;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, timeout_result) = self.cv.wait_timeout(count, deadline - now).unwrap();
            count = guard;
            if timeout_result.timed_out() && *count == 0 {
                return false;
            }
        }
    }

    /// Releases one permit, waking a single waiter if any.
    pub fn signal(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.cv.notify_one();
    }

    pub fn available(&self) -> usize {
        *self.count.lock().unwrap()
    }
}
