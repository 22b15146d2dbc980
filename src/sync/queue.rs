use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

/// Outcome of a bounded push.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    Full,
}

/// Outcome of a bounded pop.
#[derive(Debug, PartialEq, Eq)]
pub enum PopOutcome<T> {
    Item(T),
    TimedOut,
    Closed,
}

struct Inner<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

/// A fixed-capacity FIFO shared by producers and consumers across threads: the worker
/// pool's request queue, and the async log sink's line queue. `push` never blocks; `pop`
/// blocks until an item is available, the deadline passes, or the queue is closed.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                capacity,
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Non-blocking push. Broadcasts on success (and on rejection) so consumers parked
    /// in `pop`/`pop_timed` always observe progress.
    pub fn push(&self, item: T) -> Result<(), PushError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.len() >= inner.capacity {
            self.not_empty.notify_all();
            return Err(PushError::Full);
        }
        inner.items.push_back(item);
        self.not_empty.notify_all();
        Ok(())
    }

    /// Blocks until an item is available or the queue is closed.
    pub fn pop(&self) -> PopOutcome<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return PopOutcome::Item(item);
            }
            if inner.closed {
                return PopOutcome::Closed;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Non-blocking pop: returns `None` immediately if nothing is queued. Used by the
    /// reactor to drain worker-posted messages (timer extensions, close requests) between
    /// `poll()` calls without ever parking the reactor thread.
    pub fn try_pop(&self) -> Option<T> {
        self.inner.lock().unwrap().items.pop_front()
    }

    /// Blocks until an item is available, the queue is closed, or `deadline` passes.
    pub fn pop_timed(&self, deadline: Instant) -> PopOutcome<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return PopOutcome::Item(item);
            }
            if inner.closed {
                return PopOutcome::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return PopOutcome::TimedOut;
            }
            let (guard, timeout) = self.not_empty.wait_timeout(inner, deadline - now).unwrap();
            inner = guard;
            if timeout.timed_out() && inner.items.is_empty() && !inner.closed {
                return PopOutcome::TimedOut;
            }
        }
    }

    /// Wakes every blocked `pop`/`pop_timed` with `PopOutcome::Closed` once drained.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.not_empty.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn push_pop_round_trips() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        q.push(1).unwrap();
        q.push(2).unwrap();
        assert_eq!(q.pop(), PopOutcome::Item(1));
        assert_eq!(q.pop(), PopOutcome::Item(2));
    }

    #[test]
    fn push_rejects_when_full() {
        let q: BoundedQueue<i32> = BoundedQueue::new(1);
        q.push(1).unwrap();
        assert_eq!(q.push(2), Err(PushError::Full));
    }

    #[test]
    fn pop_timed_reports_timeout_when_empty() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(q.pop_timed(deadline), PopOutcome::TimedOut);
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let q: Arc<BoundedQueue<i32>> = Arc::new(BoundedQueue::new(4));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(10));
        q.close();
        assert_eq!(consumer.join().unwrap(), PopOutcome::Closed);
    }

    #[test]
    fn try_pop_never_blocks_on_empty() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        assert_eq!(q.try_pop(), None);
        q.push(7).unwrap();
        assert_eq!(q.try_pop(), Some(7));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn push_wakes_blocked_consumer() {
        let q: Arc<BoundedQueue<i32>> = Arc::new(BoundedQueue::new(4));
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(Duration::from_millis(10));
        q.push(42).unwrap();
        assert_eq!(consumer.join().unwrap(), PopOutcome::Item(42));
    }
}
