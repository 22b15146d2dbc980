//! Fixed-size worker pool draining the bounded request queue (spec §4.6). Workers own a
//! connection only for the span between claiming its [`AtomicConnState`] and settling it
//! back to `Idle`; the queue and the CAS handshake together are what make that ownership
//! transfer between the reactor thread and a worker thread safe.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::ServerError;
use crate::http::connection::Connection;

/// What a worker should do with the connection it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Read,
    Write,
    /// Mode P: the reactor already read into the buffer; the worker only parses/responds.
    Process,
}

/// A connection behind an `UnsafeCell`, shared between the reactor and the worker pool.
/// Access outside the CAS handshake in [`Connection::state`] is a logic bug, not something
/// the type system prevents — the one-shot readiness protocol is the actual guarantee.
pub struct ConnSlot {
    pub token: usize,
    inner: UnsafeCell<Connection>,
}

impl ConnSlot {
    pub fn new(token: usize, conn: Connection) -> Arc<Self> {
        Arc::new(Self {
            token,
            inner: UnsafeCell::new(conn),
        })
    }

    /// # Safety
    /// Caller must hold exclusive ownership per the connection's `AtomicConnState` (i.e.
    /// have just `try_claim`'d it, or be the reactor observing it settled at `Idle`).
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn conn_mut(&self) -> &mut Connection {
        unsafe { &mut *self.inner.get() }
    }
}

// SAFETY: exclusive access is serialized by `AtomicConnState`'s CAS protocol, not by the
// borrow checker — see `ConnSlot::conn_mut`.
unsafe impl Send for ConnSlot {}
unsafe impl Sync for ConnSlot {}

pub struct WorkItem {
    pub slot: Arc<ConnSlot>,
    pub intent: Intent,
}

/// Runs once per dequeued work item, in whichever worker thread dequeued it.
pub type Dispatch = dyn Fn(WorkItem) + Send + Sync;

pub struct WorkerPool {
    queue: Arc<crate::sync::BoundedQueue<WorkItem>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `n` detached-equivalent worker threads (joined on `shutdown`), each looping
    /// `queue.pop()` and invoking `dispatch`.
    pub fn new(n: usize, queue_capacity: usize, dispatch: Arc<Dispatch>) -> Self {
        let queue = Arc::new(crate::sync::BoundedQueue::new(queue_capacity));
        let handles = (0..n)
            .map(|id| {
                let queue = Arc::clone(&queue);
                let dispatch = Arc::clone(&dispatch);
                thread::Builder::new()
                    .name(format!("worker-{id}"))
                    .spawn(move || Self::run(queue, dispatch))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        Self { queue, handles }
    }

    fn run(queue: Arc<crate::sync::BoundedQueue<WorkItem>>, dispatch: Arc<Dispatch>) {
        loop {
            match queue.pop() {
                crate::sync::queue::PopOutcome::Item(item) => dispatch(item),
                crate::sync::queue::PopOutcome::Closed => return,
                crate::sync::queue::PopOutcome::TimedOut => unreachable!("pop() never times out"),
            }
        }
    }

    /// Appends under the queue's own lock; rejects with `ResourceExhausted` if saturated,
    /// per spec policy (the caller then closes the connection).
    pub fn submit(&self, item: WorkItem) -> Result<(), ServerError> {
        self.queue
            .push(item)
            .map_err(|_| ServerError::ResourceExhausted)
    }

    /// Closes the queue (waking every blocked worker) and joins all worker threads.
    pub fn shutdown(mut self) {
        self.queue.close();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream as StdTcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dummy_slot(token: usize) -> Arc<ConnSlot> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _keep_alive = StdTcpStream::connect(addr).unwrap();
        let (std_stream, peer) = listener.accept().unwrap();
        std_stream.set_nonblocking(true).unwrap();
        let stream = mio::net::TcpStream::from_std(std_stream);
        ConnSlot::new(token, Connection::new(stream, peer))
    }

    #[test]
    fn dispatches_submitted_items_to_some_worker() {
        let processed = Arc::new(AtomicUsize::new(0));
        let processed_clone = Arc::clone(&processed);
        let pool = WorkerPool::new(
            2,
            8,
            Arc::new(move |_item: WorkItem| {
                processed_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        for i in 0..4 {
            pool.submit(WorkItem {
                slot: dummy_slot(i),
                intent: Intent::Read,
            })
            .unwrap();
        }

        // Give workers a moment to drain; shutdown joins them, which also waits.
        std::thread::sleep(std::time::Duration::from_millis(50));
        pool.shutdown();
        assert_eq!(processed.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn submit_rejects_when_queue_is_full() {
        let pool = WorkerPool::new(0, 1, Arc::new(|_item: WorkItem| {}));
        pool.submit(WorkItem {
            slot: dummy_slot(1),
            intent: Intent::Read,
        })
        .unwrap();
        let result = pool.submit(WorkItem {
            slot: dummy_slot(2),
            intent: Intent::Read,
        });
        assert!(matches!(result, Err(ServerError::ResourceExhausted)));
        pool.shutdown();
    }
}
