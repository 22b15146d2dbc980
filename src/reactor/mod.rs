//! The single-threaded I/O reactor (spec §4.8) — the event loop that owns the listening
//! socket, the signal self-pipe, and every connection FD. It is the only thread that ever
//! touches [`TimerList`] or the connection [`Slab`]; workers reach it only by posting a
//! [`ReactorMsg`] through `ctx.reactor_msgs` and nudging the self-pipe (§9: "workers request
//! timer adjustments by posting a message to the reactor").
//!
//! Grounded on [`crate::examples`]'s closest real analogue, `ryanseipp-rask-old`'s
//! `server/src/listener.rs` (`Slab<Arc<Session>>`, accept-loop-to-`WouldBlock`, per-event
//! dispatch shape) — extended with one-shot rearm, a timer list, and the two concurrency
//! modes spec §4.8 requires, none of which the teacher's own `server.rs` (a two-field
//! placeholder `Token` type) ever implemented.

mod signal;

use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use mio::net::TcpListener;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use slab::Slab;

use crate::config::AppConfig;
use crate::config::types::DEFAULT_MAX_BODY_SIZE;
use crate::db::DbPool;
use crate::error::{CleanError, Result};
use crate::http::connection::{ConnState, Connection, MAX_FD};
use crate::http::response::FulfillOutcome;
use crate::log::LogSink;
use crate::routing::{self, Resolved, UserCache};
use crate::sync::BoundedQueue;
use crate::timer::{TimerList, TimerRef};
use crate::worker::{ConnSlot, Intent, WorkItem, WorkerPool};

const LISTENER_TOKEN: Token = Token(0);
const SIGNAL_TOKEN: Token = Token(1);
const CONN_TOKEN_OFFSET: usize = 2;

/// Idle connections are evicted after `3 * ALARM_PERIOD_SECS` of inactivity (spec §5); the
/// alarm that drives timer ticks fires every `ALARM_PERIOD_SECS`. Not exposed on the CLI
/// (spec §6 lists no flag for it) — a fixed operational constant, like `R_BUF`/`W_BUF`.
const ALARM_PERIOD_SECS: u64 = 5;
const REQUEST_QUEUE_CAPACITY: usize = 4096;
const REACTOR_MSG_CAPACITY: usize = 8192;

fn idle_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(ALARM_PERIOD_SECS * 3)
}

/// A request from a worker thread to the reactor, the only other party allowed to mutate
/// the timer list or the connection slab (spec §5 "Shared-resource policy").
enum ReactorMsg {
    ExtendTimer(TimerRef, Instant),
    Close(usize),
}

/// Shared, read-mostly state handed to every worker dispatch. Cloning the `Registry` is
/// the standard mio pattern for registering/reregistering interest from outside the thread
/// that owns the `Poll` (spec §4.8 "one-shot rearm").
struct ReactorContext {
    document_root: PathBuf,
    max_body: usize,
    db_pool: Arc<DbPool>,
    user_cache: Arc<UserCache>,
    log: Arc<LogSink>,
    registry: Registry,
    reactor_msgs: Arc<BoundedQueue<ReactorMsg>>,
    signal_pipe_write: std::os::fd::RawFd,
    live_count: Arc<AtomicUsize>,
    concurrency_mode_reactor: bool,
}

impl ReactorContext {
    fn post(&self, msg: ReactorMsg) {
        if self.reactor_msgs.push(msg).is_err() {
            self.log
                .error(format_args!("reactor message queue full, dropping message"));
        }
        // SAFETY: signal_pipe_write is the self-pipe's write end, open for the process
        // lifetime; a `nudge` here is just `libc::write` of one sentinel byte.
        let byte = signal::NUDGE_BYTE;
        unsafe {
            libc::write(
                self.signal_pipe_write,
                &byte as *const u8 as *const libc::c_void,
                1,
            );
        }
    }
}

/// Owns the listener, the timer list, the worker pool, and the connection slab. Spec §4.8's
/// "reactor" in the flesh.
pub struct Server {
    config: AppConfig,
    poll: Poll,
    listener: TcpListener,
    connections: Slab<Arc<ConnSlot>>,
    timers: TimerList,
    worker_pool: Option<WorkerPool>,
    ctx: Arc<ReactorContext>,
    self_pipe: signal::SelfPipe,
    log: Arc<LogSink>,
}

impl Server {
    pub fn new(config: AppConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port).parse()?;
        let mut listener = TcpListener::bind(addr)?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let self_pipe = signal::SelfPipe::new()?;
        poll.registry().register(
            &mut SourceFd(&self_pipe.read_fd),
            SIGNAL_TOKEN,
            Interest::READABLE,
        )?;
        self_pipe.install_handlers()?;
        // SAFETY: alarm() only schedules delivery; the handler installed above forwards it
        // through the self-pipe rather than running arbitrary code on the signal stack.
        unsafe {
            libc::alarm(ALARM_PERIOD_SECS as libc::c_uint);
        }

        let log = Arc::new(
            LogSink::new(
                "./logs",
                "server",
                if config.log_async {
                    crate::log::Mode::Async
                } else {
                    crate::log::Mode::Sync
                },
                config.log_disabled,
                100_000,
            )
            .map_err(CleanError::from)?,
        );

        let db_pool = DbPool::new(&config).map_err(CleanError::from)?;
        let user_cache = Arc::new(UserCache::new());
        if let Err(e) = user_cache.load_from_db(&db_pool) {
            log.warn(format_args!(
                "could not preload user cache from database: {e}"
            ));
        }

        let reactor_msgs = Arc::new(BoundedQueue::new(REACTOR_MSG_CAPACITY));
        let ctx = Arc::new(ReactorContext {
            document_root: PathBuf::from(&config.document_root),
            max_body: DEFAULT_MAX_BODY_SIZE,
            db_pool,
            user_cache,
            log: Arc::clone(&log),
            registry: poll.registry().try_clone()?,
            reactor_msgs,
            signal_pipe_write: self_pipe.write_fd(),
            live_count: Arc::new(AtomicUsize::new(0)),
            concurrency_mode_reactor: config.concurrency_mode_reactor,
        });

        let dispatch_ctx = Arc::clone(&ctx);
        let worker_pool = WorkerPool::new(
            config.thread_count,
            REQUEST_QUEUE_CAPACITY,
            Arc::new(move |item: WorkItem| dispatch(&dispatch_ctx, item)),
        );

        Ok(Self {
            config,
            poll,
            listener,
            connections: Slab::new(),
            timers: TimerList::new(),
            worker_pool: Some(worker_pool),
            ctx,
            self_pipe,
            log,
        })
    }

    /// Accept loop: drains the listener to `WouldBlock`, admitting connections up to
    /// `MAX_FD` (spec §4.8 "Listen FD").
    fn accept_loop(&mut self) {
        loop {
            if self.connections.len() >= MAX_FD {
                break;
            }
            let (mut stream, peer) = match self.listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.log.warn(format_args!("accept failed: {e}"));
                    break;
                }
            };

            let entry = self.connections.vacant_entry();
            let token = entry.key();
            if self
                .poll
                .registry()
                .register(
                    &mut stream,
                    Token(token + CONN_TOKEN_OFFSET),
                    Interest::READABLE,
                )
                .is_err()
            {
                continue;
            }

            let mut conn = Connection::new(stream, peer);
            let timer_ref = self.timers.add(token, Instant::now() + idle_timeout());
            conn.timer = Some(timer_ref);
            entry.insert(ConnSlot::new(token, conn));
            self.ctx.live_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Handles readiness for one connection FD (spec §4.8's "Connection FD readable/writable"
    /// and "Peer hangup").
    fn handle_conn_event(&mut self, event: &mio::event::Event) {
        let token = event.token().0 - CONN_TOKEN_OFFSET;
        let Some(slot) = self.connections.get(token).cloned() else {
            return;
        };

        if event.is_error() || event.is_read_closed() {
            self.close_connection(token);
            return;
        }

        // SAFETY: the connection is Idle (owned only by the reactor) whenever we are the
        // one observing its readiness fresh out of `poll()` — one-shot rearm guarantees no
        // worker is mid-dispatch on it at this point.
        let conn = unsafe { slot.conn_mut() };

        if event.is_readable() {
            if self.ctx.concurrency_mode_reactor {
                if conn.state.try_claim(ConnState::Reading) {
                    self.submit(slot.clone(), token, Intent::Read);
                }
            } else {
                // Mode P: the reactor itself drains the socket; only parsing/response
                // composition is handed to a worker.
                if conn.fill_read_buf().is_err() {
                    self.close_connection(token);
                    return;
                }
                if conn.state.try_claim(ConnState::Reading) {
                    self.submit(slot.clone(), token, Intent::Process);
                }
            }
        } else if event.is_writable() && conn.state.try_claim(ConnState::Writing) {
            self.submit(slot.clone(), token, Intent::Write);
        }
    }

    fn submit(&mut self, slot: Arc<ConnSlot>, token: usize, intent: Intent) {
        if let Some(pool) = &self.worker_pool {
            if pool
                .submit(WorkItem {
                    slot: Arc::clone(&slot),
                    intent,
                })
                .is_err()
            {
                self.ctx.log.warn(format_args!(
                    "worker queue saturated, closing connection {token}"
                ));
                // SAFETY: this connection was just claimed above and isn't shared yet.
                unsafe { slot.conn_mut() }.state.mark_closing();
                self.close_connection(token);
            }
        }
    }

    /// Reactor-only removal: deregisters the FD, deletes the timer entry, and drops the
    /// slab slot (which closes the socket). Never runs concurrently with a worker holding
    /// the same connection (spec §3 "exactly one timer entry exists per live connection").
    fn close_connection(&mut self, token: usize) {
        if !self.connections.contains(token) {
            return;
        }
        let slot = self.connections.remove(token);
        // SAFETY: a connection only reaches `close_connection` once settled to `Closing` or
        // observed `Idle` by the reactor — no worker can be touching it concurrently.
        let conn = unsafe { slot.conn_mut() };
        let _ = self.poll.registry().deregister(&mut conn.stream);
        if let Some(timer_ref) = conn.timer.take() {
            self.timers.delete(timer_ref);
        }
        self.ctx.live_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Drains worker-posted messages, then (if the alarm fired) ticks the timer list,
    /// evicting idle connections per spec §4.5/§5.
    fn drain_reactor_msgs_and_tick(&mut self, tick_pending: bool) {
        while let Some(msg) = self.ctx.reactor_msgs.try_pop() {
            match msg {
                ReactorMsg::ExtendTimer(timer_ref, new_expiry) => {
                    self.timers.adjust(timer_ref, new_expiry);
                }
                ReactorMsg::Close(token) => self.close_connection(token),
            }
        }

        if !tick_pending {
            return;
        }

        let now = Instant::now();
        let mut to_close = Vec::new();
        let connections = &self.connections;
        self.timers.tick(now, |token| {
            if let Some(slot) = connections.get(token) {
                // SAFETY: a CAS success means no worker holds this connection; a CAS
                // failure means one does, and it alone decides when to close it next.
                let conn = unsafe { slot.conn_mut() };
                if conn.state.try_claim(ConnState::Closing) {
                    to_close.push(token);
                } else {
                    conn.timer_expired = true;
                }
            }
        });
        for token in to_close {
            self.close_connection(token);
        }
        // SAFETY: rescheduling a one-shot alarm we already armed once in `new`.
        unsafe {
            libc::alarm(ALARM_PERIOD_SECS as libc::c_uint);
        }
    }

    /// Main event loop (spec §4.8). Blocks in `poll()` until the listener, the self-pipe, or
    /// a connection FD becomes ready; returns once `SIGTERM`/`SIGINT` is observed.
    pub fn run(mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        self.log.info(format_args!(
            "reactor listening on {}:{}",
            self.config.host, self.config.port
        ));

        loop {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(e.into());
            }

            let mut tick_pending = false;
            let mut stop_requested = false;

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_loop(),
                    SIGNAL_TOKEN => {
                        let drained = self.self_pipe.drain();
                        tick_pending |= drained.tick_pending;
                        stop_requested |= drained.stop_requested;
                    }
                    _ => self.handle_conn_event(event),
                }
            }

            self.drain_reactor_msgs_and_tick(tick_pending);

            if stop_requested {
                break;
            }
        }

        self.shutdown();
        Ok(())
    }

    fn shutdown(mut self) {
        self.log.info(format_args!("shutting down"));
        if let Some(pool) = self.worker_pool.take() {
            pool.shutdown();
        }
        let tokens: Vec<usize> = self.connections.iter().map(|(t, _)| t).collect();
        for token in tokens {
            if self.config.linger_on_shutdown {
                // Best-effort: let already-queued writes through the kernel socket buffer
                // before the fd closes; no new I/O is attempted.
            }
            self.close_connection(token);
        }
        match Arc::try_unwrap(self.log) {
            Ok(sink) => sink.shutdown(),
            Err(_) => {} // Still referenced by in-flight log calls; best-effort shutdown only.
        }
    }
}

/// Runs one dequeued [`WorkItem`] to completion (spec §4.6 step 3, dispatched "according to
/// the configured concurrency mode"). This is the body every worker thread loops on.
fn dispatch(ctx: &Arc<ReactorContext>, item: WorkItem) {
    let token = item.slot.token;
    // SAFETY: this worker just won the CAS claim that handed it this `WorkItem`; no other
    // party touches the connection's buffers until it settles back to `Idle`.
    let conn = unsafe { item.slot.conn_mut() };

    match item.intent {
        Intent::Read => {
            if conn.fill_read_buf().is_err() {
                finish_closing(ctx, conn, token);
                return;
            }
            run_pipeline(ctx, conn);
            after_read_round(ctx, conn, token);
        }
        Intent::Process => {
            run_pipeline(ctx, conn);
            after_read_round(ctx, conn, token);
        }
        Intent::Write => match conn.writev_round() {
            Ok(true) => on_write_complete(ctx, conn, token),
            Ok(false) => {
                conn.state.settle();
                if !close_if_expired(ctx, conn, token) {
                    rearm(ctx, conn, token, Interest::WRITABLE);
                }
            }
            Err(_) => finish_closing(ctx, conn, token),
        },
    }
}

/// Drives the HTTP state machine over whatever is in the read buffer and, once a request
/// completes (or fails), resolves it into a composed response (spec §4.7).
fn run_pipeline(ctx: &Arc<ReactorContext>, conn: &mut Connection) {
    use crate::http::request::ReadOutcome;

    let outcome = conn.advance_request(ctx.max_body);
    let fulfill_outcome = match outcome {
        ReadOutcome::NoRequest => return,
        ReadOutcome::BadRequest => FulfillOutcome::BadRequest,
        ReadOutcome::NoResource => FulfillOutcome::NoResource,
        ReadOutcome::Forbidden => FulfillOutcome::Forbidden,
        ReadOutcome::InternalError => FulfillOutcome::InternalError,
        ReadOutcome::GetRequest => {
            let method = conn.request.method.expect("GetRequest implies a parsed method");
            let url = conn.request.url.clone();
            let body = conn.body().to_vec();
            match routing::fulfill(&url, method, &body, &ctx.user_cache, &ctx.db_pool) {
                Resolved::ServeFile(rel) => {
                    Connection::open_static_file(&ctx.document_root, &rel)
                }
                Resolved::BadRequest => FulfillOutcome::BadRequest,
                Resolved::Forbidden => FulfillOutcome::Forbidden,
                Resolved::NotFound => FulfillOutcome::NoResource,
                Resolved::InternalError => FulfillOutcome::InternalError,
            }
        }
    };
    conn.compose_response(fulfill_outcome);
}

/// After a read-and-parse round: if a response is ready, try an opportunistic write before
/// giving up the connection; otherwise rearm for more reads.
fn after_read_round(ctx: &Arc<ReactorContext>, conn: &mut Connection, token: usize) {
    if conn.response.bytes_total > 0 {
        match conn.writev_round() {
            Ok(true) => on_write_complete(ctx, conn, token),
            Ok(false) => {
                conn.state.settle();
                if !close_if_expired(ctx, conn, token) {
                    rearm(ctx, conn, token, Interest::WRITABLE);
                }
            }
            Err(_) => finish_closing(ctx, conn, token),
        }
        return;
    }

    conn.state.settle();
    if !close_if_expired(ctx, conn, token) {
        extend_timer(ctx, conn);
        rearm(ctx, conn, token, Interest::READABLE);
    }
}

fn on_write_complete(ctx: &Arc<ReactorContext>, conn: &mut Connection, token: usize) {
    if conn.request.linger {
        conn.reset_for_next_request();
        conn.state.settle();
        if !close_if_expired(ctx, conn, token) {
            extend_timer(ctx, conn);
            rearm(ctx, conn, token, Interest::READABLE);
        }
    } else {
        finish_closing(ctx, conn, token);
    }
}

/// If the idle timer fired while this connection was busy (spec §5: "the next attempt by a
/// worker to use that connection must observe `timer_expired` and abort"), close it instead
/// of rearming.
fn close_if_expired(ctx: &Arc<ReactorContext>, conn: &mut Connection, token: usize) -> bool {
    if conn.timer_expired {
        finish_closing(ctx, conn, token);
        true
    } else {
        false
    }
}

fn finish_closing(ctx: &Arc<ReactorContext>, conn: &mut Connection, token: usize) {
    conn.state.mark_closing();
    ctx.post(ReactorMsg::Close(token));
}

fn extend_timer(ctx: &Arc<ReactorContext>, conn: &Connection) {
    if let Some(timer_ref) = conn.timer {
        ctx.post(ReactorMsg::ExtendTimer(timer_ref, Instant::now() + idle_timeout()));
    }
}

/// One-shot rearm (spec §4.8): reregisters the connection's FD for the next direction of
/// interest. Only called once the worker has settled the connection's state back to
/// `Idle`, so the reactor is free to observe and dispatch it again.
fn rearm(ctx: &Arc<ReactorContext>, conn: &mut Connection, token: usize, interest: Interest) {
    let fd = conn.stream.as_raw_fd();
    if ctx
        .registry
        .reregister(&mut conn.stream, Token(token + CONN_TOKEN_OFFSET), interest)
        .is_err()
    {
        ctx.log.warn(format_args!(
            "failed to rearm connection {token} (fd {fd}), requesting close"
        ));
        conn.state.mark_closing();
        ctx.post(ReactorMsg::Close(token));
    }
}
