use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use mio::net::TcpStream;

use crate::error::ServerError;
use crate::http::request::{ReadOutcome, Request};
use crate::http::response::{self, FulfillOutcome};
use crate::timer::TimerRef;

pub const R_BUF: usize = 2048;
pub const W_BUF: usize = 1024;
pub const MAX_FILENAME: usize = 200;
pub const MAX_FD: usize = 65536;

/// One-shot ownership state transferred between the reactor and a worker. The reactor
/// rearms a connection's FD only after observing a CAS transition back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Idle = 0,
    Reading = 1,
    Writing = 2,
    Closing = 3,
}

impl ConnState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnState::Idle,
            1 => ConnState::Reading,
            2 => ConnState::Writing,
            _ => ConnState::Closing,
        }
    }
}

/// Atomic wrapper enforcing the reactor/worker handshake around a connection's buffers:
/// whichever side successfully CASes into `Reading`/`Writing` owns the buffers exclusively
/// until it CASes back to `Idle`.
pub struct AtomicConnState(AtomicU8);

impl AtomicConnState {
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnState::Idle as u8))
    }

    pub fn load(&self) -> ConnState {
        ConnState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Attempts to move from `Idle` into `to`. Returns whether it succeeded.
    pub fn try_claim(&self, to: ConnState) -> bool {
        self.0
            .compare_exchange(
                ConnState::Idle as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Settles back to `Idle`, the signal the reactor waits for before rearming.
    pub fn settle(&self) {
        self.0.store(ConnState::Idle as u8, Ordering::Release);
    }

    pub fn mark_closing(&self) {
        self.0.store(ConnState::Closing as u8, Ordering::Release);
    }
}

impl Default for AtomicConnState {
    fn default() -> Self {
        Self::new()
    }
}

/// A memory-mapped file region backing a `FILE_REQUEST` response body. Unmapped on drop.
pub struct MappedFile {
    addr: *mut libc::c_void,
    len: usize,
}

impl MappedFile {
    pub fn open(fd: RawFd, len: usize) -> std::io::Result<Self> {
        if len == 0 {
            return Ok(Self {
                addr: std::ptr::null_mut(),
                len: 0,
            });
        }
        // SAFETY: fd is a valid, open, readable file descriptor owned by the caller for the
        // duration of this call; the mapping outlives it independently once established.
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { addr, len })
    }

    pub fn as_slice(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: addr/len describe a live PROT_READ mapping for this object's lifetime.
        unsafe { std::slice::from_raw_parts(self.addr as *const u8, self.len) }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if self.len > 0 {
            // SAFETY: addr was returned by a successful mmap of `len` bytes in `open`.
            unsafe {
                libc::munmap(self.addr, self.len);
            }
        }
    }
}

// `MappedFile` is read-only and never mutated across threads once handed to a worker.
unsafe impl Send for MappedFile {}

/// Response assembly state: a header-block prefix in `write_buf` plus an optional mapped
/// file body, emitted together via `writev`.
#[derive(Default)]
pub struct ResponseAssembly {
    pub file: Option<MappedFile>,
    pub bytes_total: usize,
    pub bytes_sent: usize,
}

/// Per-accepted-socket record (spec §3 "Connection").
pub struct Connection {
    pub stream: TcpStream,
    pub peer: std::net::SocketAddr,
    pub read_buf: Vec<u8>,
    pub write_buf: Vec<u8>,
    pub checked: usize,
    pub read_end: usize,
    pub request: Request,
    pub response: ResponseAssembly,
    pub state: AtomicConnState,
    pub timer_expired: bool,
    pub timer: Option<TimerRef>,
    pub last_activity: Instant,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: std::net::SocketAddr) -> Self {
        Self {
            stream,
            peer,
            read_buf: vec![0u8; R_BUF],
            write_buf: Vec::with_capacity(W_BUF),
            checked: 0,
            read_end: 0,
            request: Request::new(),
            response: ResponseAssembly::default(),
            state: AtomicConnState::new(),
            timer_expired: false,
            timer: None,
            last_activity: Instant::now(),
        }
    }

    pub fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Reads until `WouldBlock`, EOF, or the read buffer is full. Full is treated as a
    /// malformed/over-large request rather than grown (spec §4.9).
    pub fn fill_read_buf(&mut self) -> Result<bool, ServerError> {
        use std::io::Read;
        loop {
            if self.read_end >= self.read_buf.len() {
                return Ok(false);
            }
            match self.stream.read(&mut self.read_buf[self.read_end..]) {
                Ok(0) => return Ok(true),
                Ok(n) => self.read_end += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => return Err(ServerError::IoFatal),
            }
        }
    }

    /// Drives the request parser over whatever is buffered. A buffer that fills up with no
    /// terminal outcome yet (no complete line, or a body that still hasn't arrived) can
    /// never make progress since `read_buf` is fixed-capacity (spec §4.9: overflow of any
    /// buffer is a malformed request, not something to grow).
    pub fn advance_request(&mut self, max_body: usize) -> ReadOutcome {
        let outcome =
            self.request
                .advance(&mut self.read_buf, &mut self.checked, self.read_end, max_body);
        if outcome == ReadOutcome::NoRequest && self.read_end >= self.read_buf.len() {
            return ReadOutcome::BadRequest;
        }
        outcome
    }

    /// Compacts the consumed prefix of the read buffer so the next request starts at 0,
    /// restoring the fixed capacity (spec's `0 ≤ checked ≤ read_end ≤ R_BUF` invariant).
    pub fn reset_for_next_request(&mut self) {
        self.read_buf.copy_within(self.checked..self.read_end, 0);
        self.read_end -= self.checked;
        self.checked = 0;
        self.request.reset();
        self.write_buf.clear();
        self.response = ResponseAssembly::default();
    }

    pub fn body(&self) -> &[u8] {
        if !self.request.has_body {
            return &[];
        }
        &self.read_buf[self.request.body_start..self.read_end]
    }

    /// Resolves a static file path under `document_root`, `stat`s it, and either mmaps it
    /// (`FILE_REQUEST`) or reports why it can't be served.
    pub fn open_static_file(document_root: &Path, rel: &Path) -> FulfillOutcome {
        if rel
            .to_str()
            .map(|s| s.len() > MAX_FILENAME)
            .unwrap_or(true)
        {
            return FulfillOutcome::BadRequest;
        }
        let full = document_root.join(rel);
        let metadata = match std::fs::symlink_metadata(&full) {
            Ok(m) => m,
            Err(_) => return FulfillOutcome::NoResource,
        };
        if metadata.is_dir() {
            return FulfillOutcome::BadRequest;
        }
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o004 == 0 {
            return FulfillOutcome::Forbidden;
        }
        let file = match std::fs::File::open(&full) {
            Ok(f) => f,
            Err(_) => return FulfillOutcome::InternalError,
        };
        let size = metadata.len() as usize;
        FulfillOutcome::FileRequest {
            fd: file.into_raw_fd_keep_alive(),
            size,
        }
    }

    /// Prepares the write buffer and iovecs for a resolved fulfillment outcome.
    pub fn compose_response(&mut self, outcome: FulfillOutcome) {
        match outcome {
            FulfillOutcome::FileRequest { fd, size } => {
                response::write_file_header(&mut self.write_buf, size, self.request.linger);
                let mapped = MappedFile::open(fd, size).ok();
                // SAFETY: fd came from `File::into_raw_fd_keep_alive`, which intentionally
                // leaks ownership to this raw fd; close it once mmap has taken its own
                // reference-independent mapping.
                unsafe {
                    libc::close(fd);
                }
                self.response.bytes_total = self.write_buf.len() + mapped.as_ref().map(MappedFile::len).unwrap_or(0);
                self.response.file = mapped;
            }
            other => {
                response::write_canned(&mut self.write_buf, &other, self.request.linger);
                self.response.bytes_total = self.write_buf.len();
            }
        }
    }

    /// One `writev` round. Returns `Ok(true)` once the full response has been sent.
    pub fn writev_round(&mut self) -> Result<bool, ServerError> {
        let header_sent = self.response.bytes_sent.min(self.write_buf.len());
        let header_remaining = &self.write_buf[header_sent..];
        let file_slice = self
            .response
            .file
            .as_ref()
            .map(MappedFile::as_slice)
            .unwrap_or(&[]);
        let file_sent = self.response.bytes_sent.saturating_sub(self.write_buf.len());
        let file_remaining = &file_slice[file_sent.min(file_slice.len())..];

        let mut iov = [
            libc::iovec {
                iov_base: header_remaining.as_ptr() as *mut libc::c_void,
                iov_len: header_remaining.len(),
            },
            libc::iovec {
                iov_base: file_remaining.as_ptr() as *mut libc::c_void,
                iov_len: file_remaining.len(),
            },
        ];
        let count = if file_remaining.is_empty() { 1 } else { 2 };

        // SAFETY: iov_base/iov_len describe live slices for the duration of this syscall.
        let n = unsafe { libc::writev(self.raw_fd(), iov.as_mut_ptr(), count as i32) };
        if n < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Ok(false);
            }
            return Err(ServerError::IoFatal);
        }
        self.response.bytes_sent += n as usize;
        Ok(self.response.bytes_sent >= self.response.bytes_total)
    }
}

impl MappedFile {
    fn len(&self) -> usize {
        self.len
    }
}

trait IntoRawFdKeepAlive {
    fn into_raw_fd_keep_alive(self) -> RawFd;
}

impl IntoRawFdKeepAlive for std::fs::File {
    fn into_raw_fd_keep_alive(self) -> RawFd {
        use std::os::fd::IntoRawFd;
        self.into_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_state_cas_enforces_single_ownership() {
        let state = AtomicConnState::new();
        assert!(state.try_claim(ConnState::Reading));
        assert!(!state.try_claim(ConnState::Writing));
        state.settle();
        assert!(state.try_claim(ConnState::Writing));
    }

    #[test]
    fn static_file_rejects_world_unreadable() {
        let dir = std::env::temp_dir().join(format!("conn_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file_path = dir.join("secret.html");
        std::fs::write(&file_path, b"hi").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&file_path, std::fs::Permissions::from_mode(0o600)).unwrap();

        let outcome = Connection::open_static_file(&dir, Path::new("secret.html"));
        assert!(matches!(outcome, FulfillOutcome::Forbidden));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn static_file_missing_is_no_resource() {
        let dir = std::env::temp_dir().join(format!("conn_test_missing_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let outcome = Connection::open_static_file(&dir, Path::new("nope.html"));
        assert!(matches!(outcome, FulfillOutcome::NoResource));
        std::fs::remove_dir_all(&dir).ok();
    }

    fn dummy_connection() -> Connection {
        use std::net::{TcpListener, TcpStream as StdTcpStream};
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _keep_alive = StdTcpStream::connect(addr).unwrap();
        let (std_stream, peer) = listener.accept().unwrap();
        std_stream.set_nonblocking(true).unwrap();
        Connection::new(mio::net::TcpStream::from_std(std_stream), peer)
    }

    #[test]
    fn request_line_overflowing_the_read_buffer_is_a_bad_request() {
        // No CRLF anywhere and the buffer is already full: this request can never complete,
        // since read_buf is fixed-capacity rather than grown (spec §4.9).
        let mut conn = dummy_connection();
        let cap = conn.read_buf.len();
        for b in conn.read_buf.iter_mut() {
            *b = b'a';
        }
        conn.read_end = cap;
        assert_eq!(conn.advance_request(1024), ReadOutcome::BadRequest);
    }
}
