//! Self-pipe for async signal delivery (spec §4.8, §6). A signal handler is not allowed to
//! do anything beyond async-signal-safe operations, so it only `write`s the raw signal
//! number into the pipe; the reactor thread decodes it from ordinary readiness. The same
//! pipe doubles as the "post a message to the reactor" wake mechanism workers use after
//! pushing a [`super::ReactorMsg`] — a plain `0` byte, which is not a signal number on this
//! platform, tells the reactor "check your message queue" without it having to poll.

use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

/// Distinguishes a worker nudge from a real signal number in the drained byte stream.
pub const NUDGE_BYTE: u8 = 0;

static SIGNAL_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn forward_to_pipe(signum: libc::c_int) {
    let fd = SIGNAL_WRITE_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    let byte = signum as u8;
    // SAFETY: `write` is async-signal-safe; `byte` lives on this stack frame for the
    // duration of the call.
    unsafe {
        libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
    }
}

/// Outcome of draining the self-pipe once.
#[derive(Debug, Default, Clone, Copy)]
pub struct Drained {
    pub tick_pending: bool,
    pub stop_requested: bool,
}

pub struct SelfPipe {
    pub read_fd: RawFd,
    write_fd: RawFd,
}

impl SelfPipe {
    /// Creates the pipe and points the process-wide signal forwarder at its write end.
    /// Does not install any handlers yet — call [`SelfPipe::install_handlers`] once the
    /// pipe is registered with the reactor's readiness facility.
    pub fn new() -> std::io::Result<Self> {
        let mut fds = [0i32; 2];
        // SAFETY: `fds` is a valid two-element buffer for `pipe2` to fill in.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        SIGNAL_WRITE_FD.store(fds[1], Ordering::SeqCst);
        Ok(Self {
            read_fd: fds[0],
            write_fd: fds[1],
        })
    }

    /// Ignores `SIGPIPE` and routes `SIGALRM`/`SIGTERM`/`SIGINT` into this pipe.
    pub fn install_handlers(&self) -> std::io::Result<()> {
        // SAFETY: installs process-wide signal dispositions; called once during startup
        // before the reactor thread begins polling.
        unsafe {
            if libc::signal(libc::SIGPIPE, libc::SIG_IGN) == libc::SIG_ERR {
                return Err(std::io::Error::last_os_error());
            }
            for &sig in &[libc::SIGALRM, libc::SIGTERM, libc::SIGINT] {
                let mut action: libc::sigaction = std::mem::zeroed();
                action.sa_sigaction = forward_to_pipe as usize;
                libc::sigemptyset(&mut action.sa_mask);
                action.sa_flags = libc::SA_RESTART;
                if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
        }
        Ok(())
    }

    /// The write end, for handing to [`super::ReactorContext`] so workers can nudge the
    /// reactor without holding a reference to this `SelfPipe` itself.
    pub fn write_fd(&self) -> RawFd {
        self.write_fd
    }

    /// Wakes the reactor out of `poll()` without waiting for a real signal — used by
    /// workers after posting a [`super::ReactorMsg`].
    pub fn nudge(&self) {
        // SAFETY: write_fd is open for the lifetime of this SelfPipe.
        unsafe {
            libc::write(
                self.write_fd,
                &NUDGE_BYTE as *const u8 as *const libc::c_void,
                1,
            );
        }
    }

    /// Reads every pending byte (looping to `EWOULDBLOCK`, matching the drain-to-EAGAIN
    /// discipline used everywhere else in the reactor) and classifies it.
    pub fn drain(&self) -> Drained {
        let mut buf = [0u8; 256];
        let mut out = Drained::default();
        loop {
            // SAFETY: buf is a valid, appropriately-sized stack buffer.
            let n = unsafe {
                libc::read(
                    self.read_fd,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::WouldBlock {
                    break;
                }
                break;
            }
            if n == 0 {
                break;
            }
            for &b in &buf[..n as usize] {
                match b as i32 {
                    x if x == libc::SIGALRM => out.tick_pending = true,
                    x if x == libc::SIGTERM || x == libc::SIGINT => out.stop_requested = true,
                    _ => {} // NUDGE_BYTE: just a wakeup, message queue draining handles the rest.
                }
            }
        }
        out
    }
}

impl Drop for SelfPipe {
    fn drop(&mut self) {
        SIGNAL_WRITE_FD.store(-1, Ordering::SeqCst);
        // SAFETY: both fds were opened by this object's constructor and not shared.
        unsafe {
            libc::close(self.read_fd);
            libc::close(self.write_fd);
        }
    }
}
