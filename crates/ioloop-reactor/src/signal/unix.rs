//! Unix self-pipe signal routing
//!
//! A process has one disposition per signal, so routing is process-wide:
//! `SIGNAL_PIPES[signo]` holds the write end of the pipe belonging to the
//! reactor that owns `signo`, or -1. The handler is async-signal-safe: it
//! loads one atomic and calls `write(2)`.

use ioloop_core::error::{LoopError, Result};
use ioloop_core::kdebug;

use nix::fcntl::OFlag;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::collections::HashMap;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

/// Signal numbers are 1..MAX_SIGNAL.
const MAX_SIGNAL: usize = 65;

#[allow(clippy::declare_interior_mutable_const)]
const UNROUTED: AtomicI32 = AtomicI32::new(-1);

static SIGNAL_PIPES: [AtomicI32; MAX_SIGNAL] = [UNROUTED; MAX_SIGNAL];

extern "C" fn route_signal(signo: libc::c_int) {
    if signo <= 0 || signo as usize >= MAX_SIGNAL {
        return;
    }
    let fd = SIGNAL_PIPES[signo as usize].load(Ordering::Acquire);
    if fd < 0 {
        return;
    }
    // write(2) may clobber errno of the interrupted code.
    let saved = unsafe { *libc::__errno_location() };
    let byte = signo as u8;
    unsafe {
        libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        *libc::__errno_location() = saved;
    }
}

/// True if `signo`'s current disposition is `SIG_IGN`.
///
/// Used by controllers that skip SIGHUP handling when started under
/// `nohup`.
pub fn signal_is_ignored(signo: i32) -> bool {
    let mut old: libc::sigaction = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::sigaction(signo, std::ptr::null(), &mut old) };
    rc == 0 && old.sa_sigaction == libc::SIG_IGN
}

struct Route {
    signal: Signal,
    previous: SigAction,
}

/// Self-pipe plus the signals this reactor currently owns.
pub(crate) struct SignalPipe {
    read: OwnedFd,
    write: OwnedFd,
    routes: HashMap<i32, Route>,
}

impl SignalPipe {
    pub(crate) fn new() -> Result<Self> {
        let (read, write) = nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
        Ok(Self {
            read,
            write,
            routes: HashMap::new(),
        })
    }

    #[inline]
    pub(crate) fn read_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    /// Claim `signo` for this pipe and install the routing handler.
    ///
    /// Idempotent for a signal this pipe already owns.
    pub(crate) fn route(&mut self, signo: i32) -> Result<()> {
        if self.routes.contains_key(&signo) {
            return Ok(());
        }
        if signo <= 0
            || signo as usize >= MAX_SIGNAL
            || signo == libc::SIGKILL
            || signo == libc::SIGSTOP
        {
            return Err(LoopError::InvalidSignal(signo));
        }
        let signal = Signal::try_from(signo).map_err(|_| LoopError::InvalidSignal(signo))?;

        let slot = &SIGNAL_PIPES[signo as usize];
        let write_fd = self.write.as_raw_fd();
        if slot
            .compare_exchange(-1, write_fd, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LoopError::SignalInUse(signo));
        }

        let action = SigAction::new(
            SigHandler::Handler(route_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        // SAFETY: route_signal only touches an atomic and calls write(2).
        let previous = match unsafe { sigaction(signal, &action) } {
            Ok(prev) => prev,
            Err(errno) => {
                slot.store(-1, Ordering::Release);
                return Err(LoopError::Os(errno));
            }
        };
        kdebug!("signal {} routed to pipe fd {}", signo, write_fd);
        self.routes.insert(signo, Route { signal, previous });
        Ok(())
    }

    /// Restore the disposition `signo` had before `route()` and release it.
    pub(crate) fn unroute(&mut self, signo: i32) {
        let Some(route) = self.routes.remove(&signo) else {
            return;
        };
        // SAFETY: reinstalls whatever handler was there before.
        if let Err(errno) = unsafe { sigaction(route.signal, &route.previous) } {
            ioloop_core::kwarn!("restoring disposition of signal {} failed: {}", signo, errno);
        }
        SIGNAL_PIPES[signo as usize].store(-1, Ordering::Release);
        kdebug!("signal {} unrouted", signo);
    }

    /// Append every pending delivery to `out`, in arrival order.
    pub(crate) fn drain(&self, out: &mut Vec<i32>) {
        let mut buf = [0u8; 128];
        loop {
            let n = unsafe {
                libc::read(
                    self.read.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
            out.extend(buf[..n as usize].iter().map(|&b| b as i32));
        }
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        let owned: Vec<i32> = self.routes.keys().copied().collect();
        for signo in owned {
            self.unroute(signo);
        }
    }
}
