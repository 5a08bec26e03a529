//! Reactor wakeup for `ReactorHandle` commands.
//!
//! The handle queues a command, then bumps this eventfd so a reactor
//! parked in `epoll_wait` returns and applies it. The counter absorbs any
//! number of bumps between two drains, so one pass handles them all.

use ioloop_core::error::{LoopError, Result};

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;

pub(crate) struct EventFdNotifier {
    fd: OwnedFd,
}

impl EventFdNotifier {
    /// Create a new non-blocking, close-on-exec eventfd.
    pub(crate) fn create() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(LoopError::last_os_error());
        }
        // SAFETY: fd was just returned by eventfd() and is owned by nobody else.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    #[inline]
    pub(crate) fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub(crate) fn notify(&self) -> Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = LoopError::last_os_error();
            // Counter saturated: a wakeup is already pending.
            if err.is_would_block() {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Reset the counter so the fd stops polling readable.
    pub(crate) fn drain(&self) {
        let mut val: u64 = 0;
        unsafe {
            libc::read(
                self.fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}
