//! Linux `epoll` backend.
//!
//! Level-triggered. Each registered descriptor carries its own fd as the
//! epoll token, so the reactor maps readiness back to Events through its
//! fd table.

use super::{Interest, Readiness};
use ioloop_core::error::{LoopError, Result};

use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
    EPOLLRDHUP, EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};
use nix::errno::Errno;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::time::Duration;

pub(crate) struct EpollPoller {
    epoll: OwnedFd,
    /// Reusable buffer handed to `epoll_wait`.
    events: Vec<epoll_event>,
}

impl EpollPoller {
    pub(crate) fn new(max_events: usize) -> Result<Self> {
        let fd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(LoopError::last_os_error());
        }
        let max_events = max_events.max(1);
        Ok(Self {
            // SAFETY: fresh descriptor from epoll_create1.
            epoll: unsafe { OwnedFd::from_raw_fd(fd) },
            events: vec![epoll_event { events: 0, u64: 0 }; max_events],
        })
    }

    pub(crate) fn add(&self, fd: RawFd, interest: Interest) -> Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, interest)
    }

    pub(crate) fn modify(&self, fd: RawFd, interest: Interest) -> Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, interest)
    }

    /// Remove `fd`. A descriptor that was already closed is not an error.
    pub(crate) fn delete(&self, fd: RawFd) -> Result<()> {
        let rc = unsafe {
            epoll_ctl(self.epoll.as_raw_fd(), EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if rc < 0 {
            match Errno::last() {
                Errno::EBADF | Errno::ENOENT => return Ok(()),
                errno => return Err(LoopError::Os(errno)),
            }
        }
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Interest) -> Result<()> {
        let mut flags = 0;
        if interest.read {
            flags |= EPOLLIN | EPOLLRDHUP;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }
        let mut event = epoll_event {
            events: flags as u32,
            u64: fd as u64,
        };
        let rc = unsafe { epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            return Err(LoopError::last_os_error());
        }
        Ok(())
    }

    /// Wait for readiness, appending to `ready`.
    ///
    /// `None` blocks indefinitely. The timeout is rounded up to whole
    /// milliseconds so a timer never wakes early. An interrupted wait
    /// returns with nothing ready.
    pub(crate) fn wait(
        &mut self,
        timeout: Option<Duration>,
        ready: &mut Vec<Readiness>,
    ) -> Result<()> {
        let timeout_ms = timeout.map(timeout_to_ms).unwrap_or(-1);
        let n = unsafe {
            epoll_wait(
                self.epoll.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            return match Errno::last() {
                Errno::EINTR => Ok(()),
                errno => Err(LoopError::Os(errno)),
            };
        }

        for ev in &self.events[..n as usize] {
            let bits = ev.events as libc::c_int;
            ready.push(Readiness {
                fd: ev.u64 as RawFd,
                readable: bits & (EPOLLIN | EPOLLRDHUP | EPOLLHUP | EPOLLERR) != 0,
                writable: bits & (EPOLLOUT | EPOLLHUP | EPOLLERR) != 0,
            });
        }
        Ok(())
    }
}

/// Round up to whole milliseconds, saturating at `c_int::MAX`.
fn timeout_to_ms(d: Duration) -> libc::c_int {
    let ms = d.as_nanos().div_ceil(1_000_000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}
