//! Readiness multiplexer.
//!
//! The reactor only needs level-triggered read/write readiness on a set of
//! descriptors plus a millisecond wait timeout. The concrete backend is
//! selected at compile time.

use std::os::unix::io::RawFd;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod epoll;
        pub(crate) use epoll::EpollPoller as Poller;
    } else {
        compile_error!("ioloop-reactor currently supports Linux only");
    }
}

/// Readiness a descriptor is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    pub(crate) const READ: Interest = Interest {
        read: true,
        write: false,
    };

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        !self.read && !self.write
    }
}

/// One ready descriptor reported by `wait()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Readiness {
    pub(crate) fd: RawFd,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
}
