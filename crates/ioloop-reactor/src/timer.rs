//! Periodic deadline bookkeeping and the high-resolution timer source.
//!
//! Periodic Events keep an absolute `Instant` deadline. In coarse mode the
//! earliest deadline becomes the `epoll_wait` timeout (millisecond
//! granularity, rounded up). In precise mode a `timerfd` on
//! `CLOCK_MONOTONIC` is armed for the earliest deadline and polled like any
//! other descriptor, so wakeups keep nanosecond resolution.

use ioloop_core::error::Result;

use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

/// Next deadline after a firing at `deadline`.
///
/// Periods stay phase-locked to the original schedule, but a loop that fell
/// behind by more than a period skips the missed firings instead of
/// bursting to catch up.
#[inline]
pub(crate) fn next_deadline(deadline: Instant, period: Duration, now: Instant) -> Instant {
    let next = deadline + period;
    if next <= now {
        now + period
    } else {
        next
    }
}

/// Time left until `deadline`, zero if it already passed.
#[inline]
pub(crate) fn until(deadline: Instant, now: Instant) -> Duration {
    deadline.saturating_duration_since(now)
}

/// One-shot `timerfd` re-armed before every wait.
pub(crate) struct PreciseTimer {
    fd: TimerFd,
    armed: Option<Instant>,
}

impl PreciseTimer {
    pub(crate) fn new() -> Result<Self> {
        let fd = TimerFd::new(
            ClockId::CLOCK_MONOTONIC,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )?;
        Ok(Self { fd, armed: None })
    }

    #[inline]
    pub(crate) fn fd(&self) -> RawFd {
        self.fd.as_fd().as_raw_fd()
    }

    /// Arm for `deadline`, or disarm on `None`. Skips the syscall when the
    /// deadline is unchanged.
    pub(crate) fn arm(&mut self, deadline: Option<Instant>, now: Instant) -> Result<()> {
        if deadline == self.armed {
            return Ok(());
        }
        match deadline {
            Some(at) => {
                // A zero it_value disarms a timerfd; keep at least 1ns.
                let left = until(at, now).max(Duration::from_nanos(1));
                self.fd.set(
                    Expiration::OneShot(TimeSpec::from(left)),
                    TimerSetTimeFlags::empty(),
                )?;
            }
            None => self.fd.unset()?,
        }
        self.armed = deadline;
        Ok(())
    }

    /// Consume the expiration count after the fd polled readable.
    pub(crate) fn acknowledge(&mut self) {
        let mut expirations: u64 = 0;
        unsafe {
            libc::read(
                self.fd(),
                &mut expirations as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
        self.armed = None;
    }
}
