//! Error types for the reactor and the socket transport

use core::fmt;

use nix::errno::Errno;

/// Result type for ioloop operations
pub type Result<T> = std::result::Result<T, LoopError>;

/// Errors reported synchronously by registration and I/O calls.
///
/// Transient conditions (`EAGAIN`) never surface here; they are
/// absorbed and retried on the next readiness notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopError {
    /// OS call failed with errno
    Os(Errno),

    /// Event reference is stale (deleted) or belongs to another reactor
    InvalidEvent,

    /// The fd already has an Event of the same kind
    AlreadyRegistered,

    /// Another reactor owns handlers for this signal
    SignalInUse(i32),

    /// Signal number can't carry a handler (SIGKILL, SIGSTOP, out of range)
    InvalidSignal(i32),

    /// `use_precise_timer()` called after the multiplexer was created
    TimerModeLocked,

    /// `run_loop()` called while a loop is already running
    AlreadyRunning,

    /// A callback returned `Fatal`; the loop was aborted
    CallbackFailed,

    /// Send ring buffer has no room for the message
    BufferFull,

    /// `no_more_message()` ran or the connection is closed
    ConnectionClosed,

    /// `prepare_for_io()` called twice on one connection
    AlreadyPrepared,

    /// Socket path longer than `sockaddr_un` allows
    PathTooLong(usize),

    /// Peer declared a message length shorter than the header
    MalformedMessage(u32),
}

impl fmt::Display for LoopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopError::Os(e) => write!(f, "OS error: {}", e),
            LoopError::InvalidEvent => write!(f, "invalid or removed event"),
            LoopError::AlreadyRegistered => write!(f, "event already registered for fd"),
            LoopError::SignalInUse(sig) => write!(f, "signal {} owned by another reactor", sig),
            LoopError::InvalidSignal(sig) => write!(f, "signal {} can't be handled", sig),
            LoopError::TimerModeLocked => {
                write!(f, "timer mode must be chosen before the first event is added")
            }
            LoopError::AlreadyRunning => write!(f, "event loop already running"),
            LoopError::CallbackFailed => write!(f, "event callback failed"),
            LoopError::BufferFull => write!(f, "send buffer full"),
            LoopError::ConnectionClosed => write!(f, "connection closed"),
            LoopError::AlreadyPrepared => write!(f, "connection already attached to a reactor"),
            LoopError::PathTooLong(len) => write!(f, "socket path too long ({} bytes)", len),
            LoopError::MalformedMessage(len) => {
                write!(f, "malformed message: declared length {}", len)
            }
        }
    }
}

impl std::error::Error for LoopError {}

impl From<Errno> for LoopError {
    fn from(e: Errno) -> Self {
        LoopError::Os(e)
    }
}

impl LoopError {
    /// Capture `errno` from the last failed libc call.
    #[inline]
    pub fn last_os_error() -> Self {
        LoopError::Os(Errno::last())
    }

    /// True for `EAGAIN`/`EWOULDBLOCK`.
    #[inline]
    pub fn is_would_block(&self) -> bool {
        matches!(self, LoopError::Os(Errno::EAGAIN))
    }
}
