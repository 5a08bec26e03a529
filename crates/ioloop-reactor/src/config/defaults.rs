//! Library defaults for `ReactorConfig`.

/// Ready descriptors fetched per `epoll_wait` call.
pub const MAX_EVENTS: usize = 64;

/// Periodic Events use the `epoll_wait` timeout (millisecond resolution)
/// unless this is set.
pub const PRECISE_TIMER: bool = false;
