//! # ioloop - reactor event loop and Unix-socket message IPC
//!
//! Coordinates a controller process with its helpers on one machine:
//! a single-threaded reactor multiplexes fds, signals and periodic timers,
//! and a message-framed Unix-domain socket transport rides on it.
//!
//! ## Quick Start
//!
//! ```ignore
//! use ioloop::{EventAction, EventReactor, Message, UnixSocketConnection, UnixSocketListener};
//!
//! let listener = UnixSocketListener::create("my-service", true)?;
//! let mut reactor = EventReactor::new();
//!
//! reactor.add_read_event(listener.fd(), move |reactor| {
//!     let Ok(conn) = listener.accept_connection() else {
//!         return EventAction::Continue;
//!     };
//!     let reply = conn.clone();
//!     conn.prepare_for_io(
//!         reactor,
//!         move |_, msg| {
//!             let out = Message::new(msg.msg_type.wrapping_add(1), msg.payload);
//!             reply.send_message(&out, true).is_ok().into()
//!         },
//!         |_| EventAction::ExitLoop,
//!     )
//!     .is_ok()
//!     .into()
//! })?;
//! reactor.add_signal_events(&[libc::SIGINT, libc::SIGTERM], |_| EventAction::ExitLoop)?;
//! reactor.run_loop()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        callbacks, message handlers, send_message()          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┴───────────────────┐
//!          ▼                                       ▼
//!    ┌───────────────────────┐        ┌───────────────────────┐
//!    │     ioloop-socket     │        │    ioloop-reactor     │
//!    │ listener, connection, │───────►│ EventReactor, handle, │
//!    │ decode buffer         │        │ epoll, signals, timer │
//!    └───────────────────────┘        └───────────────────────┘
//!                │                                 │
//!                └────────────────┬────────────────┘
//!                                 ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                      ioloop-core                        │
//!    │   Message framing, MessageRingBuffer, LoopError, kprint │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use ioloop_core::{
    align_up,
    try_parse_header,
    LoopError,
    Message,
    MessageHeader,
    MessageRef,
    MessageRingBuffer,
    Result,
    RingFullError,
    Workload,
    HEADER_SIZE,
    MESSAGE_ALIGN,
};

// Re-export kprint macros for logging
pub use ioloop_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use ioloop_core::kprint::{
    init as init_logging, set_flush_enabled, set_log_level, set_timestamps_enabled, LogLevel,
};

// Re-export env utilities
pub use ioloop_core::{env_get, env_get_bool, env_get_opt, env_get_size};

// Re-export reactor types
pub use ioloop_reactor::{
    signal_is_ignored,
    EventAction,
    EventCallback,
    EventKind,
    EventReactor,
    EventRef,
    ReactorConfig,
    ReactorHandle,
};

// Re-export socket types
pub use ioloop_socket::{
    CloseHandler,
    MessageHandler,
    SocketConfig,
    UnixSocketConnection,
    UnixSocketListener,
};
