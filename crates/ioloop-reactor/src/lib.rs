//! # ioloop-reactor
//!
//! Single-threaded reactor multiplexing descriptor readiness, POSIX
//! signals and periodic timers onto one `run_loop()`.
//!
//! ## Modules
//!
//! - `reactor` - `EventReactor` and the cross-thread `ReactorHandle`
//! - `event` - `EventRef`, `EventKind`, `EventAction`, the event table
//! - `config` - `ReactorConfig` with env overrides
//! - `signal` - self-pipe signal routing, `signal_is_ignored`
//! - `poller` - epoll backend
//! - `timer` - periodic deadlines and the timerfd source
//! - `notifier` - eventfd wakeup
//!
//! ## Example
//!
//! ```ignore
//! use ioloop_reactor::{EventAction, EventReactor};
//! use std::time::Duration;
//!
//! let mut reactor = EventReactor::new();
//! let mut ticks = 0;
//! reactor.add_periodic_event(Duration::from_millis(10), move |_| {
//!     ticks += 1;
//!     if ticks == 5 { EventAction::ExitLoop } else { EventAction::Continue }
//! })?;
//! reactor.run_loop()?;
//! ```

pub mod config;
pub mod event;
pub mod reactor;
pub mod signal;

mod notifier;
mod poller;
mod timer;

pub use config::ReactorConfig;
pub use event::{EventAction, EventCallback, EventKind, EventRef};
pub use reactor::{EventReactor, ReactorHandle};
pub use signal::signal_is_ignored;
