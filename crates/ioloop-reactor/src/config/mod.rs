//! Reactor Configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use ioloop_reactor::{EventReactor, ReactorConfig};
//!
//! let config = ReactorConfig::from_env().precise_timer(true);
//! let mut reactor = EventReactor::with_config(config);
//! ```

pub mod defaults;

use ioloop_core::env::{env_get, env_get_bool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Ready descriptors fetched per wait
    pub max_events: usize,
    /// Use a `timerfd` for periodic Events instead of the wait timeout
    pub precise_timer: bool,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ReactorConfig {
    /// Defaults with environment overrides.
    ///
    /// - `IOLOOP_MAX_EVENTS` - ready descriptors per wait
    /// - `IOLOOP_PRECISE_TIMER` - `1`/`true` selects the timerfd source
    pub fn from_env() -> Self {
        Self {
            max_events: env_get("IOLOOP_MAX_EVENTS", defaults::MAX_EVENTS).max(1),
            precise_timer: env_get_bool("IOLOOP_PRECISE_TIMER", defaults::PRECISE_TIMER),
        }
    }

    /// Library defaults, ignoring the environment.
    pub fn new() -> Self {
        Self {
            max_events: defaults::MAX_EVENTS,
            precise_timer: defaults::PRECISE_TIMER,
        }
    }

    // Builder methods

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n.max(1);
        self
    }

    pub fn precise_timer(mut self, enable: bool) -> Self {
        self.precise_timer = enable;
        self
    }
}
