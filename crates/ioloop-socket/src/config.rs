//! Socket Configuration
//!
//! Library defaults with runtime environment overrides. Sizes accept
//! `K`/`M`/`G` suffixes (`IOLOOP_SEND_BUFFER_SIZE=1M`).

use ioloop_core::env::{env_get, env_get_size};

pub mod defaults {
    /// Send ring capacity per connection.
    pub const SEND_BUFFER_SIZE: usize = 512 * 1024;

    /// Initial decode buffer per connection. Grows on demand.
    pub const READ_BUFFER_SIZE: usize = 16 * 1024;

    /// `listen(2)` backlog.
    pub const LISTEN_BACKLOG: i32 = 16;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketConfig {
    pub send_buffer_size: usize,
    pub read_buffer_size: usize,
    pub listen_backlog: i32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SocketConfig {
    /// Defaults with environment overrides.
    ///
    /// - `IOLOOP_SEND_BUFFER_SIZE` - send ring capacity
    /// - `IOLOOP_READ_BUFFER_SIZE` - initial decode buffer
    /// - `IOLOOP_LISTEN_BACKLOG` - listen backlog
    pub fn from_env() -> Self {
        Self::new()
            .send_buffer_size(env_get_size("IOLOOP_SEND_BUFFER_SIZE", defaults::SEND_BUFFER_SIZE))
            .read_buffer_size(env_get_size("IOLOOP_READ_BUFFER_SIZE", defaults::READ_BUFFER_SIZE))
            .listen_backlog(env_get("IOLOOP_LISTEN_BACKLOG", defaults::LISTEN_BACKLOG))
    }

    pub fn new() -> Self {
        Self {
            send_buffer_size: defaults::SEND_BUFFER_SIZE,
            read_buffer_size: defaults::READ_BUFFER_SIZE,
            listen_backlog: defaults::LISTEN_BACKLOG,
        }
    }

    // Builder methods

    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = size;
        self
    }

    /// Clamped to at least one message header.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(ioloop_core::HEADER_SIZE);
        self
    }

    pub fn listen_backlog(mut self, backlog: i32) -> Self {
        self.listen_backlog = backlog;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = SocketConfig::new();
        assert_eq!(c.send_buffer_size, 512 * 1024);
        assert_eq!(c.read_buffer_size, 16 * 1024);
        assert_eq!(c.listen_backlog, 16);
    }

    #[test]
    fn test_read_buffer_clamped() {
        assert_eq!(SocketConfig::new().read_buffer_size(1).read_buffer_size, 8);
    }
}
