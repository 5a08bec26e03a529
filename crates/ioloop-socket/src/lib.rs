//! # ioloop-socket
//!
//! Message-oriented Unix-domain socket transport on top of
//! `ioloop-reactor`.
//!
//! Each message is a `{len, type}` header plus payload, padded to 8 bytes
//! on the wire. A connection decodes incoming bytes into messages on the
//! reactor thread and drains a send ring that any thread may fill.
//!
//! ## Modules
//!
//! - `listener` - `UnixSocketListener` (filesystem or abstract namespace)
//! - `connection` - `UnixSocketConnection`, message/close handlers
//! - `config` - `SocketConfig` with env overrides

pub mod config;
pub mod connection;
pub mod listener;

pub use config::SocketConfig;
pub use connection::{CloseHandler, MessageHandler, UnixSocketConnection};
pub use listener::UnixSocketListener;
