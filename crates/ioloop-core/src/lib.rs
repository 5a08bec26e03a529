//! # ioloop-core
//!
//! Platform-neutral building blocks shared by the reactor and the
//! Unix-socket transport.
//!
//! ## Modules
//!
//! - `message` - `{len, type}` framing, 8-byte padding, header decoder
//! - `ring` - `MessageRingBuffer`, the per-connection send buffer
//! - `error` - `LoopError` and the crate-wide `Result`
//! - `workload` - contract for the profiled child process
//! - `kprint` - Kernel-style leveled logging macros
//! - `env` - Environment variable utilities

pub mod message;
pub mod ring;
pub mod error;
pub mod workload;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use message::{align_up, try_parse_header, Message, MessageHeader, MessageRef};
pub use message::{HEADER_SIZE, MESSAGE_ALIGN};
pub use ring::{MessageRingBuffer, RingFullError};
pub use error::{LoopError, Result};
pub use workload::Workload;
pub use env::{env_get, env_get_bool, env_get_opt, env_get_size};
