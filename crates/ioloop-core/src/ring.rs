//! `MessageRingBuffer`: byte ring of padded messages for one connection.
//!
//! Producers (any thread, under the connection mutex) append whole
//! messages with `store_message()`. The reactor thread drains the bytes
//! with `peek_data()` / `commit_data()` and hands them to `send()`.
//!
//! # Thread safety
//!
//! None built in. The owning connection wraps the ring in the same mutex
//! that guards its write-Event-enabled flag.
//!
//! # Layout
//!
//! ```text
//!            read_head            read_head + valid (mod capacity)
//!                │                        │
//!  [ free ... ][ msg0 | msg1 | msg2 ... ][ free ... ]
//! ```
//!
//! A message that doesn't fit before the end of the storage is split
//! across the wrap point. `peek_data()` only ever returns the contiguous
//! run up to the wrap point, so a consumer may need two peeks to see a
//! split message.

use crate::message::{Message, HEADER_SIZE, MESSAGE_ALIGN};

/// Error returned when a message doesn't fit in the free space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingFullError;

impl std::fmt::Display for RingFullError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "message ring buffer full")
    }
}

impl std::error::Error for RingFullError {}

impl From<RingFullError> for crate::error::LoopError {
    fn from(_: RingFullError) -> Self {
        crate::error::LoopError::BufferFull
    }
}

pub struct MessageRingBuffer {
    buf: Box<[u8]>,
    /// Offset of the first unsent byte.
    read_head: usize,
    /// Bytes stored and not yet committed. Invariant: `valid <= capacity`.
    valid: usize,
}

impl MessageRingBuffer {
    /// Create a ring holding up to `capacity` bytes of padded messages.
    ///
    /// `capacity` is rounded up to a multiple of the message alignment.
    pub fn new(capacity: usize) -> Self {
        let capacity = crate::message::align_up(capacity.max(MESSAGE_ALIGN));
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read_head: 0,
            valid: 0,
        }
    }

    /// Append one message, padded to the alignment.
    ///
    /// All-or-nothing: when the padded message exceeds the free space the
    /// ring is left untouched. Never blocks.
    pub fn store_message(&mut self, msg: &Message) -> Result<(), RingFullError> {
        let aligned = msg.aligned_len();
        if self.capacity() - self.valid < aligned {
            return Err(RingFullError);
        }

        let mut write_at = (self.read_head + self.valid) % self.capacity();
        write_at = self.copy_in(write_at, &msg.header_bytes());
        write_at = self.copy_in(write_at, &msg.payload);
        let pad = aligned - HEADER_SIZE - msg.payload.len();
        if pad > 0 {
            self.copy_in(write_at, &[0u8; MESSAGE_ALIGN][..pad]);
        }

        self.valid += aligned;
        Ok(())
    }

    /// Next contiguous run of stored bytes; empty when the ring is empty.
    ///
    /// The run stops at the end of the storage even if more bytes wrap to
    /// the front. Call again after `commit_data()` to get the rest.
    pub fn peek_data(&self) -> &[u8] {
        let run = self.valid.min(self.capacity() - self.read_head);
        &self.buf[self.read_head..self.read_head + run]
    }

    /// Release `n` bytes from the front of the ring.
    ///
    /// # Panics
    ///
    /// If `n` exceeds the stored byte count. Committing bytes that were
    /// never peeked is a caller bug, not a runtime condition.
    pub fn commit_data(&mut self, n: usize) {
        assert!(
            n <= self.valid,
            "commit_data({}) with only {} valid bytes",
            n,
            self.valid
        );
        self.read_head = (self.read_head + n) % self.capacity();
        self.valid -= n;
        if self.valid == 0 {
            // Keep future messages contiguous whenever possible.
            self.read_head = 0;
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.valid == 0
    }

    /// True once at least half the capacity holds unsent bytes.
    #[inline]
    pub fn is_half_full(&self) -> bool {
        self.valid * 2 >= self.capacity()
    }

    /// Stored (unsent) bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.valid
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity() - self.valid
    }

    /// Copy `data` at `at`, splitting across the wrap point.
    /// Returns the offset just past the copied bytes.
    fn copy_in(&mut self, at: usize, data: &[u8]) -> usize {
        let cap = self.capacity();
        let first = data.len().min(cap - at);
        self.buf[at..at + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        if rest > 0 {
            self.buf[..rest].copy_from_slice(&data[first..]);
        }
        (at + data.len()) % cap
    }
}

impl std::fmt::Debug for MessageRingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRingBuffer")
            .field("capacity", &self.capacity())
            .field("read_head", &self.read_head)
            .field("valid", &self.valid)
            .finish()
    }
}
