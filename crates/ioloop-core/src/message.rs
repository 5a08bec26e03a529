//! Framed message format for the Unix-socket transport
//!
//! # Wire layout
//!
//! ```text
//! offset 0        4          8                    len          aligned_len
//!        ┌────────┬──────────┬────────────────────┬────────────┐
//!        │ len:u32│ type:u32 │ payload (len - 8)  │ zero pad   │
//!        └────────┴──────────┴────────────────────┴────────────┘
//! ```
//!
//! `len` counts header + payload but not the padding. Every message is
//! padded to `align_up(len)` so the next header starts on an 8-byte
//! boundary relative to the first one. Both fields are host byte order;
//! peers are always on the same machine.

/// Size of the `{len, type}` header.
pub const HEADER_SIZE: usize = 8;

/// Every stored or transmitted message is padded to this many bytes.
pub const MESSAGE_ALIGN: usize = 8;

/// Round `n` up to the next multiple of [`MESSAGE_ALIGN`].
#[inline]
pub const fn align_up(n: usize) -> usize {
    (n + MESSAGE_ALIGN - 1) & !(MESSAGE_ALIGN - 1)
}

/// Decoded header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Header + payload length, unpadded.
    pub len: u32,
    pub msg_type: u32,
}

impl MessageHeader {
    /// Offset of the payload from the header start.
    pub const PAYLOAD_OFFSET: usize = HEADER_SIZE;

    /// Bytes the message occupies on the wire, padding included.
    #[inline]
    pub fn aligned_len(&self) -> usize {
        align_up(self.len as usize)
    }

    /// A header shorter than itself can't be framed.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.len as usize >= HEADER_SIZE
    }
}

/// Read the two header fields from the front of `bytes`.
///
/// Returns `None` until at least [`HEADER_SIZE`] bytes are available.
/// The fields are extracted with explicit byte reads, so `bytes` needs no
/// particular alignment.
#[inline]
pub fn try_parse_header(bytes: &[u8]) -> Option<MessageHeader> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    let len = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let msg_type = u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    Some(MessageHeader { len, msg_type })
}

/// An owned message, ready to be queued for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: u32,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(msg_type: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    /// Message carrying only a type.
    pub fn empty(msg_type: u32) -> Self {
        Self {
            msg_type,
            payload: Vec::new(),
        }
    }

    /// Header + payload length, unpadded (the value written in `len`).
    #[inline]
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// A message always has at least its header.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn aligned_len(&self) -> usize {
        align_up(self.len())
    }

    #[inline]
    pub fn header(&self) -> MessageHeader {
        MessageHeader {
            len: self.len() as u32,
            msg_type: self.msg_type,
        }
    }

    /// The header bytes as they appear on the wire.
    #[inline]
    pub fn header_bytes(&self) -> [u8; HEADER_SIZE] {
        let header = self.header();
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(&header.len.to_ne_bytes());
        out[4..].copy_from_slice(&header.msg_type.to_ne_bytes());
        out
    }

}

/// A received message borrowed from the connection's decode buffer.
///
/// Valid only for the duration of the message callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef<'a> {
    pub msg_type: u32,
    pub payload: &'a [u8],
}

impl<'a> MessageRef<'a> {
    /// Unpadded length as declared by the sender.
    #[inline]
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn to_message(&self) -> Message {
        Message::new(self.msg_type, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Padded wire encoding of `msg`, appended to `out`.
    fn encode_into(msg: &Message, out: &mut Vec<u8>) {
        let start = out.len();
        out.extend_from_slice(&msg.header_bytes());
        out.extend_from_slice(&msg.payload);
        out.resize(start + msg.aligned_len(), 0);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 8);
        assert_eq!(align_up(8), 8);
        assert_eq!(align_up(9), 16);
        assert_eq!(align_up(15), 16);
    }

    #[test]
    fn test_encode_pads_but_records_unpadded_len() {
        let msg = Message::new(7, b"abc".to_vec());
        let mut wire = Vec::new();
        encode_into(&msg, &mut wire);

        assert_eq!(wire.len(), 16);
        let hdr = try_parse_header(&wire).unwrap();
        assert_eq!(hdr.len, 11);
        assert_eq!(hdr.msg_type, 7);
        assert_eq!(hdr.aligned_len(), 16);
        assert_eq!(&wire[8..11], b"abc");
        assert!(wire[11..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parse_needs_full_header() {
        let wire = Message::empty(3).header_bytes();
        assert!(try_parse_header(&wire[..7]).is_none());
        let hdr = try_parse_header(&wire).unwrap();
        assert_eq!(hdr, MessageHeader { len: 8, msg_type: 3 });
        assert!(hdr.is_valid());
    }

    #[test]
    fn test_parse_unaligned_slice() {
        let mut wire = vec![0xAA];
        encode_into(&Message::new(0xDEAD_BEEF, vec![1, 2]), &mut wire);
        let hdr = try_parse_header(&wire[1..]).unwrap();
        assert_eq!(hdr.msg_type, 0xDEAD_BEEF);
        assert_eq!(hdr.len, 10);
    }

    #[test]
    fn test_short_declared_len_is_invalid() {
        let mut bytes = [0u8; 8];
        bytes[..4].copy_from_slice(&4u32.to_ne_bytes());
        let hdr = try_parse_header(&bytes).unwrap();
        assert!(!hdr.is_valid());
    }

    #[test]
    fn test_message_ref_to_message() {
        let msg = Message::new(2, vec![9u8; 5]);
        let view = MessageRef {
            msg_type: msg.msg_type,
            payload: &msg.payload,
        };
        assert_eq!(view.len(), 13);
        assert_eq!(view.to_message(), msg);
    }
}
