//! Fixed-capacity wire status.
//!
//! `RawStatus` is the only error representation that crosses the plugin
//! boundary, in both directions. It never heap-allocates: the message is
//! an inline byte buffer, truncated deterministically on overflow. The
//! declared `length` is clamped to the buffer capacity on both write and
//! read, so a hostile or buggy peer cannot make the host read past the
//! buffer.

use static_assertions::const_assert_eq;

/// Maximum message length carried by a `RawStatus`, in bytes.
pub const STATUS_MESSAGE_CAPACITY: usize = 100;

/// Wire status: `Ok` (code 0) or an error code with a truncated message.
///
/// Layout is fixed and shared by both sides of the ABI boundary.
/// Invariant: `length <= STATUS_MESSAGE_CAPACITY`. Constructors enforce
/// it on write; [`RawStatus::message_bytes`] clamps on read.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStatus {
    /// Canonical status code. `0` = Ok; see `axon_common::ErrorCode`
    /// for the shared enumeration.
    pub code: i32,
    /// Inline message bytes. Only the first `length` bytes are valid.
    pub message: [u8; STATUS_MESSAGE_CAPACITY],
    /// Number of valid message bytes. Clamped to capacity on read.
    pub length: usize,
}

#[cfg(target_pointer_width = "64")]
const_assert_eq!(core::mem::size_of::<RawStatus>(), 112);
const_assert_eq!(core::mem::align_of::<RawStatus>(), core::mem::align_of::<usize>());

impl RawStatus {
    /// The Ok status (code 0, empty message).
    #[inline]
    pub const fn ok() -> Self {
        Self {
            code: 0,
            message: [0u8; STATUS_MESSAGE_CAPACITY],
            length: 0,
        }
    }

    /// Build a status from a code and a message, truncating the message
    /// to `STATUS_MESSAGE_CAPACITY` bytes. Truncation is silent and
    /// deterministic: exactly `min(capacity, message.len())` bytes are
    /// copied.
    pub const fn new(code: i32, message: &[u8]) -> Self {
        let mut buf = [0u8; STATUS_MESSAGE_CAPACITY];
        let len = if message.len() > STATUS_MESSAGE_CAPACITY {
            STATUS_MESSAGE_CAPACITY
        } else {
            message.len()
        };
        let mut i = 0;
        while i < len {
            buf[i] = message[i];
            i += 1;
        }
        Self {
            code,
            message: buf,
            length: len,
        }
    }

    /// `true` if this status carries code 0.
    #[inline]
    pub const fn is_ok(&self) -> bool {
        self.code == 0
    }

    /// The valid message bytes. The declared `length` is clamped to the
    /// buffer capacity before any byte is read, so this is safe even on
    /// a status received from a misbehaving peer.
    #[inline]
    pub fn message_bytes(&self) -> &[u8] {
        let len = self.length.min(STATUS_MESSAGE_CAPACITY);
        &self.message[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_status() {
        let s = RawStatus::ok();
        assert!(s.is_ok());
        assert_eq!(s.code, 0);
        assert!(s.message_bytes().is_empty());
    }

    #[test]
    fn short_message_roundtrip() {
        let s = RawStatus::new(3, b"slot already bound");
        assert!(!s.is_ok());
        assert_eq!(s.code, 3);
        assert_eq!(s.message_bytes(), b"slot already bound");
    }

    #[test]
    fn message_truncated_to_capacity() {
        let long = [b'x'; 300];
        let s = RawStatus::new(2, &long);
        assert_eq!(s.code, 2);
        assert_eq!(s.length, STATUS_MESSAGE_CAPACITY);
        assert_eq!(s.message_bytes(), &long[..STATUS_MESSAGE_CAPACITY]);
    }

    #[test]
    fn exact_capacity_message_preserved() {
        let msg = [b'a'; STATUS_MESSAGE_CAPACITY];
        let s = RawStatus::new(1, &msg);
        assert_eq!(s.length, STATUS_MESSAGE_CAPACITY);
        assert_eq!(s.message_bytes(), &msg[..]);
    }

    #[test]
    fn hostile_length_clamped_on_read() {
        // A buggy or hostile peer may set `length` past the buffer.
        let mut s = RawStatus::new(6, b"corrupted");
        s.length = usize::MAX;
        assert_eq!(s.message_bytes().len(), STATUS_MESSAGE_CAPACITY);
    }
}
