//! Real-time streaming value marker.
//!
//! Streaming values cross the mailbox as raw byte images; the host
//! never interprets them. [`RtValue`] marks the types for which that
//! copy is sound.

/// Plain-old-data values safe to move through a mailbox as raw bytes.
///
/// # Safety
///
/// Implementors must guarantee the type has no padding bytes, no
/// pointers or references, and that every bit pattern of its size is a
/// valid value. Violating this makes [`RtValue::read_bytes`] undefined
/// behavior.
pub unsafe trait RtValue: Copy + Send + 'static {
    /// Size of the value image in bytes.
    const SIZE: usize = core::mem::size_of::<Self>();

    /// The raw byte image of this value.
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: Self is POD per the trait contract.
        unsafe { core::slice::from_raw_parts(self as *const Self as *const u8, Self::SIZE) }
    }

    /// Reconstruct a value from its byte image. Returns `None` on a
    /// size mismatch (registration/type confusion on the host side).
    fn read_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        // SAFETY: length checked; every bit pattern is valid per the
        // trait contract; read_unaligned tolerates the source slice.
        Some(unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const Self) })
    }
}

macro_rules! impl_rt_value {
    ($($t:ty),+ $(,)?) => {
        $(
            // SAFETY: primitive numeric types are padding-free and
            // valid for every bit pattern.
            unsafe impl RtValue for $t {}
        )+
    };
}

impl_rt_value!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f64_roundtrip() {
        let v = 1.23f64;
        let bytes = v.as_bytes();
        assert_eq!(bytes.len(), 8);
        assert_eq!(f64::read_bytes(bytes), Some(1.23));
    }

    #[test]
    fn size_mismatch_rejected() {
        assert_eq!(f64::read_bytes(&[0u8; 4]), None);
        assert_eq!(u32::read_bytes(&[0u8; 8]), None);
    }

    #[test]
    fn custom_pod_struct() {
        #[repr(C)]
        #[derive(Debug, Clone, Copy, PartialEq)]
        struct Sample {
            seconds: f64,
            ticks: u64,
        }
        // SAFETY: two 8-byte fields, no padding, all bit patterns valid.
        unsafe impl RtValue for Sample {}

        let s = Sample {
            seconds: 0.5,
            ticks: 42,
        };
        assert_eq!(Sample::read_bytes(s.as_bytes()), Some(s));
    }
}
