//! Canonical error codes and the host-side error type.
//!
//! The code enumeration is shared by both sides of the ABI boundary:
//! the wire status carries the `i32` value, the host works with
//! [`StatusError`]. Codes are stable; new codes may be appended but
//! existing values never change.

use thiserror::Error;

/// Canonical status codes shared across the ABI boundary.
///
/// `Ok` is 0. Unknown incoming values map to [`ErrorCode::Internal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// Success.
    Ok = 0,
    /// Unknown slot, stream, state variable, or Action type.
    NotFound = 1,
    /// Malformed or mismatched-type payload, ABI version mismatch,
    /// oversized streaming payload.
    InvalidArgument = 2,
    /// Duplicate registration.
    AlreadyExists = 3,
    /// Operation requires prior registration or state that is missing.
    FailedPrecondition = 4,
    /// Value not yet produced.
    Unavailable = 5,
    /// ABI or serialization corruption, plugin panic.
    Internal = 6,
}

impl ErrorCode {
    /// Convert from the raw wire value. Unknown codes collapse to
    /// `Internal` so that corruption never masquerades as success.
    pub const fn from_i32(value: i32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::NotFound,
            2 => Self::InvalidArgument,
            3 => Self::AlreadyExists,
            4 => Self::FailedPrecondition,
            5 => Self::Unavailable,
            _ => Self::Internal,
        }
    }
}

/// Host-side error: a canonical code paired with a human-readable
/// message. Marshaled to and from the fixed-capacity wire status by
/// [`crate::status`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StatusError {
    /// Unknown slot/stream/state-variable/Action-type name.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed or mismatched payload, ABI mismatch, oversized write.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Duplicate registration.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Missing prior registration or out-of-order lifecycle call.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Value not yet produced.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// ABI/serialization corruption or plugin panic.
    #[error("internal: {0}")]
    Internal(String),
}

impl StatusError {
    /// The canonical code of this error.
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// The bare message, without the code prefix added by `Display`.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(m)
            | Self::InvalidArgument(m)
            | Self::AlreadyExists(m)
            | Self::FailedPrecondition(m)
            | Self::Unavailable(m)
            | Self::Internal(m) => m,
        }
    }

    /// Build an error from a code and message. `Ok` and unknown codes
    /// become `Internal`.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::NotFound => Self::NotFound(message),
            ErrorCode::InvalidArgument => Self::InvalidArgument(message),
            ErrorCode::AlreadyExists => Self::AlreadyExists(message),
            ErrorCode::FailedPrecondition => Self::FailedPrecondition(message),
            ErrorCode::Unavailable => Self::Unavailable(message),
            ErrorCode::Ok | ErrorCode::Internal => Self::Internal(message),
        }
    }
}
