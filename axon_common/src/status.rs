//! Marshaling between [`StatusError`] and the wire status.
//!
//! Crossing the boundary is lossy but deterministic: messages longer
//! than the wire capacity are truncated to exactly
//! `STATUS_MESSAGE_CAPACITY` bytes, the code is always preserved.
//! Reading clamps the declared length before touching any byte and
//! tolerates non-UTF-8 message bytes.

use axon_abi::RawStatus;

use crate::error::{ErrorCode, StatusError};

/// Marshal a host error to the wire status, truncating the message.
pub fn to_raw(err: &StatusError) -> RawStatus {
    RawStatus::new(err.code() as i32, err.message().as_bytes())
}

/// Marshal a fallible result to the wire status.
pub fn result_to_raw(result: Result<(), StatusError>) -> RawStatus {
    match result {
        Ok(()) => RawStatus::ok(),
        Err(e) => to_raw(&e),
    }
}

/// Interpret a wire status received from the other side of the
/// boundary. Unknown codes surface as `Internal`; message bytes are
/// recovered lossily.
pub fn from_raw(raw: &RawStatus) -> Result<(), StatusError> {
    if raw.is_ok() {
        return Ok(());
    }
    let code = ErrorCode::from_i32(raw.code);
    let message = String::from_utf8_lossy(raw.message_bytes()).into_owned();
    Err(StatusError::from_code(code, message))
}
