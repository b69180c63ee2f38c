//! Streaming I/O exchange between non-real-time clients and the RT
//! cycle.
//!
//! Every declared streaming input owns one mailbox: a non-RT thread
//! parses an incoming envelope through the plugin's registered parser
//! into the mailbox's free slot and commits; the RT `sense` polls it.
//! The (at most one) streaming output runs the other way: the RT cycle
//! commits fixed-size value images, and the plugin's converter
//! serializes the latest one on client request.
//!
//! The plugin-registered callbacks and the value images are opaque
//! here: the host only knows each value's fixed size, declared at
//! registration.

use core::ffi::c_void;
use std::sync::Mutex;

use tracing::debug;

use axon_abi::{RawStatus, RawStreamingIo, StreamingConverterFn, StreamingParserFn, UserDataDropFn};
use axon_common::consts::MAX_STREAMING_PAYLOAD;
use axon_common::error::StatusError;
use axon_common::signature::AnyMessage;
use axon_common::status::{from_raw, result_to_raw, to_raw};

use crate::mailbox::{Reader, Writer};

// ─── Callback Guard ─────────────────────────────────────────────────

/// Owns the `user_data` pointer captured by a parser or converter
/// registration; runs the plugin's release callback exactly once.
pub(crate) struct CallbackGuard {
    user_data: *mut c_void,
    drop_fn: UserDataDropFn,
}

impl CallbackGuard {
    pub(crate) fn new(user_data: *mut c_void, drop_fn: UserDataDropFn) -> Self {
        Self { user_data, drop_fn }
    }

    fn user_data(&self) -> *mut c_void {
        self.user_data
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        if let Some(drop_fn) = self.drop_fn {
            // SAFETY: user_data was handed over at registration together
            // with this release callback; dropped exactly once.
            unsafe { drop_fn(self.user_data) };
        }
    }
}

// SAFETY: the registration contract requires the callback state behind
// user_data to be Send + Sync; the guard itself is only a pointer and
// the release function.
unsafe impl Send for CallbackGuard {}
unsafe impl Sync for CallbackGuard {}

// ─── Non-RT Input Feed ──────────────────────────────────────────────

/// The non-RT half of one streaming input: validates envelopes, runs
/// the plugin parser, commits the parsed value image.
pub(crate) struct InputFeed {
    name: String,
    /// Declared payload type, validated before the parser runs.
    message_type: String,
    parser: StreamingParserFn,
    guard: CallbackGuard,
    writer: Writer,
}

impl InputFeed {
    pub(crate) fn new(
        name: String,
        message_type: String,
        parser: StreamingParserFn,
        guard: CallbackGuard,
        writer: Writer,
    ) -> Self {
        Self {
            name,
            message_type,
            parser,
            guard,
            writer,
        }
    }

    fn push(&mut self, envelope_bytes: &[u8]) -> Result<(), StatusError> {
        if envelope_bytes.len() > MAX_STREAMING_PAYLOAD {
            return Err(StatusError::InvalidArgument(format!(
                "streaming payload of {} bytes exceeds the {MAX_STREAMING_PAYLOAD} byte limit",
                envelope_bytes.len()
            )));
        }
        let envelope = AnyMessage::unpack(envelope_bytes)?;
        if envelope.type_name != self.message_type {
            return Err(StatusError::InvalidArgument(format!(
                "input '{}' expects '{}', got '{}'",
                self.name, self.message_type, envelope.type_name
            )));
        }

        let slot = self.writer.free_slot();
        let cap = slot.len();
        let mut written = 0usize;
        // SAFETY: the parser was registered for this input; the slot
        // pointers describe the writable free slot for this call only.
        let status = unsafe {
            (self.parser)(
                self.guard.user_data(),
                envelope_bytes.as_ptr(),
                envelope_bytes.len(),
                slot.as_mut_ptr(),
                cap,
                &mut written,
            )
        };
        from_raw(&status)?;
        if written > cap {
            return Err(StatusError::Internal(format!(
                "parser for input '{}' reported {written} bytes into a {cap} byte slot",
                self.name
            )));
        }
        self.writer.commit(written);
        Ok(())
    }
}

// ─── Non-RT Output Port ─────────────────────────────────────────────

/// The non-RT half of the streaming output: serializes the latest
/// committed value image through the plugin converter.
pub(crate) struct OutputPort {
    message_type: String,
    converter: StreamingConverterFn,
    guard: CallbackGuard,
    reader: Reader,
}

impl OutputPort {
    pub(crate) fn new(
        message_type: String,
        converter: StreamingConverterFn,
        guard: CallbackGuard,
        reader: Reader,
    ) -> Self {
        Self {
            message_type,
            converter,
            guard,
            reader,
        }
    }

    fn convert_latest(&mut self) -> Result<Vec<u8>, StatusError> {
        let image = self.reader.latest().ok_or_else(|| {
            StatusError::Unavailable("no streaming output value produced yet".to_string())
        })?;
        let mut out: Vec<u8> = Vec::new();
        // SAFETY: the converter was registered for this output; the
        // image is borrowed for the call; emit_collect only appends to
        // the Vec behind emit_ctx.
        let status = unsafe {
            (self.converter)(
                self.guard.user_data(),
                image.as_ptr(),
                image.len(),
                emit_collect,
                &mut out as *mut Vec<u8> as *mut c_void,
            )
        };
        from_raw(&status)?;
        Ok(out)
    }
}

/// Emit sink collecting converter output into a host-owned `Vec`.
unsafe extern "C" fn emit_collect(emit_ctx: *mut c_void, bytes_ptr: *const u8, bytes_len: usize) {
    if bytes_ptr.is_null() {
        return;
    }
    // SAFETY: emit_ctx is the Vec passed by convert_latest, valid for
    // this call; bytes are borrowed from the converter.
    let (out, bytes) = unsafe {
        (
            &mut *(emit_ctx as *mut Vec<u8>),
            core::slice::from_raw_parts(bytes_ptr, bytes_len),
        )
    };
    out.extend_from_slice(bytes);
}

// ─── Streaming Exchange ─────────────────────────────────────────────

/// Non-RT surface of one Action instance's streaming I/O, shared with
/// the owning client. All methods may block briefly on the internal
/// lock; none are called from the RT cycle.
pub struct StreamingExchange {
    inner: Mutex<ExchangeInner>,
}

impl core::fmt::Debug for StreamingExchange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StreamingExchange").finish_non_exhaustive()
    }
}

struct ExchangeInner {
    inputs: Vec<InputFeed>,
    output: Option<OutputPort>,
}

impl StreamingExchange {
    pub(crate) fn new(inputs: Vec<InputFeed>, output: Option<OutputPort>) -> Self {
        Self {
            inner: Mutex::new(ExchangeInner { inputs, output }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ExchangeInner> {
        // A poisoning panic was already contained at the ABI bridge;
        // the inner state is still consistent.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Parse one incoming envelope into the named input's mailbox.
    ///
    /// # Errors
    /// `NotFound` for an unknown input name, `InvalidArgument` for a
    /// malformed or type-mismatched envelope, anything the parser
    /// returns otherwise.
    pub fn push_input(&self, name: &str, envelope_bytes: &[u8]) -> Result<(), StatusError> {
        let mut inner = self.lock();
        let feed = inner
            .inputs
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| StatusError::NotFound(format!("streaming input '{name}'")))?;
        feed.push(envelope_bytes)?;
        debug!(input = name, bytes = envelope_bytes.len(), "streaming input committed");
        Ok(())
    }

    /// Serialize the latest streaming output value.
    ///
    /// # Errors
    /// `NotFound` if the Action declares no output, `Unavailable`
    /// before the first committed value.
    pub fn convert_output(&self) -> Result<Vec<u8>, StatusError> {
        let mut inner = self.lock();
        let port = inner
            .output
            .as_mut()
            .ok_or_else(|| StatusError::NotFound("no streaming output declared".to_string()))?;
        let bytes = port.convert_latest()?;
        debug!(
            message_type = %port.message_type,
            bytes = bytes.len(),
            "streaming output converted"
        );
        Ok(bytes)
    }

    /// Declared message type of the streaming output, if any.
    pub fn output_message_type(&self) -> Option<String> {
        self.lock().output.as_ref().map(|p| p.message_type.clone())
    }
}

// ─── RT-Side Streams ────────────────────────────────────────────────

/// The RT half of one Action instance's streaming I/O: mailbox readers
/// for the inputs, the mailbox writer for the output. Lives with the
/// Action instance on the cycle thread.
pub(crate) struct RtStreams {
    inputs: Vec<Reader>,
    /// Writer plus the registered fixed value size.
    output: Option<(Writer, usize)>,
}

impl RtStreams {
    pub(crate) fn new(inputs: Vec<Reader>, output: Option<(Writer, usize)>) -> Self {
        Self { inputs, output }
    }

    /// The raw table passed across the ABI, valid while `self` stays
    /// borrowed at the given address.
    pub(crate) fn raw_table(&mut self) -> RawStreamingIo {
        RawStreamingIo {
            host: self as *mut Self as *mut c_void,
            poll_input,
            write_output,
        }
    }

    fn poll(&mut self, input_id: u32) -> Option<&[u8]> {
        self.inputs.get_mut(input_id as usize)?.read_fresh()
    }

    fn write(&mut self, output_id: u32, bytes: &[u8]) -> Result<(), StatusError> {
        let (writer, value_size) = match (output_id, self.output.as_mut()) {
            (0, Some(out)) => (&mut out.0, out.1),
            _ => {
                return Err(StatusError::NotFound(format!(
                    "streaming output {output_id}"
                )));
            }
        };
        if bytes.len() != value_size {
            return Err(StatusError::InvalidArgument(format!(
                "output value is {} bytes, registered size is {value_size}",
                bytes.len()
            )));
        }
        // Infallible: value_size equals the mailbox capacity.
        let wrote = writer.write(bytes);
        debug_assert!(wrote);
        Ok(())
    }
}

unsafe extern "C" fn poll_input(
    host: *mut c_void,
    input_id: u32,
    out_ptr: *mut *const u8,
    out_len: *mut usize,
) -> bool {
    // SAFETY: host is the RtStreams the table was built from, exclusive
    // for the duration of the dispatch call.
    let streams = unsafe { &mut *(host as *mut RtStreams) };
    match streams.poll(input_id) {
        Some(bytes) => {
            // SAFETY: valid out-parameters per the table contract.
            unsafe {
                *out_ptr = bytes.as_ptr();
                *out_len = bytes.len();
            }
            true
        }
        None => false,
    }
}

unsafe extern "C" fn write_output(
    host: *mut c_void,
    output_id: u32,
    ptr: *const u8,
    len: usize,
) -> RawStatus {
    if ptr.is_null() && len > 0 {
        return to_raw(&StatusError::InvalidArgument(
            "null output value pointer".to_string(),
        ));
    }
    // SAFETY: host per the table contract; the value bytes are borrowed
    // for the call.
    let (streams, bytes) = unsafe {
        (
            &mut *(host as *mut RtStreams),
            if len == 0 {
                &[][..]
            } else {
                core::slice::from_raw_parts(ptr, len)
            },
        )
    };
    result_to_raw(streams.write(output_id, bytes))
}
