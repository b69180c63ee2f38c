//! Safe plugin-side views over the host's helper tables.
//!
//! Each view borrows a raw `#[repr(C)]` table for the duration of one
//! dispatch call. The slot map and streaming views are real-time safe:
//! every method is a bounded copy or an atomic mailbox operation on the
//! host side.

use core::ffi::c_void;

use axon_abi::{
    RawFactoryContext, RawJointCommand, RawJointState, RawSlotMap, RawStreamingIo,
};
use axon_common::error::StatusError;
use axon_common::signature::{
    RealtimeSlotId, SlotCapabilities, StreamingInputId, StreamingOutputId,
};
use axon_common::status::from_raw;

use crate::value::RtValue;

// ─── Slot Map ───────────────────────────────────────────────────────

/// Per-cycle borrowed view over the hardware features this Action
/// declared. Unknown or out-of-range slot ids yield an absent result,
/// not an error: that situation indicates a host bug, not a recoverable
/// Action-level condition.
pub struct SlotMapView<'a> {
    raw: &'a RawSlotMap,
}

impl<'a> SlotMapView<'a> {
    /// Wrap a raw slot map received through the dispatch table.
    ///
    /// # Safety
    /// `raw` and its host pointer must stay valid for `'a`.
    pub unsafe fn new(raw: &'a RawSlotMap) -> Self {
        Self { raw }
    }

    /// Read the joint state of the part behind `id`.
    pub fn joint_state(&self, id: RealtimeSlotId) -> Option<RawJointState> {
        let mut out = RawJointState::zeroed();
        // SAFETY: host table contract; out is a valid out-parameter.
        let ok = unsafe { (self.raw.read_joint_state)(self.raw.host, id.0, &mut out) };
        ok.then_some(out)
    }

    /// Write a joint command to the part behind `id`. Returns `false`
    /// for an unknown id or a slot without the command capability.
    pub fn write_joint_command(&self, id: RealtimeSlotId, cmd: &RawJointCommand) -> bool {
        // SAFETY: host table contract; cmd is borrowed for the call.
        unsafe { (self.raw.write_joint_command)(self.raw.host, id.0, cmd) }
    }

    /// Read the digital-input bank of the part behind `id`.
    pub fn digital_inputs(&self, id: RealtimeSlotId) -> Option<u64> {
        let mut bits = 0u64;
        // SAFETY: host table contract.
        let ok = unsafe { (self.raw.read_digital_inputs)(self.raw.host, id.0, &mut bits) };
        ok.then_some(bits)
    }

    /// Write the digital-output bank of the part behind `id`.
    pub fn write_digital_outputs(&self, id: RealtimeSlotId, bits: u64) -> bool {
        // SAFETY: host table contract.
        unsafe { (self.raw.write_digital_outputs)(self.raw.host, id.0, bits) }
    }
}

// ─── Streaming I/O ──────────────────────────────────────────────────

/// Per-cycle streaming I/O access passed into [`crate::Action::sense`].
pub struct StreamingIoView<'a> {
    raw: &'a RawStreamingIo,
}

impl<'a> StreamingIoView<'a> {
    /// Wrap a raw streaming table received through the dispatch table.
    ///
    /// # Safety
    /// `raw` and its host pointer must stay valid for `'a`.
    pub unsafe fn new(raw: &'a RawStreamingIo) -> Self {
        Self { raw }
    }

    /// Poll a streaming input. Returns `None` when nothing new was
    /// committed since the last poll (or on a value-size mismatch,
    /// which indicates registration confusion). Wait-free.
    pub fn poll<T: RtValue>(&self, id: StreamingInputId) -> Option<T> {
        let mut ptr: *const u8 = core::ptr::null();
        let mut len: usize = 0;
        // SAFETY: host table contract; the returned pointer is valid
        // until the next poll of the same input.
        let fresh = unsafe { (self.raw.poll_input)(self.raw.host, id.0, &mut ptr, &mut len) };
        if !fresh || ptr.is_null() {
            return None;
        }
        // SAFETY: host guarantees ptr/len describe the committed value.
        let bytes = unsafe { core::slice::from_raw_parts(ptr, len) };
        T::read_bytes(bytes)
    }

    /// Write the streaming output value. Bounded copy, size-checked by
    /// the host against the registered value size. Wait-free.
    pub fn write_output<T: RtValue>(
        &self,
        id: StreamingOutputId,
        value: &T,
    ) -> Result<(), StatusError> {
        let bytes = value.as_bytes();
        // SAFETY: host table contract; bytes borrowed for the call.
        let status =
            unsafe { (self.raw.write_output)(self.raw.host, id.0, bytes.as_ptr(), bytes.len()) };
        from_raw(&status)
    }
}

// ─── Factory Handle ─────────────────────────────────────────────────

/// Registration surface passed into [`crate::ActionFactory::create`].
/// Valid only for the duration of that call.
pub struct FactoryHandle<'a> {
    raw: &'a RawFactoryContext,
}

impl<'a> FactoryHandle<'a> {
    /// Wrap a raw factory context received through the dispatch table.
    ///
    /// # Safety
    /// `raw` and its host pointer must stay valid for `'a`.
    pub unsafe fn new(raw: &'a RawFactoryContext) -> Self {
        Self { raw }
    }

    /// Resolve a declared slot by name, checking the required
    /// capabilities.
    ///
    /// # Errors
    /// `NotFound` if the slot is absent, `FailedPrecondition` if the
    /// underlying part lacks a required capability.
    pub fn resolve_slot(
        &self,
        name: &str,
        capabilities: SlotCapabilities,
    ) -> Result<RealtimeSlotId, StatusError> {
        let mut id = 0u32;
        // SAFETY: host table contract; name borrowed for the call.
        let status = unsafe {
            (self.raw.resolve_slot)(
                self.raw.host,
                name.as_ptr(),
                name.len(),
                capabilities.bits(),
                &mut id,
            )
        };
        from_raw(&status)?;
        Ok(RealtimeSlotId(id))
    }

    /// Register the parser for the declared streaming input `name`.
    /// The parser runs only on non-real-time threads; it receives the
    /// full serialized message envelope and produces the Action's
    /// real-time value.
    pub fn register_input_parser<T, P>(
        &self,
        name: &str,
        parser: P,
    ) -> Result<StreamingInputId, StatusError>
    where
        T: RtValue,
        P: Fn(&[u8]) -> Result<T, StatusError> + Send + Sync + 'static,
    {
        let user_data = Box::into_raw(Box::new(parser)) as *mut c_void;
        let mut id = 0u32;
        // SAFETY: host table contract. On error the host does not
        // retain user_data, so it is released here.
        let status = unsafe {
            (self.raw.register_input_parser)(
                self.raw.host,
                name.as_ptr(),
                name.len(),
                T::SIZE,
                crate::bridge::parser_shim::<T, P>,
                user_data,
                Some(crate::bridge::user_data_drop_shim::<P>),
                &mut id,
            )
        };
        if let Err(e) = from_raw(&status) {
            // SAFETY: registration failed; the box is still ours.
            drop(unsafe { Box::from_raw(user_data as *mut P) });
            return Err(e);
        }
        Ok(StreamingInputId(id))
    }

    /// Register the converter for the declared streaming output. The
    /// converter runs only on non-real-time threads, on client request.
    ///
    /// # Errors
    /// `AlreadyExists` if a converter was already registered.
    pub fn register_output_converter<T, C>(
        &self,
        converter: C,
    ) -> Result<StreamingOutputId, StatusError>
    where
        T: RtValue,
        C: Fn(&T) -> Result<Vec<u8>, StatusError> + Send + Sync + 'static,
    {
        let user_data = Box::into_raw(Box::new(converter)) as *mut c_void;
        let mut id = 0u32;
        // SAFETY: host table contract; see register_input_parser.
        let status = unsafe {
            (self.raw.register_output_converter)(
                self.raw.host,
                T::SIZE,
                crate::bridge::converter_shim::<T, C>,
                user_data,
                Some(crate::bridge::user_data_drop_shim::<C>),
                &mut id,
            )
        };
        if let Err(e) = from_raw(&status) {
            // SAFETY: registration failed; the box is still ours.
            drop(unsafe { Box::from_raw(user_data as *mut C) });
            return Err(e);
        }
        Ok(StreamingOutputId(id))
    }
}
