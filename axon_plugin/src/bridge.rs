//! Shims between the safe [`Action`]/[`ActionFactory`] traits and the
//! raw dispatch table.
//!
//! Every shim catches panics and converts them to an `Internal` status:
//! unwinding across an `extern "C"` boundary would abort the host
//! process. The shims are monomorphized per factory type, so the
//! dispatch table carries direct calls with no dynamic dispatch on the
//! plugin side.

use core::ffi::c_void;
use core::marker::PhantomData;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use axon_abi::{
    ABI_VERSION, ActionTypeDescriptor, ActionVTable, RawFactoryContext, RawSlotMap,
    RawStateVariable, RawStatus, RawStreamingIo, RegisterActionFn,
};
use axon_common::error::StatusError;
use axon_common::signature::AnyMessage;
use axon_common::status::{result_to_raw, to_raw};

use crate::value::RtValue;
use crate::views::{FactoryHandle, SlotMapView, StreamingIoView};
use crate::{Action, ActionFactory};

// ─── Panic Containment ──────────────────────────────────────────────

fn panic_status(payload: Box<dyn Any + Send>) -> RawStatus {
    let msg = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("no message");
    to_raw(&StatusError::Internal(format!("plugin panicked: {msg}")))
}

/// Run `f` with panics converted to an `Internal` wire status.
fn contained(f: impl FnOnce() -> Result<(), StatusError>) -> RawStatus {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result_to_raw(result),
        Err(payload) => panic_status(payload),
    }
}

// ─── Registration ───────────────────────────────────────────────────

/// Register one factory with the host. Called by the entry point
/// emitted by [`crate::export_plugin!`].
///
/// # Safety
/// `registrar` and `register` must be the arguments the host passed to
/// the plugin entry point, unmodified.
pub unsafe fn register_factory<F: ActionFactory>(
    registrar: *mut c_void,
    register: RegisterActionFn,
) -> RawStatus {
    let build = || -> Result<(String, Vec<u8>), StatusError> {
        let signature = F::signature()?;
        let packed = signature.pack()?;
        Ok((signature.name, packed))
    };
    let (name, packed) = match catch_unwind(AssertUnwindSafe(build)) {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => return to_raw(&e),
        Err(payload) => return panic_status(payload),
    };

    // The host copies the descriptor and the table during the call;
    // only the function pointers must outlive it, and those live in the
    // plugin image's text section.
    let vtable = ActionBridge::<F>::vtable();
    let desc = ActionTypeDescriptor {
        abi_version: ABI_VERSION,
        type_name_ptr: name.as_ptr(),
        type_name_len: name.len(),
        signature_ptr: packed.as_ptr(),
        signature_len: packed.len(),
        vtable: &vtable,
    };
    // SAFETY: descriptor and everything it points at are valid for the
    // duration of this call.
    unsafe { register(registrar, &desc) }
}

// ─── Dispatch Table Bridge ──────────────────────────────────────────

/// Monomorphized dispatch-table implementation for one factory type.
pub struct ActionBridge<F: ActionFactory> {
    _factory: PhantomData<F>,
}

impl<F: ActionFactory> ActionBridge<F> {
    /// The dispatch table for `F`, built from the shims below.
    pub fn vtable() -> ActionVTable {
        ActionVTable {
            create: Self::create,
            destroy: Self::destroy,
            on_enter: Self::on_enter,
            sense: Self::sense,
            control: Self::control,
            get_state_variable: Self::get_state_variable,
        }
    }

    unsafe extern "C" fn create(
        params_ptr: *const u8,
        params_len: usize,
        ctx: *const RawFactoryContext,
        out_state: *mut *mut c_void,
    ) -> RawStatus {
        contained(|| {
            // SAFETY: host passes a valid byte range and context table,
            // both borrowed for this call.
            let (params_bytes, ctx) =
                unsafe { (slice_or_empty(params_ptr, params_len), &*ctx) };
            let params = AnyMessage::unpack(params_bytes)?;
            // SAFETY: ctx is valid for the duration of this call.
            let handle = unsafe { FactoryHandle::new(ctx) };
            let action = F::create(&params, &handle)?;
            // SAFETY: out_state is a valid out-parameter.
            unsafe { *out_state = Box::into_raw(Box::new(action)) as *mut c_void };
            Ok(())
        })
    }

    unsafe extern "C" fn destroy(state: *mut c_void) {
        // A panic in the Action's Drop must not unwind into the host;
        // the instance leaks instead.
        let _ = catch_unwind(AssertUnwindSafe(|| {
            // SAFETY: state came from Box::into_raw in `create` and the
            // host releases it exactly once.
            drop(unsafe { Box::from_raw(state as *mut F::Action) });
        }));
    }

    unsafe extern "C" fn on_enter(state: *mut c_void, slots: *const RawSlotMap) -> RawStatus {
        contained(|| {
            // SAFETY: host owns the state pointer and guarantees
            // exclusive access during dispatch; slots is valid for this
            // call.
            let (action, slots) = unsafe { (&mut *(state as *mut F::Action), &*slots) };
            // SAFETY: slots is valid for this call.
            let view = unsafe { SlotMapView::new(slots) };
            action.on_enter(&view)
        })
    }

    unsafe extern "C" fn sense(
        state: *mut c_void,
        slots: *const RawSlotMap,
        streams: *const RawStreamingIo,
    ) -> RawStatus {
        contained(|| {
            // SAFETY: as in `on_enter`; streams is valid for this call.
            let (action, slots, streams) =
                unsafe { (&mut *(state as *mut F::Action), &*slots, &*streams) };
            // SAFETY: tables valid for this call.
            let (slot_view, stream_view) =
                unsafe { (SlotMapView::new(slots), StreamingIoView::new(streams)) };
            action.sense(&slot_view, &stream_view)
        })
    }

    unsafe extern "C" fn control(state: *mut c_void, slots: *const RawSlotMap) -> RawStatus {
        contained(|| {
            // SAFETY: as in `on_enter`.
            let (action, slots) = unsafe { (&mut *(state as *mut F::Action), &*slots) };
            // SAFETY: slots is valid for this call.
            let view = unsafe { SlotMapView::new(slots) };
            action.control(&view)
        })
    }

    unsafe extern "C" fn get_state_variable(
        state: *const c_void,
        name_ptr: *const u8,
        name_len: usize,
        out: *mut RawStateVariable,
    ) -> RawStatus {
        contained(|| {
            // SAFETY: host guarantees shared access to state during
            // this call; name is borrowed for the call.
            let (action, name_bytes) =
                unsafe { (&*(state as *const F::Action), slice_or_empty(name_ptr, name_len)) };
            let name = core::str::from_utf8(name_bytes).map_err(|_| {
                StatusError::InvalidArgument("state variable name is not UTF-8".to_string())
            })?;
            let value = action.state_variable(name)?;
            // SAFETY: out is a valid out-parameter.
            unsafe { *out = value.to_raw() };
            Ok(())
        })
    }
}

/// # Safety
/// `ptr` must be valid for `len` reads, or `len` must be zero.
unsafe fn slice_or_empty<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: per the function contract.
        unsafe { core::slice::from_raw_parts(ptr, len) }
    }
}

// ─── Streaming Callback Shims ───────────────────────────────────────

/// Parser shim registered by [`FactoryHandle::register_input_parser`].
/// Runs the boxed closure behind `user_data` and copies the produced
/// value image into the mailbox slot the host passed.
pub(crate) unsafe extern "C" fn parser_shim<T, P>(
    user_data: *mut c_void,
    msg_ptr: *const u8,
    msg_len: usize,
    out_ptr: *mut u8,
    out_cap: usize,
    out_len: *mut usize,
) -> RawStatus
where
    T: RtValue,
    P: Fn(&[u8]) -> Result<T, StatusError> + Send + Sync + 'static,
{
    contained(|| {
        // SAFETY: user_data is the box registered with this shim; msg
        // is borrowed for the call.
        let (parser, msg) =
            unsafe { (&*(user_data as *const P), slice_or_empty(msg_ptr, msg_len)) };
        let value = parser(msg)?;
        if T::SIZE > out_cap {
            return Err(StatusError::Internal(format!(
                "mailbox slot too small: {} > {out_cap}",
                T::SIZE
            )));
        }
        // SAFETY: out_ptr has out_cap writable bytes; size checked.
        unsafe {
            core::ptr::copy_nonoverlapping(value.as_bytes().as_ptr(), out_ptr, T::SIZE);
            *out_len = T::SIZE;
        }
        Ok(())
    })
}

/// Converter shim registered by
/// [`FactoryHandle::register_output_converter`]. Decodes the committed
/// value image and hands the serialized bytes back through `emit`.
pub(crate) unsafe extern "C" fn converter_shim<T, C>(
    user_data: *mut c_void,
    value_ptr: *const u8,
    value_len: usize,
    emit: axon_abi::StreamingEmitFn,
    emit_ctx: *mut c_void,
) -> RawStatus
where
    T: RtValue,
    C: Fn(&T) -> Result<Vec<u8>, StatusError> + Send + Sync + 'static,
{
    contained(|| {
        // SAFETY: user_data is the box registered with this shim; the
        // value image is borrowed for the call.
        let (converter, bytes) =
            unsafe { (&*(user_data as *const C), slice_or_empty(value_ptr, value_len)) };
        let value = T::read_bytes(bytes).ok_or_else(|| {
            StatusError::Internal(format!(
                "committed value image is {} bytes, expected {}",
                bytes.len(),
                T::SIZE
            ))
        })?;
        let serialized = converter(&value)?;
        // SAFETY: emit/emit_ctx come from the host, valid for this call.
        unsafe { emit(emit_ctx, serialized.as_ptr(), serialized.len()) };
        Ok(())
    })
}

/// Drop shim releasing the boxed parser/converter closure.
pub(crate) unsafe extern "C" fn user_data_drop_shim<P>(user_data: *mut c_void) {
    let _ = catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: user_data came from Box::into_raw at registration and
        // the host releases it exactly once.
        drop(unsafe { Box::from_raw(user_data as *mut P) });
    }));
}
