//! Action creation: the host side of `create`.
//!
//! Creation runs on a non-real-time thread. The host validates the
//! parameter envelope and the declared slots, drives the plugin's
//! `create` with a registration surface over trampolines into
//! [`FactoryContext`], and afterwards verifies that every stream the
//! signature declares actually got its parser or converter registered.
//! Only then do the mailbox halves split into the non-RT exchange and
//! the RT endpoints of the new [`ActionInstance`].

use core::ffi::c_void;

use tracing::info;

use axon_abi::{
    RawFactoryContext, RawStatus, StreamingConverterFn, StreamingParserFn, UserDataDropFn,
};
use axon_common::consts::MAX_STREAMING_PAYLOAD;
use axon_common::error::StatusError;
use axon_common::signature::{ActionSignature, AnyMessage};
use axon_common::status::{from_raw, result_to_raw};

use crate::instance::ActionInstance;
use crate::mailbox::{self, Reader, Writer};
use crate::registry::ActionType;
use crate::slot::SlotRegistry;
use crate::streaming::{CallbackGuard, InputFeed, OutputPort, RtStreams, StreamingExchange};

// ─── Pending Registrations ──────────────────────────────────────────

struct PendingInput {
    name: String,
    message_type: String,
    parser: StreamingParserFn,
    guard: CallbackGuard,
    writer: Writer,
    reader: Reader,
}

struct PendingOutput {
    message_type: String,
    value_size: usize,
    converter: StreamingConverterFn,
    guard: CallbackGuard,
    writer: Writer,
    reader: Reader,
}

// ─── Factory Context ────────────────────────────────────────────────

/// Host state behind the raw registration surface, valid only for one
/// `create` call.
struct FactoryContext<'a> {
    slots: &'a SlotRegistry,
    signature: &'a ActionSignature,
    inputs: Vec<PendingInput>,
    output: Option<PendingOutput>,
}

impl FactoryContext<'_> {
    fn raw_table(&mut self) -> RawFactoryContext {
        RawFactoryContext {
            host: self as *mut Self as *mut c_void,
            resolve_slot,
            register_input_parser,
            register_output_converter,
        }
    }

    fn resolve_slot(&self, name: &str, required_caps: u32) -> Result<u32, StatusError> {
        if self.signature.slot(name).is_none() {
            return Err(StatusError::NotFound(format!(
                "slot '{name}' is not declared in the signature of '{}'",
                self.signature.name
            )));
        }
        let required = axon_common::signature::SlotCapabilities::from_bits_truncate(required_caps);
        let id = self.slots.resolve(name, required)?;
        Ok(id.0)
    }

    fn check_value_size(&self, value_size: usize) -> Result<(), StatusError> {
        if value_size == 0 || value_size > MAX_STREAMING_PAYLOAD {
            return Err(StatusError::InvalidArgument(format!(
                "streaming value size {value_size} outside 1..={MAX_STREAMING_PAYLOAD}"
            )));
        }
        Ok(())
    }

    fn register_parser(
        &mut self,
        name: &str,
        value_size: usize,
        parser: StreamingParserFn,
        user_data: *mut c_void,
        user_data_drop: UserDataDropFn,
    ) -> Result<u32, StatusError> {
        let decl = self.signature.streaming_input(name).ok_or_else(|| {
            StatusError::NotFound(format!(
                "streaming input '{name}' is not declared in the signature of '{}'",
                self.signature.name
            ))
        })?;
        if self.inputs.iter().any(|p| p.name == name) {
            return Err(StatusError::AlreadyExists(format!(
                "parser for streaming input '{name}'"
            )));
        }
        self.check_value_size(value_size)?;

        // Past this point the registration is kept, so the host takes
        // ownership of user_data.
        let (writer, reader) = mailbox::channel(value_size);
        self.inputs.push(PendingInput {
            name: name.to_string(),
            message_type: decl.message_type.clone(),
            parser,
            guard: CallbackGuard::new(user_data, user_data_drop),
            writer,
            reader,
        });
        Ok((self.inputs.len() - 1) as u32)
    }

    fn register_converter(
        &mut self,
        value_size: usize,
        converter: StreamingConverterFn,
        user_data: *mut c_void,
        user_data_drop: UserDataDropFn,
    ) -> Result<u32, StatusError> {
        let decl = self.signature.streaming_output.as_ref().ok_or_else(|| {
            StatusError::NotFound(format!(
                "signature of '{}' declares no streaming output",
                self.signature.name
            ))
        })?;
        if self.output.is_some() {
            return Err(StatusError::AlreadyExists(
                "streaming output converter".to_string(),
            ));
        }
        self.check_value_size(value_size)?;

        let (writer, reader) = mailbox::channel(value_size);
        self.output = Some(PendingOutput {
            message_type: decl.message_type.clone(),
            value_size,
            converter,
            guard: CallbackGuard::new(user_data, user_data_drop),
            writer,
            reader,
        });
        Ok(0)
    }
}

// ─── ABI Trampolines ────────────────────────────────────────────────
//
// The host pointer is the FactoryContext the table was built from,
// exclusive for the duration of the create call.

unsafe fn str_arg<'a>(ptr: *const u8, len: usize) -> Result<&'a str, StatusError> {
    if ptr.is_null() {
        return Err(StatusError::InvalidArgument("null name pointer".to_string()));
    }
    // SAFETY: per the table contract the range is valid for the call.
    core::str::from_utf8(unsafe { core::slice::from_raw_parts(ptr, len) })
        .map_err(|_| StatusError::InvalidArgument("name is not UTF-8".to_string()))
}

unsafe extern "C" fn resolve_slot(
    host: *mut c_void,
    name_ptr: *const u8,
    name_len: usize,
    required_caps: u32,
    out_id: *mut u32,
) -> RawStatus {
    // SAFETY: per the table contract.
    let ctx = unsafe { &*(host as *const FactoryContext) };
    result_to_raw((|| {
        // SAFETY: name range valid for the call.
        let name = unsafe { str_arg(name_ptr, name_len) }?;
        let id = ctx.resolve_slot(name, required_caps)?;
        // SAFETY: out_id is a valid out-parameter.
        unsafe { *out_id = id };
        Ok(())
    })())
}

unsafe extern "C" fn register_input_parser(
    host: *mut c_void,
    name_ptr: *const u8,
    name_len: usize,
    value_size: usize,
    parser: StreamingParserFn,
    user_data: *mut c_void,
    user_data_drop: UserDataDropFn,
    out_id: *mut u32,
) -> RawStatus {
    // SAFETY: per the table contract.
    let ctx = unsafe { &mut *(host as *mut FactoryContext) };
    result_to_raw((|| {
        // SAFETY: name range valid for the call.
        let name = unsafe { str_arg(name_ptr, name_len) }?;
        let id = ctx.register_parser(name, value_size, parser, user_data, user_data_drop)?;
        // SAFETY: out_id is a valid out-parameter.
        unsafe { *out_id = id };
        Ok(())
    })())
}

unsafe extern "C" fn register_output_converter(
    host: *mut c_void,
    value_size: usize,
    converter: StreamingConverterFn,
    user_data: *mut c_void,
    user_data_drop: UserDataDropFn,
    out_id: *mut u32,
) -> RawStatus {
    // SAFETY: per the table contract.
    let ctx = unsafe { &mut *(host as *mut FactoryContext) };
    result_to_raw((|| {
        let id = ctx.register_converter(value_size, converter, user_data, user_data_drop)?;
        // SAFETY: out_id is a valid out-parameter.
        unsafe { *out_id = id };
        Ok(())
    })())
}

// ─── Creation Flow ──────────────────────────────────────────────────

/// Create an instance of a registered Action type.
///
/// # Errors
/// `InvalidArgument` for a malformed or type-mismatched parameter
/// envelope, `NotFound`/`FailedPrecondition` for unsatisfiable slot
/// requirements, `FailedPrecondition` if the plugin leaves a declared
/// stream unregistered, plus anything the plugin's own `create`
/// returns.
pub(crate) fn instantiate(
    ty: &ActionType,
    params: &[u8],
    slots: &SlotRegistry,
) -> Result<(ActionInstance, StreamingExchange), StatusError> {
    let signature = ty.signature();

    // Validate the parameter envelope before any plugin code runs.
    let envelope = AnyMessage::unpack(params)?;
    if envelope.type_name != signature.parameter_type {
        return Err(StatusError::InvalidArgument(format!(
            "'{}' expects parameters of type '{}', got '{}'",
            signature.name, signature.parameter_type, envelope.type_name
        )));
    }

    // All declared slots must be satisfiable, whether or not the plugin
    // resolves them during create.
    for slot in &signature.slots {
        slots.resolve(&slot.name, slot.capabilities)?;
    }

    let mut ctx = FactoryContext {
        slots,
        signature,
        inputs: Vec::new(),
        output: None,
    };
    let table = ctx.raw_table();
    let vtable = ty.vtable();
    let mut state: *mut c_void = core::ptr::null_mut();
    // SAFETY: params and table are valid for this call; the plugin
    // bridge contains panics.
    let status = unsafe { (vtable.create)(params.as_ptr(), params.len(), &table, &mut state) };
    from_raw(&status)?;
    if state.is_null() {
        return Err(StatusError::Internal(format!(
            "'{}' reported success but returned no instance",
            signature.name
        )));
    }

    // Registration completeness: a declared stream without its
    // parser/converter would silently never flow.
    if let Err(e) = check_completeness(signature, &ctx) {
        // SAFETY: state came from this vtable's create; released here
        // exactly once, before the pending registrations drop.
        unsafe { (vtable.destroy)(state) };
        return Err(e);
    }

    let mut feeds = Vec::with_capacity(ctx.inputs.len());
    let mut rt_readers = Vec::with_capacity(ctx.inputs.len());
    for pending in ctx.inputs {
        feeds.push(InputFeed::new(
            pending.name,
            pending.message_type,
            pending.parser,
            pending.guard,
            pending.writer,
        ));
        rt_readers.push(pending.reader);
    }
    let (output_port, rt_writer) = match ctx.output {
        Some(pending) => (
            Some(OutputPort::new(
                pending.message_type,
                pending.converter,
                pending.guard,
                pending.reader,
            )),
            Some((pending.writer, pending.value_size)),
        ),
        None => (None, None),
    };

    info!(
        action_type = %signature.name,
        inputs = feeds.len(),
        has_output = output_port.is_some(),
        "action instance created"
    );

    let instance = ActionInstance::new(
        signature.name.clone(),
        vtable,
        state,
        RtStreams::new(rt_readers, rt_writer),
        ty.image(),
    );
    Ok((instance, StreamingExchange::new(feeds, output_port)))
}

fn check_completeness(
    signature: &ActionSignature,
    ctx: &FactoryContext<'_>,
) -> Result<(), StatusError> {
    for decl in &signature.streaming_inputs {
        if !ctx.inputs.iter().any(|p| p.name == decl.name) {
            return Err(StatusError::FailedPrecondition(format!(
                "streaming input '{}' declared by '{}' has no registered parser",
                decl.name, signature.name
            )));
        }
    }
    if signature.streaming_output.is_some() && ctx.output.is_none() {
        return Err(StatusError::FailedPrecondition(format!(
            "streaming output declared by '{}' has no registered converter",
            signature.name
        )));
    }
    Ok(())
}
