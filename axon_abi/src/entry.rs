//! Plugin entry point and Action type registration.
//!
//! A plugin image exports exactly one fixed-name symbol,
//! [`PLUGIN_ENTRY_SYMBOL`]. The host calls it once after loading the
//! image, passing an opaque registrar handle and a registration
//! function; the entry point calls the registration function once per
//! Action type it provides. There is no process-wide registry: the
//! registrar is an explicit argument, owned by the host.

use core::ffi::c_void;

use crate::dispatch::ActionVTable;
use crate::status::RawStatus;

/// Describes one Action type offered by a plugin.
///
/// All pointers are borrowed for the duration of the registration call;
/// the host copies what it keeps. `signature` is the serialized Action
/// signature, wrapped in the self-describing any-message envelope so the
/// host can validate the declared type name against the payload.
#[repr(C)]
pub struct ActionTypeDescriptor {
    /// ABI version the plugin was built against. Must equal the host's
    /// `ABI_VERSION` or registration fails with `InvalidArgument`.
    pub abi_version: u32,
    /// UTF-8 Action type name.
    pub type_name_ptr: *const u8,
    pub type_name_len: usize,
    /// Serialized, any-wrapped Action signature.
    pub signature_ptr: *const u8,
    pub signature_len: usize,
    /// Dispatch table for this Action type. The host copies the table;
    /// only the function pointers inside must outlive the plugin image.
    pub vtable: *const ActionVTable,
}

/// Registration function provided by the host. Called by the plugin
/// entry point once per Action type. Fails with `AlreadyExists` on a
/// type-name collision and `InvalidArgument` on an ABI version mismatch.
pub type RegisterActionFn =
    unsafe extern "C" fn(registrar: *mut c_void, desc: *const ActionTypeDescriptor) -> RawStatus;

/// The fixed-name entry point every plugin image must export.
pub type PluginEntryFn =
    unsafe extern "C" fn(registrar: *mut c_void, register: RegisterActionFn) -> RawStatus;

/// Symbol name of the plugin entry point, NUL-terminated for symbol
/// lookup.
pub const PLUGIN_ENTRY_SYMBOL: &[u8] = b"axon_plugin_entry\0";
