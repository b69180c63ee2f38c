//! Action type registry.
//!
//! One registry per server process. It is populated either by loading
//! plugin images ([`ActionTypeRegistry::load_image`]) or directly from
//! an in-process entry point (host built-ins and tests). Registration
//! validates the ABI version and the signature before anything is
//! kept; the dispatch table is copied out of the descriptor, and
//! dynamically loaded types hold their image alive through an `Arc`.

use core::ffi::c_void;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use axon_abi::{
    ABI_VERSION, ActionTypeDescriptor, ActionVTable, PluginEntryFn, RawStatus,
};
use axon_common::error::StatusError;
use axon_common::signature::ActionSignature;
use axon_common::status::{from_raw, result_to_raw, to_raw};

use crate::loader::{LoaderError, PluginImage};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Status(#[from] StatusError),
}

/// One registered Action type: its validated signature, the copied
/// dispatch table, and (for dynamically loaded types) the image the
/// table's function pointers live in.
pub struct ActionType {
    signature: ActionSignature,
    vtable: ActionVTable,
    image: Option<Arc<PluginImage>>,
}

impl ActionType {
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn signature(&self) -> &ActionSignature {
        &self.signature
    }

    pub(crate) fn vtable(&self) -> ActionVTable {
        self.vtable
    }

    pub(crate) fn image(&self) -> Option<Arc<PluginImage>> {
        self.image.clone()
    }
}

/// Process-wide registry of Action types, keyed by type name.
#[derive(Default)]
pub struct ActionTypeRegistry {
    types: Vec<ActionType>,
}

impl ActionTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ActionType> {
        self.types.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.iter().map(|t| t.name())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Load a plugin image and register every Action type it offers.
    /// Returns the number of types registered.
    ///
    /// # Safety
    /// Loading a shared library runs arbitrary code; only trusted
    /// plugin images may be loaded.
    pub unsafe fn load_image(&mut self, path: &Path) -> Result<usize, RegistryError> {
        // SAFETY: per the function contract.
        let image = Arc::new(unsafe { PluginImage::load(path)? });
        let entry = image.entry()?;
        let count = self.run_entry(entry, Some(image))?;
        info!(path = %path.display(), count, "plugin image registered");
        Ok(count)
    }

    /// Register the Action types of an in-process entry point (host
    /// built-ins, statically linked plugins, tests).
    pub fn register_entry(&mut self, entry: PluginEntryFn) -> Result<usize, StatusError> {
        self.run_entry(entry, None)
    }

    fn run_entry(
        &mut self,
        entry: PluginEntryFn,
        image: Option<Arc<PluginImage>>,
    ) -> Result<usize, StatusError> {
        let mut ctx = RegistrarCtx {
            registry: self,
            image,
            registered: 0,
        };
        // SAFETY: ctx lives across the call; register_action is the
        // matching trampoline for RegistrarCtx.
        let status = unsafe { entry(&mut ctx as *mut RegistrarCtx as *mut c_void, register_action) };
        let registered = ctx.registered;
        from_raw(&status)?;
        Ok(registered)
    }

    fn register_type(
        &mut self,
        signature: ActionSignature,
        vtable: ActionVTable,
        image: Option<Arc<PluginImage>>,
    ) -> Result<(), StatusError> {
        if self.get(&signature.name).is_some() {
            return Err(StatusError::AlreadyExists(format!(
                "action type '{}'",
                signature.name
            )));
        }
        info!(action_type = %signature.name, "action type registered");
        self.types.push(ActionType {
            signature,
            vtable,
            image,
        });
        Ok(())
    }
}

// ─── Registration Trampoline ────────────────────────────────────────

struct RegistrarCtx<'a> {
    registry: &'a mut ActionTypeRegistry,
    image: Option<Arc<PluginImage>>,
    registered: usize,
}

impl RegistrarCtx<'_> {
    fn register(&mut self, desc: &ActionTypeDescriptor) -> Result<(), StatusError> {
        if desc.abi_version != ABI_VERSION {
            return Err(StatusError::InvalidArgument(format!(
                "plugin ABI version {} does not match host version {ABI_VERSION}",
                desc.abi_version
            )));
        }
        if desc.type_name_ptr.is_null() || desc.signature_ptr.is_null() || desc.vtable.is_null() {
            return Err(StatusError::InvalidArgument(
                "action type descriptor has null fields".to_string(),
            ));
        }
        // SAFETY: pointers checked non-null; the descriptor contract
        // guarantees the ranges are valid for the registration call.
        let (name_bytes, signature_bytes, vtable) = unsafe {
            (
                core::slice::from_raw_parts(desc.type_name_ptr, desc.type_name_len),
                core::slice::from_raw_parts(desc.signature_ptr, desc.signature_len),
                *desc.vtable,
            )
        };
        let name = core::str::from_utf8(name_bytes).map_err(|_| {
            StatusError::InvalidArgument("action type name is not UTF-8".to_string())
        })?;
        let signature = ActionSignature::unpack(signature_bytes)?;
        if signature.name != name {
            return Err(StatusError::InvalidArgument(format!(
                "declared type name '{name}' does not match signature name '{}'",
                signature.name
            )));
        }
        self.registry
            .register_type(signature, vtable, self.image.clone())?;
        self.registered += 1;
        Ok(())
    }
}

unsafe extern "C" fn register_action(
    registrar: *mut c_void,
    desc: *const ActionTypeDescriptor,
) -> RawStatus {
    if registrar.is_null() || desc.is_null() {
        return to_raw(&StatusError::InvalidArgument(
            "null registration arguments".to_string(),
        ));
    }
    // A host-side panic must not unwind into the plugin entry point.
    match catch_unwind(AssertUnwindSafe(|| {
        // SAFETY: registrar is the RegistrarCtx run_entry passed to the
        // entry point; desc is borrowed for this call.
        let (ctx, desc) = unsafe { (&mut *(registrar as *mut RegistrarCtx), &*desc) };
        ctx.register(desc)
    })) {
        Ok(result) => result_to_raw(result),
        Err(_) => to_raw(&StatusError::Internal(
            "panic during action type registration".to_string(),
        )),
    }
}
