//! Host-side owning guard over one created Action.
//!
//! An [`ActionInstance`] owns the opaque plugin state pointer, the
//! copied dispatch table and the RT halves of the instance's streaming
//! mailboxes. It enforces the lifecycle ordering
//! `Created → Entered → {Sensed → Controlled}*` before every dispatch
//! and releases the plugin state exactly once on drop.

use core::ffi::c_void;
use std::sync::Arc;

use axon_abi::{ActionVTable, RawStateVariable};
use axon_common::error::StatusError;
use axon_common::signature::StateVariableValue;
use axon_common::status::from_raw;

use crate::loader::PluginImage;
use crate::slot::RealtimeSlotMap;
use crate::streaming::RtStreams;

/// Where the instance stands in its lifecycle. Tracked by the host as
/// a guard against out-of-order dispatch, which would be a host bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Created, never activated.
    Created,
    /// `on_enter` ran; this cycle's `sense` is still due.
    Entered,
    /// `sense` ran; `control` is due.
    Sensed,
    /// `control` ran; the next cycle's `sense` (or a re-activation's
    /// `on_enter`) may follow.
    Controlled,
}

/// Owning guard over `(vtable, state)` plus the instance's RT stream
/// endpoints. Never copied across the ABI after creation.
pub struct ActionInstance {
    type_name: String,
    vtable: ActionVTable,
    state: *mut c_void,
    phase: LifecyclePhase,
    streams: RtStreams,
    /// Keeps the plugin image mapped while its function pointers are
    /// reachable through `vtable`.
    _image: Option<Arc<PluginImage>>,
}

// SAFETY: the plugin state is Send per the plugin-side Action contract;
// the host moves the instance to the cycle thread and dispatches from
// exactly one thread at a time.
unsafe impl Send for ActionInstance {}

impl ActionInstance {
    pub(crate) fn new(
        type_name: String,
        vtable: ActionVTable,
        state: *mut c_void,
        streams: RtStreams,
        image: Option<Arc<PluginImage>>,
    ) -> Self {
        Self {
            type_name,
            vtable,
            state,
            phase: LifecyclePhase::Created,
            streams,
            _image: image,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn phase(&self) -> LifecyclePhase {
        self.phase
    }

    fn ordering_error(&self, call: &str) -> StatusError {
        StatusError::FailedPrecondition(format!(
            "{call} on '{}' in phase {:?}",
            self.type_name, self.phase
        ))
    }

    /// Dispatch `on_enter`. Valid on first activation and on
    /// re-activation after a completed cycle.
    pub fn enter(&mut self, slots: &mut RealtimeSlotMap<'_>) -> Result<(), StatusError> {
        match self.phase {
            LifecyclePhase::Created | LifecyclePhase::Controlled => {}
            LifecyclePhase::Entered | LifecyclePhase::Sensed => {
                return Err(self.ordering_error("on_enter"));
            }
        }
        let table = slots.raw_table();
        // SAFETY: state and table are valid for this call; the plugin
        // bridge contains any panic.
        from_raw(&unsafe { (self.vtable.on_enter)(self.state, &table) })?;
        self.phase = LifecyclePhase::Entered;
        Ok(())
    }

    /// Dispatch `sense`. Valid after `on_enter` and after every
    /// completed `control`.
    pub fn sense(&mut self, slots: &mut RealtimeSlotMap<'_>) -> Result<(), StatusError> {
        match self.phase {
            LifecyclePhase::Entered | LifecyclePhase::Controlled => {}
            LifecyclePhase::Created | LifecyclePhase::Sensed => {
                return Err(self.ordering_error("sense"));
            }
        }
        let slot_table = slots.raw_table();
        let stream_table = self.streams.raw_table();
        // SAFETY: state and both tables are valid for this call.
        from_raw(&unsafe { (self.vtable.sense)(self.state, &slot_table, &stream_table) })?;
        self.phase = LifecyclePhase::Sensed;
        Ok(())
    }

    /// Dispatch `control`. Valid only directly after `sense`.
    pub fn control(&mut self, slots: &mut RealtimeSlotMap<'_>) -> Result<(), StatusError> {
        if self.phase != LifecyclePhase::Sensed {
            return Err(self.ordering_error("control"));
        }
        let table = slots.raw_table();
        // SAFETY: state and table are valid for this call.
        from_raw(&unsafe { (self.vtable.control)(self.state, &table) })?;
        self.phase = LifecyclePhase::Controlled;
        Ok(())
    }

    /// Read a state variable snapshot. Callable in any phase; the
    /// plugin reports `Unavailable` before its first `sense`.
    pub fn state_variable(&self, name: &str) -> Result<StateVariableValue, StatusError> {
        let mut out = RawStateVariable::none();
        // SAFETY: state, name and out are valid for this call.
        from_raw(&unsafe {
            (self.vtable.get_state_variable)(self.state, name.as_ptr(), name.len(), &mut out)
        })?;
        Ok(StateVariableValue::from_raw(&out))
    }
}

impl Drop for ActionInstance {
    fn drop(&mut self) {
        if !self.state.is_null() {
            // SAFETY: state came from this vtable's create and is
            // released exactly once.
            unsafe { (self.vtable.destroy)(self.state) };
            self.state = core::ptr::null_mut();
        }
    }
}
