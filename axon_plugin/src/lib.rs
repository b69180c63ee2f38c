//! AXON Plugin Helper
//!
//! Safe Rust surface for Action plugin authors. Implement [`Action`] and
//! [`ActionFactory`], then emit the fixed-name entry point with
//! [`export_plugin!`] — the bridge in this crate wraps the
//! implementation into the raw dispatch table, so plugin code never
//! hand-writes `unsafe extern "C"`.
//!
//! Panics are caught at every boundary shim and surfaced as an
//! `Internal` status: no unwinding ever crosses the ABI.
//!
//! # Real-time contract
//!
//! [`Action::on_enter`], [`Action::sense`] and [`Action::control`] run
//! on the host's real-time cycle thread. They must not block, allocate,
//! or take locks. [`ActionFactory::create`] and the streaming
//! parser/converter closures run on non-real-time threads.

pub mod bridge;
pub mod value;
pub mod views;

// Re-exported for the `export_plugin!` macro and for plugins that need
// raw access.
pub use axon_abi as abi;

use axon_common::error::StatusError;
use axon_common::signature::{ActionSignature, AnyMessage, StateVariableValue};

use crate::views::{FactoryHandle, SlotMapView, StreamingIoView};

/// A pluggable control algorithm instance, invoked once per real-time
/// cycle by the host.
pub trait Action: Send + 'static {
    /// Called exactly once each time the Action is (re)activated,
    /// strictly before that cycle's `sense`. Must reset all
    /// since-activation state.
    fn on_enter(&mut self, slots: &SlotMapView<'_>) -> Result<(), StatusError>;

    /// Called once per active cycle, before `control`. Reads hardware
    /// state, polls streaming inputs, updates the state-variable
    /// snapshot, may write the streaming output.
    fn sense(
        &mut self,
        slots: &SlotMapView<'_>,
        streams: &StreamingIoView<'_>,
    ) -> Result<(), StatusError>;

    /// Called once per active cycle, after `sense`. Must not mutate
    /// externally observable state variables.
    fn control(&mut self, slots: &SlotMapView<'_>) -> Result<(), StatusError>;

    /// Read a state variable computed by the last `sense`.
    ///
    /// # Errors
    /// `NotFound` for an unknown name, `Unavailable` if not yet
    /// computed.
    fn state_variable(&self, name: &str) -> Result<StateVariableValue, StatusError>;
}

/// Factory for one Action type: its signature and its non-real-time
/// constructor.
pub trait ActionFactory: 'static {
    type Action: Action;

    /// The signature declared to the host at registration.
    fn signature() -> Result<ActionSignature, StatusError>;

    /// Create an Action instance. `params` is the already-unpacked
    /// fixed parameter envelope (its type name was validated by the
    /// host against the signature); `ctx` is the registration surface
    /// for slots and streams.
    fn create(params: &AnyMessage, ctx: &FactoryHandle<'_>) -> Result<Self::Action, StatusError>;
}

/// Emit the fixed-name plugin entry point for one or more Action
/// factories. Used once per plugin image, in cdylib builds:
///
/// ```ignore
/// axon_plugin::export_plugin!(HoldPositionFactory, AdmittanceFactory);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($($factory:ty),+ $(,)?) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn axon_plugin_entry(
            registrar: *mut core::ffi::c_void,
            register: $crate::abi::RegisterActionFn,
        ) -> $crate::abi::RawStatus {
            $(
                let status = unsafe {
                    $crate::bridge::register_factory::<$factory>(registrar, register)
                };
                if !status.is_ok() {
                    return status;
                }
            )+
            $crate::abi::RawStatus::ok()
        }
    };
}
