//! AXON Plugin ABI
//!
//! The only contract between the AXON host and independently compiled,
//! dynamically loaded Action plugins. Everything in this crate is plain
//! data: `#[repr(C)]` structs of function pointers, opaque handles, and
//! the fixed-capacity wire status. No trait objects, no generics, no
//! unwinding may cross this boundary.
//!
//! # Module Structure
//!
//! - [`status`] - Fixed-capacity, allocation-free wire status
//! - [`dispatch`] - Dispatch tables and helper tables passed into plugins
//! - [`entry`] - Plugin entry point and Action type registration
//!
//! # Ownership rules
//!
//! Every pointer crossing the boundary is either borrowed for the
//! duration of a single call, or explicitly transferred: a state pointer
//! returned by `create` is owned by the host and must be released with
//! the matching `destroy` from the same dispatch table.

pub mod dispatch;
pub mod entry;
pub mod status;

pub use dispatch::{
    ActionVTable, RawFactoryContext, RawJointCommand, RawJointState, RawSlotMap,
    RawStateVariable, RawStateVariableValue, RawStreamingIo, StreamingConverterFn,
    StreamingEmitFn, StreamingParserFn, UserDataDropFn, MAX_JOINTS_PER_SLOT, STATE_VAR_BOOL,
    STATE_VAR_DOUBLE, STATE_VAR_INT64, STATE_VAR_NONE,
};
pub use entry::{ActionTypeDescriptor, PluginEntryFn, RegisterActionFn, PLUGIN_ENTRY_SYMBOL};
pub use status::{RawStatus, STATUS_MESSAGE_CAPACITY};

/// Current ABI version. Incremented on any breaking change to the
/// structs or function signatures in this crate. Registration of a
/// plugin built against a different version is rejected.
pub const ABI_VERSION: u32 = 1;
