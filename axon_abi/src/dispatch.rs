//! Dispatch tables and helper tables.
//!
//! The per-Action dispatch table (`ActionVTable`) is implemented by the
//! plugin and driven by the host. The helper tables (`RawFactoryContext`,
//! `RawSlotMap`, `RawStreamingIo`) are implemented by the host and passed
//! into the plugin for the duration of a single call.
//!
//! ## Real-time contract
//!
//! `on_enter`, `sense`, `control` and `get_state_variable` are invoked
//! from the host's real-time cycle thread. They must not block, allocate,
//! take locks, or unwind. `create` and `destroy` run on non-real-time
//! threads, as do the streaming parser/converter callbacks.

use core::ffi::c_void;

use static_assertions::const_assert_eq;

use crate::status::RawStatus;

/// Maximum number of joints a single slot exposes. Fixed so that the
/// per-cycle feature views are flat `#[repr(C)]` arrays with no
/// indirection on the real-time path.
pub const MAX_JOINTS_PER_SLOT: usize = 16;

// ─── State Variables ────────────────────────────────────────────────

/// `RawStateVariable` tag: no value.
pub const STATE_VAR_NONE: u32 = 0;
/// `RawStateVariable` tag: `double_` is valid.
pub const STATE_VAR_DOUBLE: u32 = 1;
/// `RawStateVariable` tag: `bool_` is valid (0 = false, nonzero = true).
pub const STATE_VAR_BOOL: u32 = 2;
/// `RawStateVariable` tag: `int64` is valid.
pub const STATE_VAR_INT64: u32 = 3;

/// Value union of a state variable. The valid field is selected by the
/// tag of the enclosing [`RawStateVariable`].
#[repr(C)]
#[derive(Clone, Copy)]
pub union RawStateVariableValue {
    pub double_: f64,
    /// 0 = false, nonzero = true. `u8` rather than `bool` so that every
    /// bit pattern stays defined across the boundary.
    pub bool_: u8,
    pub int64: i64,
}

/// Tagged state-variable snapshot, written by the plugin through an
/// out-parameter of `get_state_variable`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawStateVariable {
    /// One of `STATE_VAR_NONE` / `_DOUBLE` / `_BOOL` / `_INT64`.
    pub tag: u32,
    pub value: RawStateVariableValue,
}

const_assert_eq!(core::mem::size_of::<RawStateVariable>(), 16);

impl RawStateVariable {
    /// An empty (`STATE_VAR_NONE`) snapshot.
    #[inline]
    pub const fn none() -> Self {
        Self {
            tag: STATE_VAR_NONE,
            value: RawStateVariableValue { int64: 0 },
        }
    }
}

// ─── Slot Feature Views ─────────────────────────────────────────────

/// Joint-space state of one part, read through the slot map.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawJointState {
    /// Measured joint positions [rad or user units].
    pub positions: [f64; MAX_JOINTS_PER_SLOT],
    /// Measured joint velocities [units/s].
    pub velocities: [f64; MAX_JOINTS_PER_SLOT],
    /// Number of valid entries in the arrays above.
    pub joint_count: u32,
    pub _pad: u32,
}

const_assert_eq!(core::mem::size_of::<RawJointState>(), 264);

impl RawJointState {
    /// A zeroed state with no joints.
    pub const fn zeroed() -> Self {
        Self {
            positions: [0.0; MAX_JOINTS_PER_SLOT],
            velocities: [0.0; MAX_JOINTS_PER_SLOT],
            joint_count: 0,
            _pad: 0,
        }
    }
}

/// Joint-space command for one part, written through the slot map.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawJointCommand {
    /// Commanded joint positions [rad or user units].
    pub positions: [f64; MAX_JOINTS_PER_SLOT],
    /// Number of valid entries. Must match the part's joint count.
    pub joint_count: u32,
    pub _pad: u32,
}

const_assert_eq!(core::mem::size_of::<RawJointCommand>(), 136);

impl RawJointCommand {
    /// A zeroed command with no joints.
    pub const fn zeroed() -> Self {
        Self {
            positions: [0.0; MAX_JOINTS_PER_SLOT],
            joint_count: 0,
            _pad: 0,
        }
    }
}

/// Per-cycle borrowed view over the hardware features an Action declared.
///
/// Implemented by the host; valid only for the duration of the call it
/// was passed into. Slot ids are the opaque handles resolved at creation
/// time. All accessors return `false` for an unknown id rather than an
/// error status: an out-of-range id during real-time execution indicates
/// a host bug, not a recoverable Action-level condition.
#[repr(C)]
pub struct RawSlotMap {
    /// Opaque host context. Borrowed for the duration of the call.
    pub host: *mut c_void,
    /// Read the joint state of the part behind `slot_id`.
    /// Returns `false` if the id is unknown or the slot lacks the feature.
    pub read_joint_state:
        unsafe extern "C" fn(host: *mut c_void, slot_id: u32, out: *mut RawJointState) -> bool,
    /// Write a joint command to the part behind `slot_id`.
    pub write_joint_command:
        unsafe extern "C" fn(host: *mut c_void, slot_id: u32, cmd: *const RawJointCommand) -> bool,
    /// Read the digital-input bank of the part behind `slot_id`.
    pub read_digital_inputs:
        unsafe extern "C" fn(host: *mut c_void, slot_id: u32, out: *mut u64) -> bool,
    /// Write the digital-output bank of the part behind `slot_id`.
    pub write_digital_outputs:
        unsafe extern "C" fn(host: *mut c_void, slot_id: u32, bits: u64) -> bool,
}

// ─── Streaming I/O ──────────────────────────────────────────────────

/// Non-real-time parser callback: serialized message bytes in, the
/// Action's fixed-size real-time value image out.
///
/// `out_ptr`/`out_cap` is the mailbox free slot; the parser must write at
/// most `out_cap` bytes and store the written size in `out_len`.
pub type StreamingParserFn = unsafe extern "C" fn(
    user_data: *mut c_void,
    msg_ptr: *const u8,
    msg_len: usize,
    out_ptr: *mut u8,
    out_cap: usize,
    out_len: *mut usize,
) -> RawStatus;

/// Sink invoked by a converter to hand serialized output bytes back to
/// the host. May be called at most once per conversion.
pub type StreamingEmitFn =
    unsafe extern "C" fn(emit_ctx: *mut c_void, bytes_ptr: *const u8, bytes_len: usize);

/// Non-real-time converter callback: the latest committed real-time
/// value image in, serialized message bytes out via `emit`.
pub type StreamingConverterFn = unsafe extern "C" fn(
    user_data: *mut c_void,
    value_ptr: *const u8,
    value_len: usize,
    emit: StreamingEmitFn,
    emit_ctx: *mut c_void,
) -> RawStatus;

/// Release callback for the `user_data` pointer captured by a parser or
/// converter registration. Invoked exactly once when the owning Action
/// instance is destroyed. `None` means there is nothing to release.
pub type UserDataDropFn = Option<unsafe extern "C" fn(user_data: *mut c_void)>;

/// Per-cycle streaming I/O access, passed into `sense`.
///
/// Implemented by the host over the Action instance's mailboxes. Both
/// functions are wait-free and allocation-free.
#[repr(C)]
pub struct RawStreamingIo {
    /// Opaque host context. Borrowed for the duration of the call.
    pub host: *mut c_void,
    /// Poll a streaming input. Returns `true` and points `out_ptr` at the
    /// latest value image (valid until the next poll of the same input)
    /// if a new value was committed since the last poll; returns `false`
    /// for "no update".
    pub poll_input: unsafe extern "C" fn(
        host: *mut c_void,
        input_id: u32,
        out_ptr: *mut *const u8,
        out_len: *mut usize,
    ) -> bool,
    /// Write the streaming output value image. Bounded copy, size-checked
    /// against the size declared at registration; oversized writes fail
    /// with `InvalidArgument`.
    pub write_output: unsafe extern "C" fn(
        host: *mut c_void,
        output_id: u32,
        ptr: *const u8,
        len: usize,
    ) -> RawStatus,
}

// ─── Factory Context ────────────────────────────────────────────────

/// Non-real-time registration surface passed into `create`.
///
/// Implemented by the host; valid only for the duration of the `create`
/// call. Through it the plugin resolves its declared slots and registers
/// the parser/converter for every declared stream. The host fails
/// creation afterwards if any declared stream is left unregistered.
#[repr(C)]
pub struct RawFactoryContext {
    /// Opaque host context. Borrowed for the duration of the call.
    pub host: *mut c_void,
    /// Resolve a declared slot by name, checking the required capability
    /// bits. Writes the assigned slot id through `out_id`.
    pub resolve_slot: unsafe extern "C" fn(
        host: *mut c_void,
        name_ptr: *const u8,
        name_len: usize,
        required_caps: u32,
        out_id: *mut u32,
    ) -> RawStatus,
    /// Register the parser for a declared streaming input. `value_size`
    /// is the fixed size of the real-time value image; the host sizes the
    /// input's mailbox slots to it. Writes the assigned input id through
    /// `out_id`.
    pub register_input_parser: unsafe extern "C" fn(
        host: *mut c_void,
        name_ptr: *const u8,
        name_len: usize,
        value_size: usize,
        parser: StreamingParserFn,
        user_data: *mut c_void,
        user_data_drop: UserDataDropFn,
        out_id: *mut u32,
    ) -> RawStatus,
    /// Register the converter for the declared streaming output. Fails
    /// with `AlreadyExists` if called twice. Writes the assigned output
    /// id through `out_id`.
    pub register_output_converter: unsafe extern "C" fn(
        host: *mut c_void,
        value_size: usize,
        converter: StreamingConverterFn,
        user_data: *mut c_void,
        user_data_drop: UserDataDropFn,
        out_id: *mut u32,
    ) -> RawStatus,
}

// ─── Dispatch Table ─────────────────────────────────────────────────

/// Per-Action-type dispatch table, implemented by the plugin.
///
/// The `state` pointer returned by `create` is opaque to the host, owned
/// by the host from the moment `create` returns Ok, and must be released
/// with `destroy` from the same table exactly once. All other parameters
/// are borrowed for the duration of the call. No function may unwind.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ActionVTable {
    /// Create an Action instance. Non-real-time. `params` is the
    /// serialized fixed parameter message; `ctx` the registration
    /// surface. On success writes the owned state pointer to `out_state`.
    pub create: unsafe extern "C" fn(
        params_ptr: *const u8,
        params_len: usize,
        ctx: *const RawFactoryContext,
        out_state: *mut *mut c_void,
    ) -> RawStatus,
    /// Destroy an Action instance previously returned by `create`.
    /// Non-real-time.
    pub destroy: unsafe extern "C" fn(state: *mut c_void),
    /// Called exactly once each time the Action transitions from
    /// inactive to active, strictly before that cycle's `sense`. Must
    /// reset all since-activation state. Real-time.
    pub on_enter: unsafe extern "C" fn(state: *mut c_void, slots: *const RawSlotMap) -> RawStatus,
    /// Called once per active cycle, always before `control`. Real-time.
    pub sense: unsafe extern "C" fn(
        state: *mut c_void,
        slots: *const RawSlotMap,
        streams: *const RawStreamingIo,
    ) -> RawStatus,
    /// Called once per active cycle, after `sense`. Must not mutate
    /// externally observable state variables. Real-time.
    pub control: unsafe extern "C" fn(state: *mut c_void, slots: *const RawSlotMap) -> RawStatus,
    /// Read a state variable computed by the last `sense`. Real-time
    /// safe; callable any number of times between `sense` and the next
    /// `on_enter`.
    pub get_state_variable: unsafe extern "C" fn(
        state: *const c_void,
        name_ptr: *const u8,
        name_len: usize,
        out: *mut RawStateVariable,
    ) -> RawStatus,
}
