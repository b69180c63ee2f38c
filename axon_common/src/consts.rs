//! Runtime constants shared across the AXON workspace.

/// Default control frequency [Hz]. One `sense`/`control` pair runs per
/// active Action per cycle.
pub const DEFAULT_CONTROL_FREQUENCY_HZ: f64 = 1000.0;

/// Hard upper bound on a serialized streaming-output payload [bytes].
/// Exceeding it is an `InvalidArgument`, never a crash.
pub const MAX_STREAMING_PAYLOAD: usize = 100 * 1024;

/// Maximum number of Actions a single session may hold active at once.
/// Bounds the per-cycle iteration and keeps the active set inline.
pub const MAX_ACTIVE_ACTIONS: usize = 16;

/// Maximum number of hardware slots (parts) a server process exposes.
pub const MAX_SLOTS: usize = 32;

/// Re-export of the joint bound fixed by the ABI layout.
pub use axon_abi::MAX_JOINTS_PER_SLOT;
