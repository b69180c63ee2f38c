//! Prelude module for common re-exports.
//!
//! Consumers can do `use axon_common::prelude::*;` and get the most
//! important types without listing individual paths.

// ─── Errors & Status ────────────────────────────────────────────────
pub use crate::error::{ErrorCode, StatusError};
pub use crate::status::{from_raw, result_to_raw, to_raw};

// ─── Signature & Handles ────────────────────────────────────────────
pub use crate::signature::{
    ActionSignature, AnyMessage, RealtimeSlotId, SlotCapabilities, StateVariableKind,
    StateVariableValue, StreamingInputId, StreamingOutputId,
};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, RuntimeConfig};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{
    DEFAULT_CONTROL_FREQUENCY_HZ, MAX_ACTIVE_ACTIONS, MAX_JOINTS_PER_SLOT, MAX_STREAMING_PAYLOAD,
};
