//! AXON Runtime
//!
//! Host side of the Action plugin framework: the action type registry
//! and plugin image loader, the per-instance factory and streaming
//! exchange, the slot registry with its per-cycle realtime slot map,
//! sessions, and the deterministic cycle runner.
//!
//! ## Threading model
//!
//! One RT thread runs all active Actions of a session strictly
//! sequentially once per cycle. Non-RT threads create and destroy
//! actions, feed streaming inputs and convert the streaming output.
//! The only cross-thread coordination on the cycle path is the
//! mailbox's single atomic state word.

pub mod cycle;
mod factory;
pub mod instance;
pub mod loader;
pub mod mailbox;
pub mod registry;
pub mod session;
pub mod slot;
pub mod streaming;

pub use cycle::{CycleControl, CycleError, CycleRunner, CycleStats, rt_setup};
pub use instance::{ActionInstance, LifecyclePhase};
pub use loader::{LoaderError, PluginImage, discover_plugins};
pub use registry::{ActionType, ActionTypeRegistry, RegistryError};
pub use session::{ActionId, Session};
pub use slot::{CycleIo, PartConfig, RealtimeSlotMap, SlotRegistry};
pub use streaming::StreamingExchange;

// The shared base crate is part of this crate's public API surface.
pub use axon_common::config::{ConfigLoader, RuntimeConfig};
pub use axon_common::error::{ErrorCode, StatusError};
pub use axon_common::signature::{ActionSignature, AnyMessage, StateVariableValue};
