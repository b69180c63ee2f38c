//! AXON Common Library
//!
//! Shared types and utilities for all AXON workspace crates: the
//! canonical error-code enumeration and its marshaling to the wire
//! status, the Action signature data model, runtime constants, and TOML
//! configuration loading.
//!
//! # Module Structure
//!
//! - [`error`] - Canonical error codes and the host-side error type
//! - [`status`] - Marshaling between [`error::StatusError`] and the wire status
//! - [`signature`] - Action signatures, handles, state-variable values
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Runtime constants
//! - [`prelude`] - Common re-exports for convenience

pub mod config;
pub mod consts;
pub mod error;
pub mod prelude;
pub mod signature;
pub mod status;
