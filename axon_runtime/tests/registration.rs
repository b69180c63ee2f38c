//! Creation-time registration contracts: every stream an Action type
//! declares must get its parser or converter during `create`, streams
//! it never declared cannot be registered, and a failed creation never
//! leaks the plugin-side instance.

use std::cell::Cell;
use std::sync::Arc;

use core::ffi::c_void;

use axon_abi::{RawStatus, RegisterActionFn};
use axon_common::error::StatusError;
use axon_common::signature::{
    ActionSignature, AnyMessage, SlotCapabilities, StateVariableValue,
};
use axon_plugin::views::{FactoryHandle, SlotMapView, StreamingIoView};
use axon_plugin::{Action, ActionFactory};
use axon_runtime::registry::ActionTypeRegistry;
use axon_runtime::session::Session;
use axon_runtime::slot::{PartConfig, SlotRegistry};

thread_local! {
    // Creation and teardown both happen on the calling thread, so a
    // thread-local keeps parallel tests from observing each other.
    static DESTROYED: Cell<usize> = const { Cell::new(0) };
}

/// Inert action whose drop is observable.
struct Inert;

impl Drop for Inert {
    fn drop(&mut self) {
        DESTROYED.with(|d| d.set(d.get() + 1));
    }
}

impl Action for Inert {
    fn on_enter(&mut self, _slots: &SlotMapView<'_>) -> Result<(), StatusError> {
        Ok(())
    }
    fn sense(
        &mut self,
        _slots: &SlotMapView<'_>,
        _streams: &StreamingIoView<'_>,
    ) -> Result<(), StatusError> {
        Ok(())
    }
    fn control(&mut self, _slots: &SlotMapView<'_>) -> Result<(), StatusError> {
        Ok(())
    }
    fn state_variable(&self, name: &str) -> Result<StateVariableValue, StatusError> {
        Err(StatusError::NotFound(format!("state variable '{name}'")))
    }
}

const PARAMS_TYPE: &str = "test.Empty";
const NUMBER_TYPE: &str = "test.Number";

fn empty_params() -> Vec<u8> {
    AnyMessage::pack(PARAMS_TYPE, &serde_json::json!({})).unwrap()
}

fn number_parser(bytes: &[u8]) -> Result<f64, StatusError> {
    AnyMessage::unpack(bytes)?.decode::<f64>(NUMBER_TYPE)
}

// ─── Factories Under Test ───────────────────────────────────────────

/// Declares the input "number" but never registers its parser.
struct MissingParserFactory;

impl ActionFactory for MissingParserFactory {
    type Action = Inert;

    fn signature() -> Result<ActionSignature, StatusError> {
        ActionSignature::builder("missing_parser")
            .parameter_type(PARAMS_TYPE)
            .streaming_input("number", NUMBER_TYPE)
            .build()
    }

    fn create(_params: &AnyMessage, _ctx: &FactoryHandle<'_>) -> Result<Inert, StatusError> {
        Ok(Inert)
    }
}

/// Declares a streaming output but never registers its converter.
struct MissingConverterFactory;

impl ActionFactory for MissingConverterFactory {
    type Action = Inert;

    fn signature() -> Result<ActionSignature, StatusError> {
        ActionSignature::builder("missing_converter")
            .parameter_type(PARAMS_TYPE)
            .streaming_output("test.Duration")
            .build()
    }

    fn create(_params: &AnyMessage, _ctx: &FactoryHandle<'_>) -> Result<Inert, StatusError> {
        Ok(Inert)
    }
}

/// Registers a parser for an input its signature never declared.
struct UndeclaredInputFactory;

impl ActionFactory for UndeclaredInputFactory {
    type Action = Inert;

    fn signature() -> Result<ActionSignature, StatusError> {
        ActionSignature::builder("undeclared_input")
            .parameter_type(PARAMS_TYPE)
            .build()
    }

    fn create(_params: &AnyMessage, ctx: &FactoryHandle<'_>) -> Result<Inert, StatusError> {
        ctx.register_input_parser::<f64, _>("letters", number_parser)?;
        Ok(Inert)
    }
}

/// Registers the same input parser twice.
struct DuplicateParserFactory;

impl ActionFactory for DuplicateParserFactory {
    type Action = Inert;

    fn signature() -> Result<ActionSignature, StatusError> {
        ActionSignature::builder("duplicate_parser")
            .parameter_type(PARAMS_TYPE)
            .streaming_input("number", NUMBER_TYPE)
            .build()
    }

    fn create(_params: &AnyMessage, ctx: &FactoryHandle<'_>) -> Result<Inert, StatusError> {
        ctx.register_input_parser::<f64, _>("number", number_parser)?;
        ctx.register_input_parser::<f64, _>("number", number_parser)?;
        Ok(Inert)
    }
}

/// Registers a converter without declaring a streaming output.
struct UndeclaredOutputFactory;

impl ActionFactory for UndeclaredOutputFactory {
    type Action = Inert;

    fn signature() -> Result<ActionSignature, StatusError> {
        ActionSignature::builder("undeclared_output")
            .parameter_type(PARAMS_TYPE)
            .build()
    }

    fn create(_params: &AnyMessage, ctx: &FactoryHandle<'_>) -> Result<Inert, StatusError> {
        ctx.register_output_converter::<f64, _>(|v| AnyMessage::pack("test.Duration", v))?;
        Ok(Inert)
    }
}

/// Resolves a slot its signature never declared.
struct UndeclaredSlotFactory;

impl ActionFactory for UndeclaredSlotFactory {
    type Action = Inert;

    fn signature() -> Result<ActionSignature, StatusError> {
        ActionSignature::builder("undeclared_slot")
            .parameter_type(PARAMS_TYPE)
            .build()
    }

    fn create(_params: &AnyMessage, ctx: &FactoryHandle<'_>) -> Result<Inert, StatusError> {
        ctx.resolve_slot("arm", SlotCapabilities::JOINT_STATE_READ)?;
        Ok(Inert)
    }
}

// ─── Harness ────────────────────────────────────────────────────────

macro_rules! entry_fn {
    ($name:ident, $factory:ty) => {
        unsafe extern "C" fn $name(
            registrar: *mut c_void,
            register: RegisterActionFn,
        ) -> RawStatus {
            unsafe { axon_plugin::bridge::register_factory::<$factory>(registrar, register) }
        }
    };
}

entry_fn!(missing_parser_entry, MissingParserFactory);
entry_fn!(missing_converter_entry, MissingConverterFactory);
entry_fn!(undeclared_input_entry, UndeclaredInputFactory);
entry_fn!(duplicate_parser_entry, DuplicateParserFactory);
entry_fn!(undeclared_output_entry, UndeclaredOutputFactory);
entry_fn!(undeclared_slot_entry, UndeclaredSlotFactory);

fn session_for(
    entry: unsafe extern "C" fn(*mut c_void, RegisterActionFn) -> RawStatus,
    type_name: &str,
) -> (ActionTypeRegistry, Session, String) {
    let mut registry = ActionTypeRegistry::new();
    registry.register_entry(entry).unwrap();
    let slots = Arc::new(
        SlotRegistry::new(vec![PartConfig {
            name: "arm".to_string(),
            joint_count: 6,
            capabilities: SlotCapabilities::JOINT_STATE_READ
                | SlotCapabilities::JOINT_COMMAND_WRITE,
        }])
        .unwrap(),
    );
    (registry, Session::new(slots), type_name.to_string())
}

fn create_should_fail(
    entry: unsafe extern "C" fn(*mut c_void, RegisterActionFn) -> RawStatus,
    type_name: &str,
) -> StatusError {
    let (registry, mut session, name) = session_for(entry, type_name);
    let ty = registry.get(&name).unwrap();
    session.create_action(ty, &empty_params()).unwrap_err()
}

#[test]
fn declared_input_without_parser_is_failed_precondition() {
    let before = DESTROYED.with(Cell::get);
    let err = create_should_fail(missing_parser_entry, "missing_parser");
    match err {
        StatusError::FailedPrecondition(msg) => assert!(msg.contains("number"), "{msg}"),
        other => panic!("unexpected error {other:?}"),
    }
    // The Inert instance was created, then destroyed on the failure path.
    assert_eq!(DESTROYED.with(Cell::get), before + 1);
}

#[test]
fn declared_output_without_converter_is_failed_precondition() {
    let err = create_should_fail(missing_converter_entry, "missing_converter");
    assert!(matches!(err, StatusError::FailedPrecondition(_)));
}

#[test]
fn undeclared_input_registration_is_not_found() {
    let err = create_should_fail(undeclared_input_entry, "undeclared_input");
    match err {
        StatusError::NotFound(msg) => assert!(msg.contains("letters"), "{msg}"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn duplicate_parser_registration_is_already_exists() {
    let err = create_should_fail(duplicate_parser_entry, "duplicate_parser");
    assert!(matches!(err, StatusError::AlreadyExists(_)));
}

#[test]
fn undeclared_output_registration_is_not_found() {
    let err = create_should_fail(undeclared_output_entry, "undeclared_output");
    assert!(matches!(err, StatusError::NotFound(_)));
}

#[test]
fn undeclared_slot_resolution_is_not_found() {
    // The part exists in the registry, but the signature never declared
    // it, so resolution from create is refused.
    let err = create_should_fail(undeclared_slot_entry, "undeclared_slot");
    assert!(matches!(err, StatusError::NotFound(_)));
}

#[test]
fn duplicate_type_registration_is_already_exists() {
    let mut registry = ActionTypeRegistry::new();
    registry.register_entry(missing_parser_entry).unwrap();
    let err = registry.register_entry(missing_parser_entry).unwrap_err();
    assert!(matches!(err, StatusError::AlreadyExists(_)));
    assert_eq!(registry.len(), 1);
}
