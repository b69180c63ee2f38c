//! Lifecycle ordering under randomized activation churn.
//!
//! A checker action verifies from the inside that the host only ever
//! dispatches `on_enter` after creation or a completed cycle, `sense`
//! after `on_enter` or a completed cycle, and `control` directly after
//! `sense`. The harness mirrors the expected dispatch counts and
//! compares them against the action's own counters at the end.

use std::sync::Arc;

use core::ffi::c_void;

use axon_abi::{RawStatus, RegisterActionFn};
use axon_common::error::StatusError;
use axon_common::signature::{
    ActionSignature, AnyMessage, SlotCapabilities, StateVariableKind, StateVariableValue,
};
use axon_plugin::views::{FactoryHandle, SlotMapView, StreamingIoView};
use axon_plugin::{Action, ActionFactory};
use axon_runtime::registry::ActionTypeRegistry;
use axon_runtime::session::{ActionId, Session};
use axon_runtime::slot::{PartConfig, SlotRegistry};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum LastCall {
    None,
    Enter,
    Sense,
    Control,
}

struct Checker {
    last: LastCall,
    enters: i64,
    senses: i64,
    controls: i64,
}

impl Checker {
    fn violation(&self, op: &str) -> StatusError {
        StatusError::Internal(format!("{op} dispatched after {:?}", self.last))
    }
}

impl Action for Checker {
    fn on_enter(&mut self, _slots: &SlotMapView<'_>) -> Result<(), StatusError> {
        if !matches!(self.last, LastCall::None | LastCall::Control) {
            return Err(self.violation("on_enter"));
        }
        self.last = LastCall::Enter;
        self.enters += 1;
        Ok(())
    }

    fn sense(
        &mut self,
        _slots: &SlotMapView<'_>,
        _streams: &StreamingIoView<'_>,
    ) -> Result<(), StatusError> {
        if !matches!(self.last, LastCall::Enter | LastCall::Control) {
            return Err(self.violation("sense"));
        }
        self.last = LastCall::Sense;
        self.senses += 1;
        Ok(())
    }

    fn control(&mut self, _slots: &SlotMapView<'_>) -> Result<(), StatusError> {
        if self.last != LastCall::Sense {
            return Err(self.violation("control"));
        }
        self.last = LastCall::Control;
        self.controls += 1;
        Ok(())
    }

    fn state_variable(&self, name: &str) -> Result<StateVariableValue, StatusError> {
        match name {
            "enters" => Ok(StateVariableValue::Int64(self.enters)),
            "senses" => Ok(StateVariableValue::Int64(self.senses)),
            "controls" => Ok(StateVariableValue::Int64(self.controls)),
            other => Err(StatusError::NotFound(format!("state variable '{other}'"))),
        }
    }
}

struct CheckerFactory;

impl ActionFactory for CheckerFactory {
    type Action = Checker;

    fn signature() -> Result<ActionSignature, StatusError> {
        ActionSignature::builder("checker")
            .parameter_type("test.Empty")
            .state_variable("enters", StateVariableKind::Int64)
            .state_variable("senses", StateVariableKind::Int64)
            .state_variable("controls", StateVariableKind::Int64)
            .build()
    }

    fn create(_params: &AnyMessage, _ctx: &FactoryHandle<'_>) -> Result<Checker, StatusError> {
        Ok(Checker {
            last: LastCall::None,
            enters: 0,
            senses: 0,
            controls: 0,
        })
    }
}

unsafe extern "C" fn checker_entry(
    registrar: *mut c_void,
    register: RegisterActionFn,
) -> RawStatus {
    unsafe { axon_plugin::bridge::register_factory::<CheckerFactory>(registrar, register) }
}

// ─── Harness ────────────────────────────────────────────────────────

/// Deterministic xorshift; good enough to shuffle activation patterns.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

/// Host-side mirror of one action's expected dispatch counts.
struct Expected {
    id: ActionId,
    active: bool,
    needs_enter: bool,
    enters: i64,
    cycles: i64,
}

fn int64(session: &Session, id: ActionId, name: &str) -> i64 {
    match session.state_variable(id, name).unwrap() {
        StateVariableValue::Int64(v) => v,
        other => panic!("unexpected value {other:?}"),
    }
}

#[test]
fn ordering_holds_under_activation_churn() {
    let mut registry = ActionTypeRegistry::new();
    registry.register_entry(checker_entry).unwrap();
    let ty = registry.get("checker").unwrap();
    let slots = Arc::new(
        SlotRegistry::new(vec![PartConfig {
            name: "arm".to_string(),
            joint_count: 6,
            capabilities: SlotCapabilities::JOINT_STATE_READ
                | SlotCapabilities::JOINT_COMMAND_WRITE,
        }])
        .unwrap(),
    );
    let mut session = Session::new(slots);
    let params = AnyMessage::pack("test.Empty", &serde_json::json!({})).unwrap();

    let mut expected: Vec<Expected> = (0..3)
        .map(|_| {
            let (id, _) = session.create_action(ty, &params).unwrap();
            Expected {
                id,
                active: false,
                needs_enter: false,
                enters: 0,
                cycles: 0,
            }
        })
        .collect();

    let mut rng = Rng(0x5eed_cafe_f00d_0001);
    for _ in 0..1000 {
        // Random activation churn between cycles.
        for e in expected.iter_mut() {
            match rng.next() % 8 {
                0 => {
                    if !e.active {
                        e.active = true;
                        e.needs_enter = true;
                    }
                    session.activate(e.id).unwrap();
                }
                1 => {
                    e.active = false;
                    e.needs_enter = false;
                    session.deactivate(e.id).unwrap();
                }
                _ => {}
            }
        }

        session.run_cycle().unwrap();
        for e in expected.iter_mut() {
            if e.active {
                if e.needs_enter {
                    e.enters += 1;
                    e.needs_enter = false;
                }
                e.cycles += 1;
            }
        }
    }

    for e in &expected {
        assert_eq!(int64(&session, e.id, "enters"), e.enters);
        assert_eq!(int64(&session, e.id, "senses"), e.cycles);
        assert_eq!(int64(&session, e.id, "controls"), e.cycles);
    }
    // The churn must have exercised real activity to mean anything.
    assert!(expected.iter().any(|e| e.enters > 10 && e.cycles > 100));
}
