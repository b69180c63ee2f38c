//! Sessions: one client's control authority over the machine.
//!
//! A session owns its Action instances and their streaming exchanges
//! and drives the per-cycle body: for every active action, strictly in
//! order, `on_enter` once per activation, then `sense`, then
//! `control`. Any non-OK status from the real-time path ends the
//! session and disables hardware output; it is never retried and never
//! fatal to the process.

use std::sync::Arc;

use tracing::{error, info};

use axon_common::consts::MAX_ACTIVE_ACTIONS;
use axon_common::error::StatusError;
use axon_common::signature::StateVariableValue;

use crate::factory;
use crate::instance::ActionInstance;
use crate::registry::ActionType;
use crate::slot::{CycleIo, RealtimeSlotMap, SlotRegistry};
use crate::streaming::StreamingExchange;

/// Session-local handle to a created action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionId(u32);

struct SessionAction {
    instance: ActionInstance,
    exchange: Arc<StreamingExchange>,
    active: bool,
    /// Activation is pending its `on_enter`.
    needs_enter: bool,
}

/// One client's set of actions plus the per-cycle I/O storage. The
/// action table is fixed-capacity so the cycle path never touches the
/// allocator.
pub struct Session {
    slots: Arc<SlotRegistry>,
    io: CycleIo,
    actions: heapless::Vec<Option<SessionAction>, MAX_ACTIVE_ACTIONS>,
    hardware_enabled: bool,
}

impl Session {
    pub fn new(slots: Arc<SlotRegistry>) -> Self {
        let io = CycleIo::for_registry(&slots);
        Self {
            slots,
            io,
            actions: heapless::Vec::new(),
            hardware_enabled: true,
        }
    }

    /// Whether the session still drives hardware. Cleared permanently
    /// by the first real-time error.
    pub fn hardware_enabled(&self) -> bool {
        self.hardware_enabled
    }

    /// The per-cycle I/O storage, for the hardware layer to fill and
    /// drain around [`Session::run_cycle`].
    pub fn io_mut(&mut self) -> &mut CycleIo {
        &mut self.io
    }

    fn occupied(&self) -> usize {
        self.actions.iter().filter(|a| a.is_some()).count()
    }

    fn action(&self, id: ActionId) -> Result<&SessionAction, StatusError> {
        self.actions
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| StatusError::NotFound(format!("action {}", id.0)))
    }

    fn action_mut(&mut self, id: ActionId) -> Result<&mut SessionAction, StatusError> {
        self.actions
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| StatusError::NotFound(format!("action {}", id.0)))
    }

    /// Create an instance of `ty` in this session. Non-real-time.
    pub fn create_action(
        &mut self,
        ty: &ActionType,
        params: &[u8],
    ) -> Result<(ActionId, Arc<StreamingExchange>), StatusError> {
        self.ensure_live()?;
        if self.occupied() >= MAX_ACTIVE_ACTIONS {
            return Err(StatusError::FailedPrecondition(format!(
                "session already holds {MAX_ACTIVE_ACTIONS} actions"
            )));
        }
        let (instance, exchange) = factory::instantiate(ty, params, &self.slots)?;
        let exchange = Arc::new(exchange);
        let entry = SessionAction {
            instance,
            exchange: Arc::clone(&exchange),
            active: false,
            needs_enter: false,
        };
        let index = match self.actions.iter().position(Option::is_none) {
            Some(free) => {
                self.actions[free] = Some(entry);
                free
            }
            None => {
                self.actions.push(Some(entry)).map_err(|_| {
                    StatusError::FailedPrecondition(format!(
                        "session already holds {MAX_ACTIVE_ACTIONS} actions"
                    ))
                })?;
                self.actions.len() - 1
            }
        };
        Ok((ActionId(index as u32), exchange))
    }

    /// Destroy an action, deactivating it first if needed. Non-RT.
    pub fn destroy_action(&mut self, id: ActionId) -> Result<(), StatusError> {
        let slot = self
            .actions
            .get_mut(id.0 as usize)
            .ok_or_else(|| StatusError::NotFound(format!("action {}", id.0)))?;
        let action = slot
            .take()
            .ok_or_else(|| StatusError::NotFound(format!("action {}", id.0)))?;
        info!(action_type = %action.instance.type_name(), "action destroyed");
        Ok(())
    }

    /// Mark an action active; its `on_enter` runs at the start of the
    /// next cycle.
    pub fn activate(&mut self, id: ActionId) -> Result<(), StatusError> {
        self.ensure_live()?;
        let action = self.action_mut(id)?;
        if !action.active {
            action.active = true;
            action.needs_enter = true;
        }
        Ok(())
    }

    /// Mark an action inactive; it is skipped from the next cycle on.
    pub fn deactivate(&mut self, id: ActionId) -> Result<(), StatusError> {
        let action = self.action_mut(id)?;
        action.active = false;
        action.needs_enter = false;
        Ok(())
    }

    /// The streaming exchange of an action.
    pub fn exchange(&self, id: ActionId) -> Result<Arc<StreamingExchange>, StatusError> {
        Ok(Arc::clone(&self.action(id)?.exchange))
    }

    /// Read a state variable of an action. RT-safe.
    pub fn state_variable(
        &self,
        id: ActionId,
        name: &str,
    ) -> Result<StateVariableValue, StatusError> {
        self.action(id)?.instance.state_variable(name)
    }

    /// Run one control cycle over all active actions, in creation
    /// order. Real-time path: no allocation, no locking, no blocking.
    ///
    /// # Errors
    /// The first non-OK status ends the session: hardware is disabled,
    /// every action deactivated, and the error surfaced to the caller.
    pub fn run_cycle(&mut self) -> Result<(), StatusError> {
        self.ensure_live()?;
        let result = cycle_body(&self.slots, &mut self.io, &mut self.actions);
        if let Err(ref e) = result {
            error!(error = %e, "real-time error, ending session");
            self.end();
        }
        result
    }

    /// Disable hardware and deactivate everything. Idempotent.
    pub fn end(&mut self) {
        self.hardware_enabled = false;
        for action in self.actions.iter_mut().flatten() {
            action.active = false;
            action.needs_enter = false;
        }
    }

    fn ensure_live(&self) -> Result<(), StatusError> {
        if self.hardware_enabled {
            Ok(())
        } else {
            Err(StatusError::FailedPrecondition(
                "session has ended".to_string(),
            ))
        }
    }
}

fn cycle_body(
    slots: &SlotRegistry,
    io: &mut CycleIo,
    actions: &mut [Option<SessionAction>],
) -> Result<(), StatusError> {
    let mut map = RealtimeSlotMap::new(slots, io);
    for action in actions.iter_mut().flatten() {
        if !action.active {
            continue;
        }
        let instance: &mut ActionInstance = &mut action.instance;
        if action.needs_enter {
            instance.enter(&mut map)?;
            action.needs_enter = false;
        }
        instance.sense(&mut map)?;
        instance.control(&mut map)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ActionTypeRegistry;
    use crate::slot::PartConfig;
    use axon_abi::{RawStatus, RegisterActionFn};
    use axon_common::signature::{ActionSignature, AnyMessage, SlotCapabilities};
    use axon_plugin::views::{FactoryHandle, SlotMapView, StreamingIoView};
    use axon_plugin::{Action, ActionFactory};
    use core::ffi::c_void;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct TickParams {
        fail_after: Option<u64>,
    }

    struct TickAction {
        ticks: u64,
        fail_after: Option<u64>,
    }

    impl Action for TickAction {
        fn on_enter(&mut self, _slots: &SlotMapView<'_>) -> Result<(), StatusError> {
            self.ticks = 0;
            Ok(())
        }
        fn sense(
            &mut self,
            _slots: &SlotMapView<'_>,
            _streams: &StreamingIoView<'_>,
        ) -> Result<(), StatusError> {
            self.ticks += 1;
            if let Some(limit) = self.fail_after {
                if self.ticks > limit {
                    return Err(StatusError::Internal("tick limit exceeded".to_string()));
                }
            }
            Ok(())
        }
        fn control(&mut self, _slots: &SlotMapView<'_>) -> Result<(), StatusError> {
            Ok(())
        }
        fn state_variable(&self, name: &str) -> Result<StateVariableValue, StatusError> {
            match name {
                "ticks" => Ok(StateVariableValue::Int64(self.ticks as i64)),
                other => Err(StatusError::NotFound(format!("state variable '{other}'"))),
            }
        }
    }

    struct TickFactory;

    impl ActionFactory for TickFactory {
        type Action = TickAction;

        fn signature() -> Result<ActionSignature, StatusError> {
            ActionSignature::builder("tick")
                .parameter_type("test.TickParams")
                .state_variable("ticks", axon_common::signature::StateVariableKind::Int64)
                .build()
        }

        fn create(
            params: &AnyMessage,
            _ctx: &FactoryHandle<'_>,
        ) -> Result<Self::Action, StatusError> {
            let p: TickParams = params.decode("test.TickParams")?;
            Ok(TickAction {
                ticks: 0,
                fail_after: p.fail_after,
            })
        }
    }

    unsafe extern "C" fn tick_entry(
        registrar: *mut c_void,
        register: RegisterActionFn,
    ) -> RawStatus {
        unsafe { axon_plugin::bridge::register_factory::<TickFactory>(registrar, register) }
    }

    fn setup() -> (ActionTypeRegistry, Session) {
        let mut registry = ActionTypeRegistry::new();
        registry.register_entry(tick_entry).unwrap();
        let slots = Arc::new(
            SlotRegistry::new(vec![PartConfig {
                name: "arm".to_string(),
                joint_count: 6,
                capabilities: SlotCapabilities::JOINT_STATE_READ
                    | SlotCapabilities::JOINT_COMMAND_WRITE,
            }])
            .unwrap(),
        );
        (registry, Session::new(slots))
    }

    fn params(fail_after: Option<u64>) -> Vec<u8> {
        AnyMessage::pack("test.TickParams", &TickParams { fail_after }).unwrap()
    }

    #[test]
    fn inactive_action_is_skipped() {
        let (registry, mut session) = setup();
        let ty = registry.get("tick").unwrap();
        let (id, _) = session.create_action(ty, &params(None)).unwrap();

        session.run_cycle().unwrap();
        // Never activated: sense never ran.
        assert_eq!(
            session.state_variable(id, "ticks").unwrap(),
            StateVariableValue::Int64(0)
        );
    }

    #[test]
    fn activation_runs_enter_then_cycles() {
        let (registry, mut session) = setup();
        let ty = registry.get("tick").unwrap();
        let (id, _) = session.create_action(ty, &params(None)).unwrap();

        session.activate(id).unwrap();
        for _ in 0..5 {
            session.run_cycle().unwrap();
        }
        assert_eq!(
            session.state_variable(id, "ticks").unwrap(),
            StateVariableValue::Int64(5)
        );

        // Re-activation resets the since-activation state via on_enter.
        session.deactivate(id).unwrap();
        session.run_cycle().unwrap();
        session.activate(id).unwrap();
        session.run_cycle().unwrap();
        assert_eq!(
            session.state_variable(id, "ticks").unwrap(),
            StateVariableValue::Int64(1)
        );
    }

    #[test]
    fn rt_error_ends_session() {
        let (registry, mut session) = setup();
        let ty = registry.get("tick").unwrap();
        let (id, _) = session.create_action(ty, &params(Some(2))).unwrap();

        session.activate(id).unwrap();
        session.run_cycle().unwrap();
        session.run_cycle().unwrap();
        let err = session.run_cycle().unwrap_err();
        assert!(matches!(err, StatusError::Internal(_)));
        assert!(!session.hardware_enabled());

        // The session is over for every subsequent operation.
        assert!(matches!(
            session.run_cycle().unwrap_err(),
            StatusError::FailedPrecondition(_)
        ));
        assert!(matches!(
            session.activate(id).unwrap_err(),
            StatusError::FailedPrecondition(_)
        ));
        // But the instance is still readable post-mortem.
        assert!(session.state_variable(id, "ticks").is_ok());
    }

    #[test]
    fn capacity_is_bounded() {
        let (registry, mut session) = setup();
        let ty = registry.get("tick").unwrap();
        for _ in 0..MAX_ACTIVE_ACTIONS {
            session.create_action(ty, &params(None)).unwrap();
        }
        let err = session.create_action(ty, &params(None)).unwrap_err();
        assert!(matches!(err, StatusError::FailedPrecondition(_)));
    }

    #[test]
    fn destroy_frees_capacity_and_invalidates_handle() {
        let (registry, mut session) = setup();
        let ty = registry.get("tick").unwrap();
        let (id, _) = session.create_action(ty, &params(None)).unwrap();
        session.destroy_action(id).unwrap();
        assert!(matches!(
            session.state_variable(id, "ticks").unwrap_err(),
            StatusError::NotFound(_)
        ));
        // The slot is reusable.
        let (id2, _) = session.create_action(ty, &params(None)).unwrap();
        assert_eq!(id, id2);
    }
}
