//! Hardware slot registry and the per-cycle realtime slot map.
//!
//! The registry is built once at startup from the part configuration
//! and is immutable afterwards. Actions resolve their declared slots by
//! name during creation; the real-time cycle then addresses parts by
//! the resolved `RealtimeSlotId` only, through a borrowed
//! [`RealtimeSlotMap`] over preallocated per-part I/O storage.

use core::ffi::c_void;

use axon_abi::{RawJointCommand, RawJointState, RawSlotMap};
use axon_common::consts::{MAX_JOINTS_PER_SLOT, MAX_SLOTS};
use axon_common::error::StatusError;
use axon_common::signature::{RealtimeSlotId, SlotCapabilities};

// ─── Part Configuration ─────────────────────────────────────────────

/// One controllable part exposed to Actions as a named slot.
#[derive(Debug, Clone)]
pub struct PartConfig {
    /// Slot name, unique within the registry.
    pub name: String,
    /// Number of joints, `1..=MAX_JOINTS_PER_SLOT`; 0 for pure-digital
    /// parts.
    pub joint_count: usize,
    /// Capabilities the part provides.
    pub capabilities: SlotCapabilities,
}

// ─── Slot Registry ──────────────────────────────────────────────────

/// Build-once registry mapping slot names to ids and capabilities.
/// Slot ids are the parts' indices, stable for the process lifetime.
#[derive(Debug)]
pub struct SlotRegistry {
    parts: Vec<PartConfig>,
}

impl SlotRegistry {
    /// Build and validate the registry.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty or duplicate name, a joint count
    /// beyond `MAX_JOINTS_PER_SLOT`, or more than `MAX_SLOTS` parts.
    pub fn new(parts: Vec<PartConfig>) -> Result<Self, StatusError> {
        if parts.len() > MAX_SLOTS {
            return Err(StatusError::InvalidArgument(format!(
                "{} parts configured, limit is {MAX_SLOTS}",
                parts.len()
            )));
        }
        for (i, part) in parts.iter().enumerate() {
            if part.name.is_empty() {
                return Err(StatusError::InvalidArgument(
                    "slot name must not be empty".to_string(),
                ));
            }
            if part.joint_count > MAX_JOINTS_PER_SLOT {
                return Err(StatusError::InvalidArgument(format!(
                    "slot '{}' declares {} joints, limit is {MAX_JOINTS_PER_SLOT}",
                    part.name, part.joint_count
                )));
            }
            if parts[..i].iter().any(|p| p.name == part.name) {
                return Err(StatusError::InvalidArgument(format!(
                    "duplicate slot name '{}'",
                    part.name
                )));
            }
        }
        Ok(Self { parts })
    }

    /// Number of registered parts.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The part behind a slot id, if any.
    pub fn part(&self, id: RealtimeSlotId) -> Option<&PartConfig> {
        self.parts.get(id.0 as usize)
    }

    /// Resolve a slot by name, validating the required capability set.
    ///
    /// # Errors
    /// `NotFound` if no part has this name, `FailedPrecondition` if the
    /// part lacks a required capability.
    pub fn resolve(
        &self,
        name: &str,
        required: SlotCapabilities,
    ) -> Result<RealtimeSlotId, StatusError> {
        let (index, part) = self
            .parts
            .iter()
            .enumerate()
            .find(|(_, p)| p.name == name)
            .ok_or_else(|| StatusError::NotFound(format!("slot '{name}'")))?;
        if !part.capabilities.contains(required) {
            return Err(StatusError::FailedPrecondition(format!(
                "slot '{name}' provides {:?}, required {required:?}",
                part.capabilities
            )));
        }
        Ok(RealtimeSlotId(index as u32))
    }
}

// ─── Per-Part Cycle I/O ─────────────────────────────────────────────

/// Preallocated per-part I/O storage for one cycle. The hardware layer
/// fills state/inputs before the cycle body and consumes
/// commands/outputs after it.
#[derive(Debug, Clone, Copy)]
pub struct PartIo {
    pub joint_state: RawJointState,
    pub joint_command: RawJointCommand,
    pub digital_inputs: u64,
    pub digital_outputs: u64,
}

impl PartIo {
    const fn zeroed() -> Self {
        Self {
            joint_state: RawJointState::zeroed(),
            joint_command: RawJointCommand::zeroed(),
            digital_inputs: 0,
            digital_outputs: 0,
        }
    }
}

/// All parts' cycle I/O, indexed by slot id. Allocated once when the
/// session starts, fixed thereafter.
#[derive(Debug)]
pub struct CycleIo {
    parts: Vec<PartIo>,
}

impl CycleIo {
    /// Storage sized to the registry, with joint counts prefilled from
    /// the part configuration.
    pub fn for_registry(registry: &SlotRegistry) -> Self {
        let parts = (0..registry.len())
            .map(|i| {
                let mut io = PartIo::zeroed();
                // Registry indices are in range by construction.
                if let Some(part) = registry.part(RealtimeSlotId(i as u32)) {
                    io.joint_state.joint_count = part.joint_count as u32;
                    io.joint_command.joint_count = part.joint_count as u32;
                }
                io
            })
            .collect();
        Self { parts }
    }

    pub fn part(&self, id: RealtimeSlotId) -> Option<&PartIo> {
        self.parts.get(id.0 as usize)
    }

    pub fn part_mut(&mut self, id: RealtimeSlotId) -> Option<&mut PartIo> {
        self.parts.get_mut(id.0 as usize)
    }
}

// ─── Realtime Slot Map ──────────────────────────────────────────────

/// Per-cycle borrowed view handed to Actions through the raw slot-map
/// table. Every accessor is a bounds check, a capability check and a
/// bounded copy; an unknown id yields "absent", never an error status.
pub struct RealtimeSlotMap<'a> {
    registry: &'a SlotRegistry,
    io: &'a mut CycleIo,
}

impl<'a> RealtimeSlotMap<'a> {
    pub fn new(registry: &'a SlotRegistry, io: &'a mut CycleIo) -> Self {
        Self { registry, io }
    }

    /// The raw table passed across the ABI. Valid only while `self`
    /// stays borrowed at the given address, so callers build it
    /// immediately before the dispatch call.
    pub fn raw_table(&mut self) -> RawSlotMap {
        RawSlotMap {
            host: self as *mut Self as *mut c_void,
            read_joint_state,
            write_joint_command,
            read_digital_inputs,
            write_digital_outputs,
        }
    }

    fn has_capability(&self, id: RealtimeSlotId, cap: SlotCapabilities) -> bool {
        self.registry
            .part(id)
            .is_some_and(|p| p.capabilities.contains(cap))
    }

    fn read_joint_state(&self, id: RealtimeSlotId) -> Option<RawJointState> {
        if !self.has_capability(id, SlotCapabilities::JOINT_STATE_READ) {
            return None;
        }
        self.io.part(id).map(|p| p.joint_state)
    }

    fn write_joint_command(&mut self, id: RealtimeSlotId, cmd: &RawJointCommand) -> bool {
        if !self.has_capability(id, SlotCapabilities::JOINT_COMMAND_WRITE) {
            return false;
        }
        let expected = match self.registry.part(id) {
            Some(part) => part.joint_count as u32,
            None => return false,
        };
        if cmd.joint_count != expected {
            return false;
        }
        match self.io.part_mut(id) {
            Some(part) => {
                part.joint_command = *cmd;
                true
            }
            None => false,
        }
    }

    fn read_digital_inputs(&self, id: RealtimeSlotId) -> Option<u64> {
        if !self.has_capability(id, SlotCapabilities::DIGITAL_READ) {
            return None;
        }
        self.io.part(id).map(|p| p.digital_inputs)
    }

    fn write_digital_outputs(&mut self, id: RealtimeSlotId, bits: u64) -> bool {
        if !self.has_capability(id, SlotCapabilities::DIGITAL_WRITE) {
            return false;
        }
        match self.io.part_mut(id) {
            Some(part) => {
                part.digital_outputs = bits;
                true
            }
            None => false,
        }
    }
}

// ─── ABI Trampolines ────────────────────────────────────────────────
//
// The raw table's host pointer is the `RealtimeSlotMap` the table was
// built from; the host guarantees it outlives the dispatch call and is
// not aliased during it.

unsafe extern "C" fn read_joint_state(
    host: *mut c_void,
    slot_id: u32,
    out: *mut RawJointState,
) -> bool {
    // SAFETY: per the table contract above; out is a valid out-param.
    let map = unsafe { &*(host as *const RealtimeSlotMap) };
    match map.read_joint_state(RealtimeSlotId(slot_id)) {
        Some(state) => {
            // SAFETY: out is a valid out-parameter.
            unsafe { *out = state };
            true
        }
        None => false,
    }
}

unsafe extern "C" fn write_joint_command(
    host: *mut c_void,
    slot_id: u32,
    cmd: *const RawJointCommand,
) -> bool {
    // SAFETY: per the table contract; cmd is borrowed for the call.
    let (map, cmd) = unsafe { (&mut *(host as *mut RealtimeSlotMap), &*cmd) };
    map.write_joint_command(RealtimeSlotId(slot_id), cmd)
}

unsafe extern "C" fn read_digital_inputs(host: *mut c_void, slot_id: u32, out: *mut u64) -> bool {
    // SAFETY: per the table contract.
    let map = unsafe { &*(host as *const RealtimeSlotMap) };
    match map.read_digital_inputs(RealtimeSlotId(slot_id)) {
        Some(bits) => {
            // SAFETY: out is a valid out-parameter.
            unsafe { *out = bits };
            true
        }
        None => false,
    }
}

unsafe extern "C" fn write_digital_outputs(host: *mut c_void, slot_id: u32, bits: u64) -> bool {
    // SAFETY: per the table contract.
    let map = unsafe { &mut *(host as *mut RealtimeSlotMap) };
    map.write_digital_outputs(RealtimeSlotId(slot_id), bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm_registry() -> SlotRegistry {
        SlotRegistry::new(vec![
            PartConfig {
                name: "arm".to_string(),
                joint_count: 6,
                capabilities: SlotCapabilities::JOINT_STATE_READ
                    | SlotCapabilities::JOINT_COMMAND_WRITE,
            },
            PartConfig {
                name: "gripper_io".to_string(),
                joint_count: 0,
                capabilities: SlotCapabilities::DIGITAL_READ | SlotCapabilities::DIGITAL_WRITE,
            },
        ])
        .unwrap()
    }

    #[test]
    fn resolve_known_slot() {
        let reg = arm_registry();
        let id = reg
            .resolve("arm", SlotCapabilities::JOINT_STATE_READ)
            .unwrap();
        assert_eq!(id, RealtimeSlotId(0));
        assert_eq!(reg.part(id).unwrap().joint_count, 6);
    }

    #[test]
    fn resolve_unknown_slot_is_not_found() {
        let err = arm_registry()
            .resolve("leg", SlotCapabilities::empty())
            .unwrap_err();
        assert!(matches!(err, StatusError::NotFound(_)));
    }

    #[test]
    fn resolve_missing_capability_is_failed_precondition() {
        let err = arm_registry()
            .resolve("arm", SlotCapabilities::DIGITAL_WRITE)
            .unwrap_err();
        assert!(matches!(err, StatusError::FailedPrecondition(_)));
    }

    #[test]
    fn registry_rejects_duplicate_name() {
        let err = SlotRegistry::new(vec![
            PartConfig {
                name: "arm".to_string(),
                joint_count: 6,
                capabilities: SlotCapabilities::JOINT_STATE_READ,
            },
            PartConfig {
                name: "arm".to_string(),
                joint_count: 2,
                capabilities: SlotCapabilities::DIGITAL_READ,
            },
        ])
        .unwrap_err();
        assert!(matches!(err, StatusError::InvalidArgument(_)));
    }

    #[test]
    fn registry_rejects_excess_joints() {
        let err = SlotRegistry::new(vec![PartConfig {
            name: "centipede".to_string(),
            joint_count: MAX_JOINTS_PER_SLOT + 1,
            capabilities: SlotCapabilities::JOINT_STATE_READ,
        }])
        .unwrap_err();
        assert!(matches!(err, StatusError::InvalidArgument(_)));
    }

    #[test]
    fn slot_map_roundtrip_through_raw_table() {
        let reg = arm_registry();
        let mut io = CycleIo::for_registry(&reg);
        io.part_mut(RealtimeSlotId(0)).unwrap().joint_state.positions[2] = 0.7;

        let mut map = RealtimeSlotMap::new(&reg, &mut io);
        let raw = map.raw_table();

        let mut state = RawJointState::zeroed();
        assert!(unsafe { (raw.read_joint_state)(raw.host, 0, &mut state) });
        assert_eq!(state.joint_count, 6);
        assert_eq!(state.positions[2], 0.7);

        let mut cmd = RawJointCommand::zeroed();
        cmd.joint_count = 6;
        cmd.positions[0] = 1.1;
        assert!(unsafe { (raw.write_joint_command)(raw.host, 0, &cmd) });
        drop(map);
        assert_eq!(
            io.part(RealtimeSlotId(0)).unwrap().joint_command.positions[0],
            1.1
        );
    }

    #[test]
    fn unknown_id_is_absent_not_error() {
        let reg = arm_registry();
        let mut io = CycleIo::for_registry(&reg);
        let mut map = RealtimeSlotMap::new(&reg, &mut io);
        let raw = map.raw_table();

        let mut state = RawJointState::zeroed();
        assert!(!unsafe { (raw.read_joint_state)(raw.host, 99, &mut state) });
        assert!(!unsafe { (raw.write_digital_outputs)(raw.host, 99, 0xFF) });
    }

    #[test]
    fn capability_enforced_per_accessor() {
        let reg = arm_registry();
        let mut io = CycleIo::for_registry(&reg);
        let mut map = RealtimeSlotMap::new(&reg, &mut io);
        let raw = map.raw_table();

        // The arm has no digital capability; the gripper no joints.
        let mut bits = 0u64;
        assert!(!unsafe { (raw.read_digital_inputs)(raw.host, 0, &mut bits) });
        let mut state = RawJointState::zeroed();
        assert!(!unsafe { (raw.read_joint_state)(raw.host, 1, &mut state) });
        assert!(unsafe { (raw.write_digital_outputs)(raw.host, 1, 0b101) });
    }

    #[test]
    fn command_joint_count_must_match() {
        let reg = arm_registry();
        let mut io = CycleIo::for_registry(&reg);
        let mut map = RealtimeSlotMap::new(&reg, &mut io);
        let raw = map.raw_table();

        let mut cmd = RawJointCommand::zeroed();
        cmd.joint_count = 3; // arm has 6
        assert!(!unsafe { (raw.write_joint_command)(raw.host, 0, &cmd) });
    }
}
