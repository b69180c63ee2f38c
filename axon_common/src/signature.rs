//! Action signatures, opaque handles and state-variable values.
//!
//! An [`ActionSignature`] declares everything an Action type needs from
//! the host: hardware slots with capability requirements, the fixed
//! parameter message type, state variables, and streaming I/O. It is
//! built once per Action type (validated by [`SignatureBuilder`]),
//! immutable afterwards, and exchanged between plugin and host inside
//! the self-describing [`AnyMessage`] envelope.

use serde::{Deserialize, Serialize};

use axon_abi::{
    RawStateVariable, RawStateVariableValue, STATE_VAR_BOOL, STATE_VAR_DOUBLE, STATE_VAR_INT64,
};

use crate::error::StatusError;

// ─── Opaque Handles ─────────────────────────────────────────────────

/// Opaque handle to a hardware slot, assigned by the slot registry at
/// Action-creation time. Unique within one server process, stable for
/// the Action's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RealtimeSlotId(pub u32);

/// Opaque handle to a registered streaming input, assigned once at
/// registration. The real-time cycle addresses the input's mailbox by
/// this id, never by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamingInputId(pub u32);

/// Opaque handle to the registered streaming output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamingOutputId(pub u32);

// ─── Slot Capabilities ──────────────────────────────────────────────

bitflags::bitflags! {
    /// Capability bits a slot must provide for an Action to use it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SlotCapabilities: u32 {
        /// Joint positions/velocities readable.
        const JOINT_STATE_READ = 1 << 0;
        /// Joint position commands writable.
        const JOINT_COMMAND_WRITE = 1 << 1;
        /// Digital input bank readable.
        const DIGITAL_READ = 1 << 2;
        /// Digital output bank writable.
        const DIGITAL_WRITE = 1 << 3;
    }
}

// ─── State Variables ────────────────────────────────────────────────

/// Type of a declared state variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateVariableKind {
    Double,
    Bool,
    Int64,
}

/// Read-only snapshot of a state variable, valid between `sense` and
/// the next `on_enter`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateVariableValue {
    Double(f64),
    Bool(bool),
    Int64(i64),
    /// Declared but not yet computed.
    None,
}

impl StateVariableValue {
    /// Convert to the `#[repr(C)]` form crossing the ABI.
    pub const fn to_raw(self) -> RawStateVariable {
        match self {
            Self::Double(v) => RawStateVariable {
                tag: STATE_VAR_DOUBLE,
                value: RawStateVariableValue { double_: v },
            },
            Self::Bool(v) => RawStateVariable {
                tag: STATE_VAR_BOOL,
                value: RawStateVariableValue {
                    bool_: if v { 1 } else { 0 },
                },
            },
            Self::Int64(v) => RawStateVariable {
                tag: STATE_VAR_INT64,
                value: RawStateVariableValue { int64: v },
            },
            Self::None => RawStateVariable::none(),
        }
    }

    /// Convert from the raw form. An unknown tag collapses to `None`:
    /// a corrupt tag must not make the host read an undefined union
    /// field.
    pub fn from_raw(raw: &RawStateVariable) -> Self {
        // SAFETY: the tag selects the union field that the writer
        // initialized; unknown tags are not read at all.
        unsafe {
            match raw.tag {
                STATE_VAR_DOUBLE => Self::Double(raw.value.double_),
                STATE_VAR_BOOL => Self::Bool(raw.value.bool_ != 0),
                STATE_VAR_INT64 => Self::Int64(raw.value.int64),
                _ => Self::None,
            }
        }
    }
}

// ─── Signature ──────────────────────────────────────────────────────

/// A hardware slot requirement declared by an Action type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotRequirement {
    /// Slot name, unique within the signature.
    pub name: String,
    /// Capabilities the underlying part must provide.
    pub capabilities: SlotCapabilities,
}

/// A state variable declared by an Action type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateVariableSpec {
    /// Variable name, unique within the signature.
    pub name: String,
    pub kind: StateVariableKind,
}

/// One entry of the (at most one) streaming-input set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingInputSpec {
    /// Input name, unique within the set.
    pub name: String,
    /// Declared payload message type name, validated against incoming
    /// [`AnyMessage`] envelopes before the parser runs.
    pub message_type: String,
}

/// The (at most one, unkeyed) streaming output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingOutputSpec {
    /// Produced payload message type name.
    pub message_type: String,
}

/// Everything an Action type declares to the host. Immutable once
/// built; produced once at plugin registration, consumed by the factory
/// and registration path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSignature {
    /// Action type name, unique per server process.
    pub name: String,
    pub description: String,
    /// Message type name of the fixed parameters passed to `create`.
    pub parameter_type: String,
    pub slots: Vec<SlotRequirement>,
    pub state_variables: Vec<StateVariableSpec>,
    pub streaming_inputs: Vec<StreamingInputSpec>,
    pub streaming_output: Option<StreamingOutputSpec>,
}

impl ActionSignature {
    /// Start building a signature.
    pub fn builder(name: impl Into<String>) -> SignatureBuilder {
        SignatureBuilder::new(name)
    }

    /// Look up a declared slot by name.
    pub fn slot(&self, name: &str) -> Option<&SlotRequirement> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// Look up a declared streaming input by name.
    pub fn streaming_input(&self, name: &str) -> Option<&StreamingInputSpec> {
        self.streaming_inputs.iter().find(|s| s.name == name)
    }

    /// Message type name used for the signature envelope.
    pub const MESSAGE_TYPE: &'static str = "axon.ActionSignature";

    /// Serialize into the any-message envelope for the registration
    /// exchange.
    pub fn pack(&self) -> Result<Vec<u8>, StatusError> {
        AnyMessage::pack(Self::MESSAGE_TYPE, self)
    }

    /// Decode from the any-message envelope, validating the declared
    /// type name.
    pub fn unpack(bytes: &[u8]) -> Result<Self, StatusError> {
        AnyMessage::unpack(bytes)?.decode(Self::MESSAGE_TYPE)
    }
}

/// Validating builder for [`ActionSignature`].
#[derive(Debug)]
pub struct SignatureBuilder {
    signature: ActionSignature,
}

impl SignatureBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            signature: ActionSignature {
                name: name.into(),
                description: String::new(),
                parameter_type: String::new(),
                slots: Vec::new(),
                state_variables: Vec::new(),
                streaming_inputs: Vec::new(),
                streaming_output: None,
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.signature.description = description.into();
        self
    }

    pub fn parameter_type(mut self, message_type: impl Into<String>) -> Self {
        self.signature.parameter_type = message_type.into();
        self
    }

    pub fn slot(mut self, name: impl Into<String>, capabilities: SlotCapabilities) -> Self {
        self.signature.slots.push(SlotRequirement {
            name: name.into(),
            capabilities,
        });
        self
    }

    pub fn state_variable(mut self, name: impl Into<String>, kind: StateVariableKind) -> Self {
        self.signature.state_variables.push(StateVariableSpec {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn streaming_input(
        mut self,
        name: impl Into<String>,
        message_type: impl Into<String>,
    ) -> Self {
        self.signature.streaming_inputs.push(StreamingInputSpec {
            name: name.into(),
            message_type: message_type.into(),
        });
        self
    }

    pub fn streaming_output(mut self, message_type: impl Into<String>) -> Self {
        self.signature.streaming_output = Some(StreamingOutputSpec {
            message_type: message_type.into(),
        });
        self
    }

    /// Validate and freeze the signature.
    ///
    /// # Errors
    /// `InvalidArgument` for an empty name, empty parameter type, or a
    /// duplicate slot/state-variable/streaming-input name.
    pub fn build(self) -> Result<ActionSignature, StatusError> {
        let s = self.signature;
        if s.name.is_empty() {
            return Err(StatusError::InvalidArgument(
                "signature name must not be empty".to_string(),
            ));
        }
        if s.parameter_type.is_empty() {
            return Err(StatusError::InvalidArgument(format!(
                "signature '{}' declares no parameter type",
                s.name
            )));
        }
        check_unique(s.slots.iter().map(|x| x.name.as_str()), "slot")?;
        check_unique(
            s.state_variables.iter().map(|x| x.name.as_str()),
            "state variable",
        )?;
        check_unique(
            s.streaming_inputs.iter().map(|x| x.name.as_str()),
            "streaming input",
        )?;
        Ok(s)
    }
}

fn check_unique<'a>(
    names: impl Iterator<Item = &'a str>,
    what: &str,
) -> Result<(), StatusError> {
    let mut seen: Vec<&str> = Vec::new();
    for name in names {
        if name.is_empty() {
            return Err(StatusError::InvalidArgument(format!(
                "{what} name must not be empty"
            )));
        }
        if seen.contains(&name) {
            return Err(StatusError::InvalidArgument(format!(
                "duplicate {what} name '{name}'"
            )));
        }
        seen.push(name);
    }
    Ok(())
}

// ─── Any-Message Envelope ───────────────────────────────────────────

/// Self-describing message envelope used for every non-real-time wire
/// payload: fixed parameters, streaming payloads, and the signature
/// exchange. Carrying the type name lets the host validate it against
/// the declared message type before invoking a parser or converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnyMessage {
    /// Fully qualified message type name.
    pub type_name: String,
    /// The payload, opaque until decoded against an expected type.
    pub payload: serde_json::Value,
}

impl AnyMessage {
    /// Wrap and serialize a payload.
    pub fn pack<T: Serialize>(type_name: &str, payload: &T) -> Result<Vec<u8>, StatusError> {
        let envelope = AnyMessage {
            type_name: type_name.to_string(),
            payload: serde_json::to_value(payload)
                .map_err(|e| StatusError::Internal(format!("payload serialization: {e}")))?,
        };
        serde_json::to_vec(&envelope)
            .map_err(|e| StatusError::Internal(format!("envelope serialization: {e}")))
    }

    /// Deserialize an envelope. Malformed bytes are `InvalidArgument`.
    pub fn unpack(bytes: &[u8]) -> Result<Self, StatusError> {
        serde_json::from_slice(bytes)
            .map_err(|e| StatusError::InvalidArgument(format!("malformed message envelope: {e}")))
    }

    /// Decode the payload, first validating the declared type name.
    pub fn decode<T: for<'de> Deserialize<'de>>(
        &self,
        expected_type: &str,
    ) -> Result<T, StatusError> {
        if self.type_name != expected_type {
            return Err(StatusError::InvalidArgument(format!(
                "message type mismatch: expected '{expected_type}', got '{}'",
                self.type_name
            )));
        }
        serde_json::from_value(self.payload.clone())
            .map_err(|e| StatusError::InvalidArgument(format!("malformed '{expected_type}': {e}")))
    }
}
