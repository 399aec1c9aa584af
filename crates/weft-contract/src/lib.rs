//! Wire and data contract shared by Weft extension processes.
//!
//! Defines the workflow identifiers, channel names, bus message envelope,
//! input record, and result envelope exchanged between an extension runtime
//! and the dispatching orchestrator, plus the protocol error taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Outbound discriminant for a successful invocation.
pub const ENVELOPE_TYPE_COMPLETED: &str = "completed";
/// Outbound discriminant for a failed invocation.
pub const ENVELOPE_TYPE_FAILED: &str = "failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Immutable workflow identifiers carried through a run.
///
/// Set once at process start from configuration and copied verbatim into
/// every outbound envelope; the runtime never derives or mutates these from
/// the input payload.
pub struct WorkflowContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    pub workflow_instance_id: String,
    pub workflow_extension_id: String,
}

impl WorkflowContext {
    pub fn new(
        workflow_id: Option<String>,
        workflow_instance_id: impl Into<String>,
        workflow_extension_id: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id,
            workflow_instance_id: workflow_instance_id.into(),
            workflow_extension_id: workflow_extension_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The three named channels used by one runtime instance.
pub struct ChannelSet {
    pub input: String,
    pub output: String,
    pub ready: String,
}

impl ChannelSet {
    pub fn new(
        input: impl Into<String>,
        output: impl Into<String>,
        ready: impl Into<String>,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            ready: ready.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `BusMessageKind` values.
pub enum BusMessageKind {
    /// A data message carrying a workflow payload.
    Data,
    /// Transport confirmation that a subscription was registered.
    Subscribed,
    /// Transport confirmation that a subscription was released.
    Unsubscribed,
}

impl BusMessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

#[derive(Debug, Clone)]
/// Transport-level envelope received from an input subscription.
///
/// Only `Data` messages advance the runtime; control traffic is discarded
/// where it stands.
pub struct BusMessage {
    pub kind: BusMessageKind,
    pub channel: String,
    pub payload: String,
}

impl BusMessage {
    pub fn data(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: BusMessageKind::Data,
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn control(kind: BusMessageKind, channel: impl Into<String>) -> Self {
        Self {
            kind,
            channel: channel.into(),
            payload: String::new(),
        }
    }

    pub fn is_data(&self) -> bool {
        self.kind == BusMessageKind::Data
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// Decoded workflow payload handed to an action invoker.
///
/// The `inputs` map is the extension-facing surface; any other top-level
/// protocol fields are preserved untouched so the record round-trips.
pub struct InputRecord {
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InputRecord {
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    /// Returns true when the named input is absent or carries the
    /// empty/None sentinel (`null` or `""`).
    pub fn input_is_missing(&self, name: &str) -> bool {
        match self.inputs.get(name) {
            None | Some(Value::Null) => true,
            Some(Value::String(text)) => text.is_empty(),
            Some(_) => false,
        }
    }

    pub fn require_str(&self, name: &str) -> Result<&str, ExtensionError> {
        if self.input_is_missing(name) {
            return Err(ExtensionError::missing_field(name));
        }
        match self.inputs.get(name) {
            Some(Value::String(text)) => Ok(text.as_str()),
            _ => Err(ExtensionError::Validation(format!("{name} must be a string"))),
        }
    }

    pub fn require_i64(&self, name: &str) -> Result<i64, ExtensionError> {
        if self.input_is_missing(name) {
            return Err(ExtensionError::missing_field(name));
        }
        match self.inputs.get(name).and_then(Value::as_i64) {
            Some(number) => Ok(number),
            None => Err(ExtensionError::Validation(format!(
                "{name} must be an integer"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
/// Outbound protocol envelope; exactly one is published per processed
/// data message.
pub enum ResultEnvelope {
    Completed {
        #[serde(flatten)]
        context: WorkflowContext,
        output: Value,
    },
    Failed {
        #[serde(flatten)]
        context: WorkflowContext,
        error: String,
    },
}

impl ResultEnvelope {
    pub fn context(&self) -> &WorkflowContext {
        match self {
            Self::Completed { context, .. } | Self::Failed { context, .. } => context,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Completed { .. } => ENVELOPE_TYPE_COMPLETED,
            Self::Failed { .. } => ENVELOPE_TYPE_FAILED,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug, Error)]
/// Enumerates supported `ExtensionError` values.
///
/// `Validation` and `Action` render the bare message because their Display
/// output is published verbatim as the `error` field of a failed envelope.
pub enum ExtensionError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Action(String),
}

impl ExtensionError {
    pub fn missing_field(name: &str) -> Self {
        Self::Validation(format!("missing required field: {name}"))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Transport(_) => "transport",
            Self::Validation(_) => "validation",
            Self::Action(_) => "action",
        }
    }

    /// Failures at or above the connect/publish boundary have no recovery
    /// path inside the runtime; everything else is converted into a failed
    /// envelope at the processing boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Action(_))
    }
}
