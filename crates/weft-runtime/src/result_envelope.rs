//! Result envelope construction and wire encoding.

use serde_json::Value;
use weft_contract::{ExtensionError, ResultEnvelope, WorkflowContext};

pub fn build_success(context: &WorkflowContext, output: Value) -> ResultEnvelope {
    ResultEnvelope::Completed {
        context: context.clone(),
        output,
    }
}

/// The error's Display output becomes the envelope's `error` field; the
/// `Validation` and `Action` kinds render their bare message so the
/// orchestrator sees e.g. `missing required field: title` verbatim.
pub fn build_failure(context: &WorkflowContext, error: &ExtensionError) -> ResultEnvelope {
    ResultEnvelope::Failed {
        context: context.clone(),
        error: error.to_string(),
    }
}

/// Deterministic JSON encoding. The decoder and invoker contracts only
/// admit JSON-representable values, so a serialization failure here is a
/// programming error upstream, surfaced as a transport fault.
pub fn encode_envelope(envelope: &ResultEnvelope) -> Result<String, ExtensionError> {
    serde_json::to_string(envelope)
        .map_err(|error| ExtensionError::Transport(format!("envelope encoding failed: {error}")))
}
