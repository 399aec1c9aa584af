//! Extension runtime protocol for Weft workflow extensions.
//!
//! Ties the bus adapter, input decoder, and result envelope builder into
//! the one-shot (or explicitly continuous) state machine every extension
//! process runs: announce readiness, wait for work, invoke the action, and
//! report a structured outcome before releasing the subscription.

mod extension_runtime;
mod input_decoder;
mod result_envelope;

pub use extension_runtime::{
    ActionInvoker, ExtensionRuntime, ExtensionRuntimeConfig, RunMode, RunSummary, RuntimeState,
    READY_PAYLOAD,
};
pub use input_decoder::{decode_input, InputSchema};
pub use result_envelope::{build_failure, build_success, encode_envelope};
