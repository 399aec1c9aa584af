//! Shared input decoder.
//!
//! Every extension declares its required inputs once; the decoder parses
//! the raw payload and reports the first missing field in declared order,
//! one error at a time. Value interpretation beyond presence belongs to
//! the action invoker.

use weft_contract::{ExtensionError, InputRecord};

#[derive(Debug, Clone, Default)]
/// Declarative required-field list evaluated against the `inputs` map.
pub struct InputSchema {
    required: Vec<String>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>) -> Self {
        self.required.push(name.into());
        self
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required
    }
}

/// Parses a raw wire payload into an `InputRecord` and validates it
/// against the schema.
///
/// A parse failure (or a payload whose shape cannot hold an `inputs` map)
/// is `malformed payload`; an absent `inputs` key decodes as an empty map.
/// Scanning stops at the first missing required field.
pub fn decode_input(raw: &str, schema: &InputSchema) -> Result<InputRecord, ExtensionError> {
    let record: InputRecord = serde_json::from_str(raw)
        .map_err(|_| ExtensionError::Validation("malformed payload".into()))?;
    for name in &schema.required {
        if record.input_is_missing(name) {
            return Err(ExtensionError::missing_field(name));
        }
    }
    Ok(record)
}
