//! Tool descriptors and the versioned catalog
//!
//! A tool describes itself with a name, free-text description, a
//! main-thread flag, and a JSON-Schema (draft-07 subset) for its
//! parameters. The schema travels as an embedded JSON string, same as
//! every other payload on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Self-description of one registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "requiresMainThread")]
    pub requires_main_thread: bool,
    /// JSON-Schema object for the tool's parameters, serialized as a string.
    #[serde(rename = "parameterSchema")]
    pub parameter_schema: String,
}

impl ToolDescriptor {
    /// Parse the embedded parameter schema back into a JSON value.
    pub fn schema_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.parameter_schema)
    }
}

/// Versioned list of tool descriptors served by `list_tools`.
///
/// The version is bumped on every discovery pass (startup and each reload);
/// the broker caches it and skips re-registration when unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCatalog {
    pub version: u64,
    pub tools: Vec<ToolDescriptor>,
}

/// Names of object-level `required` properties absent from `args`.
///
/// `args` must be a JSON object; anything else reports every required field
/// as missing. Used for the invalid-arg check before a tool runs.
pub fn missing_required_fields(schema: &Value, args: &Value) -> Vec<String> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Vec::new();
    };

    required
        .iter()
        .filter_map(|r| r.as_str())
        .filter(|field| args.get(*field).is_none())
        .map(String::from)
        .collect()
}
