//! Tool declarations and model-emitted tool calls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single property descriptor inside a tool's JSON-schema-like parameter
/// record. Kept as a raw JSON value since schemas are open-ended and the
/// core never validates them.
pub type PropertyDescriptor = serde_json::Value;

/// A tool's parameter record: `{Properties, Required}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolParameters {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyDescriptor>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// A tool declaration made available to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: ToolParameters,
}

/// A model-emitted request to invoke a tool.
///
/// `arguments` preserves exactly what the provider emitted: the raw JSON
/// string when the provider emitted a string, or canonical JSON of the
/// provider's parsed argument mapping otherwise (§8 round-trip property).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// Parses `arguments` back into a JSON value; fails only if the upstream
    /// emitted non-JSON text.
    pub fn parsed_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.arguments)
    }

    /// Builds a call from an already-parsed argument mapping, producing
    /// canonical JSON (no provider raw string available to preserve).
    pub fn from_parsed(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: &serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_raw_argument_string() {
        let raw = r#"{"location":"New York","unit":"celsius"}"#;
        let call = ToolCall {
            id: "call_1".into(),
            name: "get_weather".into(),
            arguments: raw.to_string(),
        };
        assert_eq!(call.arguments, raw);
        let parsed = call.parsed_arguments().unwrap();
        assert_eq!(parsed["location"], "New York");
    }
}
