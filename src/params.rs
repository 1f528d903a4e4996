//! Parameter plumbing (§4.B).
//!
//! The source this gateway is modeled on flattens typed parameter structs
//! via reflection. Per the redesign flag in §9, this is re-expressed as an
//! explicit field-by-field walk: the behavioral contract — one wire entry
//! per set optional field, plus every `extra_params` entry — is identical,
//! but there is no runtime reflection anywhere in this module.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::schema::RequestParams;

/// A wire-ready mapping from JSON field name to value.
pub type WireParams = BTreeMap<String, Value>;

/// Walks `params` and emits one entry per set optional field plus every
/// `extra_params` entry. Unset fields never appear as keys. Pure: depends
/// only on `params`, produces the same mapping on repeated calls (§8).
pub fn flatten(params: &RequestParams) -> WireParams {
    let mut out = WireParams::new();

    if let Some(v) = params.temperature {
        out.insert("temperature".to_string(), Value::from(v));
    }
    if let Some(v) = params.top_p {
        out.insert("top_p".to_string(), Value::from(v));
    }
    if let Some(v) = params.max_tokens {
        out.insert("max_tokens".to_string(), Value::from(v));
    }
    if let Some(v) = &params.stop {
        out.insert("stop".to_string(), Value::from(v.clone()));
    }
    if let Some(v) = params.presence_penalty {
        out.insert("presence_penalty".to_string(), Value::from(v));
    }
    if let Some(v) = params.frequency_penalty {
        out.insert("frequency_penalty".to_string(), Value::from(v));
    }
    if let Some(tools) = &params.tools {
        if let Ok(v) = serde_json::to_value(tools) {
            out.insert("tools".to_string(), v);
        }
    }
    if let Some(v) = &params.tool_choice {
        out.insert("tool_choice".to_string(), v.clone());
    }
    if let Some(v) = params.parallel_tool_calls {
        out.insert("parallel_tool_calls".to_string(), Value::from(v));
    }

    for (key, value) in &params.extra_params {
        out.insert(key.clone(), value.clone());
    }

    out
}

/// Produces a new mapping where `custom` wins on key conflict. Neither input
/// is mutated (§8: `Merge(a,b)[k] = b[k]` if `k ∈ b`, else `a[k]`).
pub fn merge(default: &WireParams, custom: &WireParams) -> WireParams {
    let mut out = default.clone();
    for (key, value) in custom {
        out.insert(key.clone(), value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Tool;

    #[test]
    fn unset_fields_never_appear() {
        let params = RequestParams::default();
        assert!(flatten(&params).is_empty());
    }

    #[test]
    fn flatten_is_pure_and_deterministic() {
        let mut params = RequestParams::default();
        params.temperature = Some(0.7);
        params.extra_params.insert(
            "logit_bias".to_string(),
            serde_json::json!({"50256": -100}),
        );

        let first = flatten(&params);
        let second = flatten(&params);
        assert_eq!(first, second);
        assert_eq!(first.get("temperature"), Some(&Value::from(0.7)));
        assert!(first.contains_key("logit_bias"));
    }

    #[test]
    fn tools_serialize_through_flatten() {
        let mut params = RequestParams::default();
        params.tools = Some(vec![Tool {
            name: "get_weather".to_string(),
            description: None,
            parameters: Default::default(),
        }]);
        let flat = flatten(&params);
        assert!(flat.contains_key("tools"));
    }

    #[test]
    fn merge_prefers_custom_and_does_not_mutate_inputs() {
        let mut default = WireParams::new();
        default.insert("model".to_string(), Value::from("gpt-4"));
        default.insert("temperature".to_string(), Value::from(0.2));

        let mut custom = WireParams::new();
        custom.insert("temperature".to_string(), Value::from(0.9));
        custom.insert("max_tokens".to_string(), Value::from(128));

        let merged = merge(&default, &custom);

        assert_eq!(merged.get("model"), Some(&Value::from("gpt-4")));
        assert_eq!(merged.get("temperature"), Some(&Value::from(0.9)));
        assert_eq!(merged.get("max_tokens"), Some(&Value::from(128)));

        // inputs unchanged
        assert_eq!(default.get("temperature"), Some(&Value::from(0.2)));
        assert_eq!(custom.len(), 2);
    }
}
