//! The request envelope: one shape shared by every operation kind.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::message::Message;
use super::tool::{Tool, ToolParameters};

/// Tag identifying which upstream a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenAI,
    Anthropic,
    Cohere,
    Azure,
    Bedrock,
    ElevenLabs,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Cohere => "cohere",
            Provider::Azure => "azure",
            Provider::Bedrock => "bedrock",
            Provider::ElevenLabs => "elevenlabs",
        };
        write!(f, "{s}")
    }
}

/// Operation-specific request payload. Each variant is what an adapter's
/// corresponding §4.F operation receives as `Input`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestInput {
    TextCompletion { prompt: String },
    ChatCompletion { messages: Vec<Message> },
    Responses { messages: Vec<Message> },
    Embedding { input: Vec<String> },
    Speech { text: String, voice: String, format: String },
    Transcription { audio_base64: String, format: String },
    ImageGeneration { prompt: String, size: String },
    CountTokens { messages: Vec<Message> },
}

/// An ordered fallback target: try this `{Provider, Model}` pair next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackTarget {
    pub provider: Provider,
    pub model: String,
}

/// Typed, provider-agnostic optional parameters. See `crate::params` for the
/// flatten/merge contract that turns this into wire JSON.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    /// Open-ended passthrough: entries here are flattened verbatim and win
    /// over any of the named fields above on key conflict (§4.B).
    #[serde(default)]
    pub extra_params: BTreeMap<String, serde_json::Value>,
}

impl RequestParams {
    pub fn tool_parameters(tool: &Tool) -> &ToolParameters {
        &tool.parameters
    }
}

/// One envelope per operation kind (§3). A value object: constructed per
/// call, never mutated by callers; the dispatcher may rewrite `provider` and
/// `model` while walking fallbacks but never touches `input`/`params`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub provider: Provider,
    pub model: String,
    pub input: RequestInput,
    #[serde(default)]
    pub params: Option<RequestParams>,
    #[serde(default)]
    pub fallbacks: Vec<FallbackTarget>,
}

impl RequestEnvelope {
    pub fn new(provider: Provider, model: impl Into<String>, input: RequestInput) -> Self {
        Self {
            provider,
            model: model.into(),
            input,
            params: None,
            fallbacks: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: RequestParams) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_fallbacks(mut self, fallbacks: Vec<FallbackTarget>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Produces the envelope the dispatcher retries with: same input and
    /// params, new provider/model. The caller-visible original is untouched
    /// since this consumes `self` by value and returns a fresh envelope.
    pub fn rewritten_for_fallback(&self, target: &FallbackTarget) -> Self {
        Self {
            provider: target.provider,
            model: target.model.clone(),
            input: self.input.clone(),
            params: self.params.clone(),
            fallbacks: self.fallbacks.clone(),
        }
    }
}
