//! The response envelope shared by every successful operation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::message::Message;
use super::request::Provider;

/// Token accounting. `total_tokens >= max(prompt_tokens, completion_tokens)`
/// whenever all three are present (§8 invariant).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

impl Usage {
    /// Checks the §8 invariant; `true` vacuously when any count is zero on
    /// both sides (nothing to compare).
    pub fn is_consistent(&self) -> bool {
        self.total_tokens >= self.prompt_tokens && self.total_tokens >= self.completion_tokens
    }
}

/// One choice within a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_probs: Option<serde_json::Value>,
}

/// Cohere's billed-vs-actual token split, preserved for upstream fidelity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BilledUsage {
    pub billed_prompt_tokens: u32,
    pub billed_completion_tokens: u32,
}

/// Metadata attached to every response, success or partial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraFields {
    pub provider: Provider,
    pub model_requested: String,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    pub raw_response: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billed_usage: Option<BilledUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_debug: Option<serde_json::Value>,
    /// Cohere's `chat_history` echo. Non-authoritative (§9): the caller
    /// already has this information from what it sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_history: Option<Vec<Message>>,
    /// Gateway-generated correlation id, stamped before dispatch.
    pub request_id: uuid::Uuid,
}

pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

/// `{ID, Object, Model, Created, Choices[], Usage, ExtraFields}` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: String,
    pub object: String,
    pub model: String,
    pub created: i64,
    pub choices: Vec<Choice>,
    pub usage: Usage,
    pub extra_fields: ExtraFields,
}

impl ResponseEnvelope {
    /// `choices` is always non-nil per §3; this is the canonical way to
    /// build an error-like-but-technically-successful empty response.
    pub fn empty(model: impl Into<String>, extra_fields: ExtraFields) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            object: "chat.completion".to_string(),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            choices: Vec::new(),
            usage: Usage::default(),
            extra_fields,
        }
    }
}
