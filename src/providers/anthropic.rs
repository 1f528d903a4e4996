//! Anthropic adapter (§4.F).
//!
//! System messages are concatenated and lifted to the top-level `system`
//! field, tools are translated to Anthropic's `input_schema` shape, and the
//! legacy text-completion endpoint renames `max_tokens` to
//! `max_tokens_to_sample`. `thinking` content never merges into `content`
//! (see the reasoning-field decision in DESIGN.md).

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{GatewayError, Result};
use crate::handler::{self, ProviderErrorBody};
use crate::params;
use crate::schema::{
    Choice, ContentBlock, ErrorDetail, ExtraFields, ImageSource, Message, MessageContent,
    Provider, RequestEnvelope, RequestInput, ResponseEnvelope, Role, ToolCall, Usage,
};
use crate::schema::StreamElementKind;
use crate::streaming::{CancellationToken, StreamHandle, spawn_sse_reader};
use crate::transport::NetworkConfig;

use super::{Capabilities, Credential, ProviderAdapter};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(
        network: &NetworkConfig,
        proxy: &crate::transport::ProxyConfig,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = crate::transport::build_client(
            Provider::Anthropic,
            network,
            proxy,
        )?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn headers(&self, credential: &Credential) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", credential.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ]
    }
}

/// Pulls every system message's text out and joins it with a single space,
/// preserving order, leaving the remaining messages in order (Anthropic has
/// no system role inside `messages`).
fn separate_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system_parts = Vec::new();
    let mut rest = Vec::new();
    for message in messages {
        if message.role == Role::System {
            system_parts.push(crate::schema::get_chat_content(message));
        } else {
            rest.push(message);
        }
    }
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join(" "))
    };
    (system, rest)
}

fn content_block_to_wire(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::Image { source, .. } => match source {
            ImageSource::Url { url } => json!({
                "type": "image",
                "source": {"type": "url", "url": url},
            }),
            ImageSource::Base64 { data, media_type } => json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data},
            }),
        },
        ContentBlock::File { data, filename: _ } => json!({
            "type": "document",
            "source": {"type": "base64", "media_type": "application/pdf", "data": data},
        }),
        ContentBlock::Audio { .. } => {
            json!({"type": "text", "text": ""})
        }
    }
}

fn message_to_wire(message: &Message) -> Value {
    let role = match message.role {
        Role::Assistant => "assistant",
        _ => "user",
    };

    if let Some(tool_call_id) = &message.tool_call_id {
        return json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": tool_call_id,
                "content": crate::schema::get_chat_content(message),
            }],
        });
    }

    let mut parts = match &message.content {
        MessageContent::Text(text) if !text.is_empty() => {
            vec![json!({"type": "text", "text": text})]
        }
        MessageContent::Text(_) => Vec::new(),
        MessageContent::Blocks(blocks) => blocks.iter().map(content_block_to_wire).collect(),
    };

    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            let input = call
                .parsed_arguments()
                .unwrap_or_else(|_| json!({"raw": call.arguments}));
            parts.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.name,
                "input": input,
            }));
        }
    }

    json!({"role": role, "content": parts})
}

fn tool_to_wire(tool: &crate::schema::Tool) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description.clone().unwrap_or_default(),
        "input_schema": {
            "type": "object",
            "properties": tool.parameters.properties,
            "required": tool.parameters.required,
        },
    })
}

pub(crate) fn build_messages_body(model: &str, request: &RequestEnvelope) -> Result<Value> {
    let messages = match &request.input {
        RequestInput::ChatCompletion { messages } | RequestInput::Responses { messages } => {
            messages
        }
        _ => {
            return Err(GatewayError::Marshalling {
                provider: Provider::Anthropic,
                message: "chat_completion called with non-chat input".to_string(),
            });
        }
    };

    let (system, rest) = separate_system(messages);
    let wire_messages: Vec<Value> = rest.into_iter().map(message_to_wire).collect();

    let max_tokens = request
        .params
        .as_ref()
        .and_then(|p| p.max_tokens)
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": wire_messages,
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }

    if let Some(params) = &request.params {
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = params.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(stop) = &params.stop {
            body["stop_sequences"] = json!(stop);
        }
        if let Some(tools) = &params.tools {
            body["tools"] = json!(tools.iter().map(tool_to_wire).collect::<Vec<_>>());
            if let Some(choice) = &params.tool_choice {
                body["tool_choice"] = choice.clone();
            }
            if params.parallel_tool_calls == Some(false) {
                body["tool_choice"]["disable_parallel_tool_use"] = json!(true);
            }
        }
        for (key, value) in &params.extra_params {
            body[key] = value.clone();
        }
    }

    Ok(body)
}

/// The legacy text-completion wire shape renames `max_tokens` to
/// `max_tokens_to_sample` — this rename applies only here, never to chat.
pub(crate) fn build_text_completion_body(model: &str, request: &RequestEnvelope) -> Result<Value> {
    let RequestInput::TextCompletion { prompt } = &request.input else {
        return Err(GatewayError::Marshalling {
            provider: Provider::Anthropic,
            message: "text_completion called with non-text input".to_string(),
        });
    };

    let max_tokens = request
        .params
        .as_ref()
        .and_then(|p| p.max_tokens)
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let mut body = params::WireParams::new();
    body.insert("model".to_string(), json!(model));
    body.insert("prompt".to_string(), json!(prompt));
    body.insert("max_tokens_to_sample".to_string(), json!(max_tokens));

    if let Some(params) = &request.params {
        let mut flat = params::flatten(params);
        flat.remove("max_tokens");
        for (key, value) in flat {
            body.insert(key, value);
        }
    }

    Ok(Value::Object(body.into_iter().collect()))
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Debug, Deserialize, Default)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl ProviderErrorBody for AnthropicErrorBody {
    fn into_detail(self) -> ErrorDetail {
        ErrorDetail {
            error_type: Some(self.error.error_type),
            code: None,
            message: self.error.message,
            param: None,
            underlying: None,
        }
    }
}

/// `stop_reason` (Anthropic's native field name) maps onto the normalized
/// `finish_reason`; there is no separate `stop_sequence` echo worth
/// preserving beyond what `stop_reason` already carries.
pub(crate) fn parse_messages_response(
    model_requested: &str,
    body: &[u8],
    latency: std::time::Duration,
) -> Result<ResponseEnvelope> {
    let decoded = handler::decode_body::<AnthropicResponse>(Provider::Anthropic, body)?;
    let typed = decoded.typed;

    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls = Vec::new();

    for block in typed.content {
        match block {
            AnthropicContentBlock::Text { text: t } => text.push_str(&t),
            AnthropicContentBlock::Thinking { thinking } => reasoning.push_str(&thinking),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::from_parsed(id, name, &input));
            }
        }
    }

    let message = Message {
        role: Role::Assistant,
        content: MessageContent::Text(text),
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
        audio: None,
        reasoning: if reasoning.is_empty() {
            None
        } else {
            Some(reasoning)
        },
        finish_reason: typed.stop_reason.clone(),
    };

    Ok(ResponseEnvelope {
        id: typed.id,
        object: "chat.completion".to_string(),
        model: typed.model,
        created: chrono::Utc::now().timestamp(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: typed.stop_reason,
            stop_string: None,
            log_probs: None,
        }],
        usage: Usage {
            prompt_tokens: typed.usage.input_tokens,
            completion_tokens: typed.usage.output_tokens,
            total_tokens: typed.usage.input_tokens + typed.usage.output_tokens,
            audio_tokens: None,
            cached_tokens: None,
            reasoning_tokens: None,
        },
        extra_fields: ExtraFields {
            provider: Provider::Anthropic,
            model_requested: model_requested.to_string(),
            latency,
            raw_response: decoded.raw,
            billed_usage: None,
            cache_debug: None,
            chat_history: None,
            request_id: uuid::Uuid::new_v4(),
        },
    })
}

async fn post(
    client: &reqwest::Client,
    url: &str,
    headers: Vec<(&str, String)>,
    body: &Value,
) -> Result<(Vec<u8>, std::time::Duration)> {
    let started = Instant::now();
    let mut builder = client.post(url).json(body);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    let response = builder
        .send()
        .await
        .map_err(|err| handler::transport_error(Provider::Anthropic, err.to_string()))?;

    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| handler::transport_error(Provider::Anthropic, err.to_string()))?;

    if !status.is_success() {
        return Err(handler::classify_http_error::<AnthropicErrorBody>(
            Provider::Anthropic,
            status.as_u16(),
            &bytes,
        ));
    }
    Ok((bytes.to_vec(), started.elapsed()))
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn key(&self) -> Provider {
        Provider::Anthropic
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: true,
            tools: true,
            images: true,
            audio: false,
            image_generation: false,
            embedding: false,
            responses: true,
            count_tokens: false,
        }
    }

    async fn text_completion(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let body = build_text_completion_body(&request.model, request)?;
        let url = format!("{}/v1/complete", self.base_url);
        let (bytes, latency) = post(
            &self.client,
            &url,
            self.headers(credential),
            &body,
        )
        .await?;
        let decoded = handler::decode_body::<Value>(Provider::Anthropic, &bytes)?;
        Ok(ResponseEnvelope {
            id: uuid::Uuid::new_v4().to_string(),
            object: "text_completion".to_string(),
            model: request.model.clone(),
            created: chrono::Utc::now().timestamp(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(
                    decoded.typed["completion"].as_str().unwrap_or("").to_string(),
                ),
                finish_reason: decoded.typed["stop_reason"].as_str().map(str::to_string),
                stop_string: None,
                log_probs: None,
            }],
            usage: Usage::default(),
            extra_fields: ExtraFields {
                provider: Provider::Anthropic,
                model_requested: request.model.clone(),
                latency,
                raw_response: decoded.raw,
                billed_usage: None,
                cache_debug: None,
                chat_history: None,
                request_id: uuid::Uuid::new_v4(),
            },
        })
    }

    async fn chat_completion(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let body = build_messages_body(&request.model, request)?;
        let url = format!("{}/v1/messages", self.base_url);
        let (bytes, latency) = post(&self.client, &url, self.headers(credential), &body).await?;
        parse_messages_response(&request.model, &bytes, latency)
    }

    async fn responses(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        self.chat_completion(credential, request).await
    }

    async fn chat_completion_stream(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<StreamHandle> {
        let mut body = build_messages_body(&request.model, request)?;
        body["stream"] = json!(true);

        let url = format!("{}/v1/messages", self.base_url);
        let mut builder = self.client.post(&url).json(&body);
        for (name, value) in self.headers(credential) {
            builder = builder.header(name, value);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::Anthropic, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let bytes = response.bytes().await.unwrap_or_default();
            return Err(handler::classify_http_error::<AnthropicErrorBody>(
                Provider::Anthropic,
                status.as_u16(),
                &bytes,
            ));
        }

        use futures_util::StreamExt;
        let byte_stream = Box::pin(
            response
                .bytes_stream()
                .map(|item| item.map_err(|err| err.to_string())),
        );

        Ok(spawn_sse_reader(
            byte_stream,
            32,
            cancel,
            parse_message_stream_event,
        ))
    }
}

/// Translates one Anthropic SSE data payload into normalized stream
/// elements. Anthropic's `ping`/`message_start`/`content_block_start`/
/// `content_block_stop` events carry nothing a caller needs and are
/// silently dropped.
fn parse_message_stream_event(data: &str) -> Vec<StreamElementKind> {
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return Vec::new();
    };
    let event_type = value.get("type").and_then(Value::as_str).unwrap_or("");

    match event_type {
        "content_block_delta" => {
            let delta = value.get("delta").cloned().unwrap_or(Value::Null);
            match delta.get("type").and_then(Value::as_str) {
                Some("text_delta") => vec![StreamElementKind::TextDelta {
                    text: delta
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                }],
                Some("input_json_delta") => vec![StreamElementKind::ToolCallDelta {
                    index: value.get("index").and_then(Value::as_u64).unwrap_or(0) as u32,
                    id: None,
                    name: None,
                    arguments_fragment: delta
                        .get("partial_json")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                }],
                _ => Vec::new(),
            }
        }
        "message_delta" => value
            .get("usage")
            .and_then(|u| u.get("output_tokens"))
            .and_then(Value::as_u64)
            .map(|output_tokens| {
                vec![StreamElementKind::Usage {
                    usage: Usage {
                        prompt_tokens: 0,
                        completion_tokens: output_tokens as u32,
                        total_tokens: output_tokens as u32,
                        audio_tokens: None,
                        cached_tokens: None,
                        reasoning_tokens: None,
                    },
                }]
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Message, RequestParams};

    #[test]
    fn system_messages_are_concatenated_and_lifted() {
        let request = RequestEnvelope::new(
            Provider::Anthropic,
            "claude-3",
            RequestInput::ChatCompletion {
                messages: vec![
                    Message::system("be terse"),
                    Message::system("no emoji"),
                    Message::user("hi"),
                ],
            },
        );
        let body = build_messages_body("claude-3", &request).unwrap();
        assert_eq!(body["system"], "be terse no emoji");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn text_completion_renames_max_tokens() {
        let mut params = RequestParams::default();
        params.max_tokens = Some(256);
        let request = RequestEnvelope::new(
            Provider::Anthropic,
            "claude-2",
            RequestInput::TextCompletion {
                prompt: "hello".to_string(),
            },
        )
        .with_params(params);

        let body = build_text_completion_body("claude-2", &request).unwrap();
        assert_eq!(body["max_tokens_to_sample"], 256);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn tools_translate_to_input_schema() {
        let mut params = RequestParams::default();
        params.tools = Some(vec![crate::schema::Tool {
            name: "get_weather".to_string(),
            description: Some("looks up weather".to_string()),
            parameters: Default::default(),
        }]);
        let request = RequestEnvelope::new(
            Provider::Anthropic,
            "claude-3",
            RequestInput::ChatCompletion {
                messages: vec![Message::user("weather?")],
            },
        )
        .with_params(params);

        let body = build_messages_body("claude-3", &request).unwrap();
        assert!(body["tools"][0].get("input_schema").is_some());
    }
}
