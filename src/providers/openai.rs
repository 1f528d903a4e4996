//! OpenAI-compatible adapter (§4.F).
//!
//! Pass-through translation: images are emitted as
//! `{type: image_url, image_url: {url, detail?}}`, text and image blocks are
//! sent in the order received, and tools/tool-choice pass through
//! unchanged. Every other OpenAI-compatible provider in this gateway
//! (Azure) reuses the wire helpers defined here.

use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{GatewayError, Result};
use crate::handler::{self, ProviderErrorBody};
use crate::params;
use crate::schema::{
    Choice, ContentBlock, ErrorDetail, ExtraFields, Message, MessageContent, Provider,
    RequestEnvelope, RequestInput, ResponseEnvelope, Role, StreamElementKind, ToolCall, Usage,
};
use crate::streaming::{CancellationToken, StreamHandle, spawn_sse_reader};
use crate::transport::NetworkConfig;

use super::{Capabilities, Credential, ProviderAdapter};

pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(
        network: &NetworkConfig,
        proxy: &crate::transport::ProxyConfig,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = crate::transport::build_client(
            Provider::OpenAI,
            network,
            proxy,
        )?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

/// Converts the normalized message list into OpenAI's `messages` array.
pub(crate) fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let content = match &message.content {
                MessageContent::Text(text) => json!(text),
                MessageContent::Blocks(blocks) => json!(
                    blocks
                        .iter()
                        .map(content_block_to_wire)
                        .collect::<Vec<_>>()
                ),
            };
            let mut wire = json!({
                "role": role_to_wire(message.role),
                "content": content,
            });
            if let Some(tool_calls) = &message.tool_calls {
                wire["tool_calls"] = json!(
                    tool_calls
                        .iter()
                        .map(|call| json!({
                            "id": call.id,
                            "type": "function",
                            "function": {"name": call.name, "arguments": call.arguments},
                        }))
                        .collect::<Vec<_>>()
                );
            }
            if let Some(tool_call_id) = &message.tool_call_id {
                wire["tool_call_id"] = json!(tool_call_id);
            }
            wire
        })
        .collect()
}

fn role_to_wire(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
        Role::Chatbot => "user",
    }
}

fn content_block_to_wire(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::Image { source, detail } => {
            let url = match source {
                crate::schema::ImageSource::Url { url } => url.clone(),
                crate::schema::ImageSource::Base64 { data, media_type } => {
                    format!("data:{media_type};base64,{data}")
                }
            };
            let mut image_url = json!({"url": url});
            if let Some(detail) = detail {
                image_url["detail"] = json!(detail);
            }
            json!({"type": "image_url", "image_url": image_url})
        }
        ContentBlock::Audio { audio } => json!({
            "type": "input_audio",
            "input_audio": {"data": audio.data, "format": audio.format},
        }),
        ContentBlock::File { data, filename } => json!({
            "type": "file",
            "file": {"file_data": data, "filename": filename},
        }),
    }
}

/// Builds the base `{model, messages/prompt, tools, ...}` mapping, then
/// merges in the caller's flattened params (§4.B).
pub(crate) fn build_chat_body(model: &str, request: &RequestEnvelope) -> Result<Value> {
    let RequestInput::ChatCompletion { messages } = &request.input else {
        return Err(GatewayError::Marshalling {
            provider: request.provider,
            message: "chat_completion called with non-chat input".to_string(),
        });
    };

    let mut base = params::WireParams::new();
    base.insert("model".to_string(), json!(model));
    base.insert("messages".to_string(), json!(to_wire_messages(messages)));

    let merged = match &request.params {
        Some(p) => params::merge(&base, &params::flatten(p)),
        None => base,
    };

    Ok(Value::Object(merged.into_iter().collect()))
}

/// Builds the `{model, prompt, size, ...}` mapping for `/images/generations`.
pub(crate) fn build_image_body(model: &str, request: &RequestEnvelope) -> Result<Value> {
    let RequestInput::ImageGeneration { prompt, size } = &request.input else {
        return Err(GatewayError::Marshalling {
            provider: Provider::OpenAI,
            message: "image_generation called with non-image input".to_string(),
        });
    };

    let mut base = params::WireParams::new();
    base.insert("model".to_string(), json!(model));
    base.insert("prompt".to_string(), json!(prompt));
    base.insert("size".to_string(), json!(size));

    let merged = match &request.params {
        Some(p) => params::merge(&base, &params::flatten(p)),
        None => base,
    };

    Ok(Value::Object(merged.into_iter().collect()))
}

pub(crate) fn parse_image_response(
    model_requested: &str,
    body: &[u8],
    latency: std::time::Duration,
) -> Result<ResponseEnvelope> {
    let decoded = handler::decode_body::<OpenAiImageResponse>(Provider::OpenAI, body)?;
    let typed = decoded.typed;

    let choices = typed
        .data
        .into_iter()
        .enumerate()
        .map(|(index, datum)| {
            let block = match (datum.b64_json, datum.url) {
                (Some(data), _) => ContentBlock::image_base64(data, "image/png"),
                (None, Some(url)) => ContentBlock::image_url(url),
                (None, None) => ContentBlock::text(""),
            };
            Choice {
                index: index as u32,
                message: Message {
                    role: Role::Assistant,
                    content: MessageContent::Blocks(vec![block]),
                    tool_calls: None,
                    tool_call_id: None,
                    audio: None,
                    reasoning: None,
                    finish_reason: None,
                },
                finish_reason: None,
                stop_string: None,
                log_probs: None,
            }
        })
        .collect();

    Ok(ResponseEnvelope {
        id: uuid::Uuid::new_v4().to_string(),
        object: "image.generation".to_string(),
        model: model_requested.to_string(),
        created: typed.created,
        choices,
        usage: Usage::default(),
        extra_fields: ExtraFields {
            provider: Provider::OpenAI,
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

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    id: String,
    object: String,
    model: String,
    created: i64,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    index: u32,
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiImageResponse {
    created: i64,
    data: Vec<OpenAiImageDatum>,
}

#[derive(Debug, Deserialize)]
struct OpenAiImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiErrorBody {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<String>,
    param: Option<String>,
}

impl ProviderErrorBody for OpenAiErrorBody {
    fn into_detail(self) -> ErrorDetail {
        ErrorDetail {
            error_type: self.error.error_type,
            code: self.error.code,
            message: self.error.message,
            param: self.error.param,
            underlying: None,
        }
    }
}

pub(crate) fn parse_chat_response(
    provider: Provider,
    model_requested: &str,
    body: &[u8],
    latency: std::time::Duration,
) -> Result<ResponseEnvelope> {
    let decoded = handler::decode_body::<OpenAiChatResponse>(provider, body)?;
    let typed = decoded.typed;

    let choices = typed
        .choices
        .into_iter()
        .map(|c| Choice {
            index: c.index,
            message: Message {
                role: Role::Assistant,
                content: MessageContent::Text(c.message.content.unwrap_or_default()),
                tool_calls: c.message.tool_calls.map(|calls| {
                    calls
                        .into_iter()
                        .map(|call| ToolCall {
                            id: call.id,
                            name: call.function.name,
                            arguments: call.function.arguments,
                        })
                        .collect()
                }),
                tool_call_id: None,
                audio: None,
                reasoning: None,
                finish_reason: c.finish_reason.clone(),
            },
            finish_reason: c.finish_reason,
            stop_string: None,
            log_probs: None,
        })
        .collect();

    let usage = typed.usage.unwrap_or_default();

    Ok(ResponseEnvelope {
        id: typed.id,
        object: typed.object,
        model: typed.model,
        created: typed.created,
        choices,
        usage: Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            audio_tokens: None,
            cached_tokens: None,
            reasoning_tokens: None,
        },
        extra_fields: ExtraFields {
            provider,
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

pub(crate) async fn send_and_handle(
    client: &reqwest::Client,
    provider: Provider,
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
        .map_err(|err| handler::transport_error(provider, err.to_string()))?;

    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|err| handler::transport_error(provider, err.to_string()))?;

    if !status.is_success() {
        return Err(handler::classify_http_error::<OpenAiErrorBody>(
            provider,
            status.as_u16(),
            &bytes,
        ));
    }

    Ok((bytes.to_vec(), started.elapsed()))
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn key(&self) -> Provider {
        Provider::OpenAI
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: true,
            tools: true,
            images: true,
            audio: false,
            image_generation: true,
            embedding: true,
            responses: true,
            count_tokens: false,
        }
    }

    async fn text_completion(
        &self,
        _credential: &Credential,
        _request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        Err(GatewayError::UnsupportedCapability {
            provider: Provider::OpenAI,
            capability: "text_completion",
        })
    }

    async fn chat_completion(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let body = build_chat_body(&request.model, request)?;
        let url = format!("{}/chat/completions", self.base_url);
        let (bytes, latency) = send_and_handle(
            &self.client,
            Provider::OpenAI,
            &url,
            vec![("Authorization", format!("Bearer {}", credential.api_key))],
            &body,
        )
        .await?;
        parse_chat_response(Provider::OpenAI, &request.model, &bytes, latency)
    }

    async fn chat_completion_stream(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<StreamHandle> {
        let mut body = build_chat_body(&request.model, request)?;
        body["stream"] = json!(true);

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", credential.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::OpenAI, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let bytes = response.bytes().await.unwrap_or_default();
            return Err(handler::classify_http_error::<OpenAiErrorBody>(
                Provider::OpenAI,
                status.as_u16(),
                &bytes,
            ));
        }

        let byte_stream = Box::pin(
            response
                .bytes_stream()
                .map(|item| item.map_err(|err| err.to_string())),
        );

        Ok(spawn_sse_reader(byte_stream, 32, cancel, |data| {
            parse_chat_stream_event(data)
        }))
    }

    async fn responses(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        self.chat_completion(credential, request).await
    }

    async fn embedding(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let RequestInput::Embedding { input } = &request.input else {
            return Err(GatewayError::Marshalling {
                provider: Provider::OpenAI,
                message: "embedding called with non-embedding input".to_string(),
            });
        };

        let body = json!({"model": request.model, "input": input});
        let url = format!("{}/embeddings", self.base_url);
        let (bytes, latency) = send_and_handle(
            &self.client,
            Provider::OpenAI,
            &url,
            vec![("Authorization", format!("Bearer {}", credential.api_key))],
            &body,
        )
        .await?;

        let decoded = handler::decode_body::<Value>(Provider::OpenAI, &bytes)?;
        Ok(ResponseEnvelope {
            id: uuid::Uuid::new_v4().to_string(),
            object: "list".to_string(),
            model: request.model.clone(),
            created: chrono::Utc::now().timestamp(),
            choices: Vec::new(),
            usage: Usage::default(),
            extra_fields: ExtraFields {
                provider: Provider::OpenAI,
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

    async fn image_generation(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let body = build_image_body(&request.model, request)?;
        let url = format!("{}/images/generations", self.base_url);
        let (bytes, latency) = send_and_handle(
            &self.client,
            Provider::OpenAI,
            &url,
            vec![("Authorization", format!("Bearer {}", credential.api_key))],
            &body,
        )
        .await?;
        parse_image_response(&request.model, &bytes, latency)
    }

    async fn image_generation_stream(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<StreamHandle> {
        let mut body = build_image_body(&request.model, request)?;
        body["stream"] = json!(true);

        let url = format!("{}/images/generations", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", credential.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::OpenAI, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let bytes = response.bytes().await.unwrap_or_default();
            return Err(handler::classify_http_error::<OpenAiErrorBody>(
                Provider::OpenAI,
                status.as_u16(),
                &bytes,
            ));
        }

        let byte_stream = Box::pin(
            response
                .bytes_stream()
                .map(|item| item.map_err(|err| err.to_string())),
        );

        Ok(spawn_sse_reader(
            byte_stream,
            32,
            cancel,
            parse_image_stream_event,
        ))
    }
}

/// OpenAI's `images/generations` streaming events: a series of
/// `response.image_generation_call.partial_image` frames carrying a partial
/// base64 PNG, closed by a `...completed` frame.
fn parse_image_stream_event(data: &str) -> Vec<StreamElementKind> {
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return Vec::new();
    };
    let event_type = value.get("type").and_then(Value::as_str).unwrap_or("");

    match event_type {
        "response.image_generation_call.partial_image" => {
            vec![StreamElementKind::ImagePartial {
                partial_b64: value
                    .get("partial_image_b64")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
            }]
        }
        "response.image_generation_call.completed" => {
            vec![StreamElementKind::ImageGenerationCompleted {
                final_b64: value
                    .get("b64_json")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }]
        }
        _ => Vec::new(),
    }
}

pub(crate) fn parse_chat_stream_event(data: &str) -> Vec<StreamElementKind> {
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    if let Some(choices) = value.get("choices").and_then(Value::as_array) {
        for choice in choices {
            if let Some(text) = choice
                .get("delta")
                .and_then(|d| d.get("content"))
                .and_then(Value::as_str)
            {
                out.push(StreamElementKind::TextDelta {
                    text: text.to_string(),
                });
            }
            if let Some(tool_calls) = choice
                .get("delta")
                .and_then(|d| d.get("tool_calls"))
                .and_then(Value::as_array)
            {
                for call in tool_calls {
                    let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as u32;
                    let id = call.get("id").and_then(Value::as_str).map(str::to_string);
                    let name = call
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let fragment = call
                        .get("function")
                        .and_then(|f| f.get("arguments"))
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    out.push(StreamElementKind::ToolCallDelta {
                        index,
                        id,
                        name,
                        arguments_fragment: fragment,
                    });
                }
            }
        }
    }
    if let Some(usage) = value.get("usage") {
        if let Ok(usage) = serde_json::from_value::<OpenAiUsage>(usage.clone()) {
            out.push(StreamElementKind::Usage {
                usage: Usage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                    audio_tokens: None,
                    cached_tokens: None,
                    reasoning_tokens: None,
                },
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Message, RequestInput, RequestParams};

    #[test]
    fn build_chat_body_merges_flattened_params_over_base() {
        let mut params = RequestParams::default();
        params.temperature = Some(0.5);
        let request = RequestEnvelope::new(
            Provider::OpenAI,
            "gpt-4",
            RequestInput::ChatCompletion {
                messages: vec![Message::user("hello")],
            },
        )
        .with_params(params);

        let body = build_chat_body("gpt-4", &request).unwrap();
        assert_eq!(body["model"], "gpt-4");
        assert_eq!(body["temperature"], 0.5);
        assert!(body["messages"].is_array());
    }

    #[test]
    fn image_blocks_become_image_url_objects() {
        let messages = vec![Message::new(
            Role::User,
            MessageContent::Blocks(vec![ContentBlock::image_url("https://x/y.png")]),
        )];
        let wire = to_wire_messages(&messages);
        let content = &wire[0]["content"][0];
        assert_eq!(content["type"], "image_url");
        assert_eq!(content["image_url"]["url"], "https://x/y.png");
    }

    #[test]
    fn build_image_body_carries_prompt_and_size() {
        let request = RequestEnvelope::new(
            Provider::OpenAI,
            "gpt-image-1",
            RequestInput::ImageGeneration {
                prompt: "a red bicycle".to_string(),
                size: "1024x1024".to_string(),
            },
        );
        let body = build_image_body("gpt-image-1", &request).unwrap();
        assert_eq!(body["prompt"], "a red bicycle");
        assert_eq!(body["size"], "1024x1024");
    }

    #[test]
    fn parse_image_response_prefers_b64_json_over_url() {
        let body = br#"{"created": 1700000000, "data": [{"b64_json": "Zm9v"}]}"#;
        let response =
            parse_image_response("gpt-image-1", body, std::time::Duration::from_millis(5)).unwrap();
        let MessageContent::Blocks(blocks) = &response.choices[0].message.content else {
            panic!("expected block content");
        };
        assert!(matches!(blocks[0], ContentBlock::Image { .. }));
    }

    #[test]
    fn image_stream_event_parses_partial_and_completed_frames() {
        let partial = parse_image_stream_event(
            r#"{"type": "response.image_generation_call.partial_image", "partial_image_b64": "aaa"}"#,
        );
        assert!(matches!(
            partial.as_slice(),
            [StreamElementKind::ImagePartial { partial_b64 }] if partial_b64 == "aaa"
        ));

        let completed = parse_image_stream_event(
            r#"{"type": "response.image_generation_call.completed", "b64_json": "bbb"}"#,
        );
        assert!(matches!(
            completed.as_slice(),
            [StreamElementKind::ImageGenerationCompleted { final_b64: Some(b) }] if b == "bbb"
        ));
    }
}
