//! AWS Bedrock adapter (§4.D, §4.F).
//!
//! Bedrock has no API key; every request is signed with AWS SigV4
//! ([`crate::transport::sigv4`]). Chat completion hits the unified
//! `/converse` endpoint, whose request/response shape is the same across
//! every model family Bedrock hosts. Text completion hits `/invoke`, whose
//! body layout is chosen by the model ID's family prefix (`anthropic.*` vs
//! `mistral.*`) since that endpoint passes the family's native request
//! shape straight through rather than normalizing it. An inference-profile
//! ARN is URL-escaped into the `{model}` path segment exactly like a plain
//! model ID — SigV4 signs whatever ends up in the path.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{GatewayError, Result};
use crate::handler::{self, ProviderErrorBody};
use crate::schema::{
    Choice, ErrorDetail, ExtraFields, Message, MessageContent, Provider, RequestEnvelope,
    RequestInput, RequestParams, ResponseEnvelope, Role, Usage,
};
use crate::transport::NetworkConfig;
use crate::transport::sigv4::SigV4Signer;

use super::{Capabilities, Credential, ProviderAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelFamily {
    Anthropic,
    Mistral,
}

fn family_of(model_id: &str) -> Result<ModelFamily> {
    let bare = model_id.rsplit('/').next().unwrap_or(model_id);
    if bare.starts_with("anthropic.") || bare.contains(".anthropic.") {
        Ok(ModelFamily::Anthropic)
    } else if bare.starts_with("mistral.") || bare.contains(".mistral.") {
        Ok(ModelFamily::Mistral)
    } else {
        Err(GatewayError::Configuration {
            provider: Provider::Bedrock,
            message: format!("unrecognized Bedrock model family for {model_id}"),
        })
    }
}

pub struct BedrockAdapter {
    client: reqwest::Client,
    region: String,
}

impl BedrockAdapter {
    pub fn new(
        network: &NetworkConfig,
        proxy: &crate::transport::ProxyConfig,
        region: impl Into<String>,
    ) -> Result<Self> {
        let client = crate::transport::build_client(Provider::Bedrock, network, proxy)?;
        Ok(Self {
            client,
            region: region.into(),
        })
    }

    /// A bare model ID becomes `/model/{id}/{invoke,converse}`; an
    /// inference-profile ARN (`arn:aws:bedrock:...:inference-profile/...`)
    /// is percent-escaped into the same path position, since Bedrock's
    /// path-based routing accepts either shape in the `{model}` segment.
    /// Text completion hits `/invoke`; chat completion hits `/converse`.
    fn path_for(&self, model: &str, operation: BedrockOperation) -> String {
        let escaped = url::form_urlencoded::byte_serialize(model.as_bytes()).collect::<String>();
        let suffix = match operation {
            BedrockOperation::Invoke => "invoke",
            BedrockOperation::Converse => "converse",
        };
        format!("/model/{escaped}/{suffix}")
    }

    fn endpoint(&self) -> String {
        format!("https://bedrock-runtime.{}.amazonaws.com", self.region)
    }

    /// Signs `body` with SigV4 and POSTs it to `path`, returning the raw
    /// response bytes, the upstream-reported latency (if present), and the
    /// elapsed wall-clock time. Shared by `text_completion`'s `/invoke` call
    /// and `chat_completion`'s `/converse` call.
    async fn sign_and_send(
        &self,
        credential: &Credential,
        path: &str,
        body: Value,
    ) -> Result<(Vec<u8>, Option<Duration>, Duration)> {
        let body_bytes = serde_json::to_vec(&body).map_err(|err| GatewayError::Marshalling {
            provider: Provider::Bedrock,
            message: err.to_string(),
        })?;

        let url = format!("{}{}", self.endpoint(), path);

        let region = credential
            .extra
            .get("aws_region")
            .cloned()
            .unwrap_or_else(|| self.region.clone());
        let signer = SigV4Signer::new(
            credential.api_key.clone(),
            credential
                .extra
                .get("aws_secret_access_key")
                .cloned()
                .unwrap_or_default(),
            credential.extra.get("aws_session_token").cloned(),
            region,
        );

        let signed = signer
            .sign_request(
                "POST",
                &url,
                &std::collections::BTreeMap::new(),
                &body_bytes,
                chrono::Utc::now(),
            )
            .map_err(|err| GatewayError::Configuration {
                provider: Provider::Bedrock,
                message: format!("failed to sign request: {err}"),
            })?;

        let started = Instant::now();
        let mut builder = self.client.post(&url).body(body_bytes);
        for (name, value) in &signed {
            builder = builder.header(name, value);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::Bedrock, err.to_string()))?;

        let status = response.status();
        let latency_ms_header = response
            .headers()
            .get("x-amzn-bedrock-invocation-latency")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis);

        let bytes = response
            .bytes()
            .await
            .map_err(|err| handler::transport_error(Provider::Bedrock, err.to_string()))?;

        if !status.is_success() {
            return Err(handler::classify_http_error::<BedrockErrorBody>(
                Provider::Bedrock,
                status.as_u16(),
                &bytes,
            ));
        }

        Ok((bytes.to_vec(), latency_ms_header, started.elapsed()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BedrockOperation {
    Invoke,
    Converse,
}

/// Wire body for the `/invoke` endpoint (text completion): the Anthropic
/// Messages API shape, passed straight through.
fn anthropic_invoke_body(messages: &[Message], params: Option<&RequestParams>) -> Result<Value> {
    let mut system_parts = Vec::new();
    let mut wire_messages = Vec::new();
    for message in messages {
        if message.role == Role::System {
            system_parts.push(crate::schema::get_chat_content(message));
            continue;
        }
        let role = match message.role {
            Role::Assistant => "assistant",
            _ => "user",
        };
        let content = match &message.content {
            MessageContent::Text(text) => json!([{"type": "text", "text": text}]),
            MessageContent::Blocks(blocks) => json!(
                blocks
                    .iter()
                    .map(|block| match block {
                        crate::schema::ContentBlock::Text { text } => {
                            json!({"type": "text", "text": text})
                        }
                        crate::schema::ContentBlock::Image { source, .. } => match source {
                            crate::schema::ImageSource::Base64 { data, media_type } => json!({
                                "type": "image",
                                "source": {"type": "base64", "media_type": media_type, "data": data},
                            }),
                            // Bedrock's Anthropic invoke body has no URL-image
                            // shape; the caller's open question #2 resolves
                            // the field name, not this gap.
                            crate::schema::ImageSource::Url { url } => json!({
                                "type": "text",
                                "text": format!("[image: {url}]"),
                            }),
                        },
                        _ => json!({"type": "text", "text": ""}),
                    })
                    .collect::<Vec<_>>()
            ),
        };
        wire_messages.push(json!({"role": role, "content": content}));
    }

    let max_tokens = params.and_then(|p| p.max_tokens).unwrap_or(4096);

    let mut body = json!({
        "anthropic_version": "bedrock-2023-05-31",
        "max_tokens": max_tokens,
        "messages": wire_messages,
    });
    if !system_parts.is_empty() {
        body["system"] = json!(system_parts.join("\n"));
    }
    if let Some(params) = params {
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(t) = params.top_p {
            body["top_p"] = json!(t);
        }
    }
    Ok(body)
}

/// Wire body for the `/invoke` endpoint (text completion): Mistral's own
/// instruction-formatted prompt.
fn mistral_invoke_body(messages: &[Message], params: Option<&RequestParams>) -> Result<Value> {
    let prompt = messages
        .iter()
        .map(|m| format!("[INST] {} [/INST]", crate::schema::get_chat_content(m)))
        .collect::<Vec<_>>()
        .join("\n");

    let max_tokens = params.and_then(|p| p.max_tokens).unwrap_or(512);

    let mut body = json!({
        "prompt": prompt,
        "max_tokens": max_tokens,
    });
    if let Some(params) = params {
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(t) = params.top_p {
            body["top_p"] = json!(t);
        }
    }
    Ok(body)
}

/// Wire body for the `/converse` endpoint (chat completion): Bedrock's
/// unified Converse API, the same request/response shape across every
/// model family the service hosts.
fn converse_body(messages: &[Message], params: Option<&RequestParams>) -> Result<Value> {
    let mut system_parts = Vec::new();
    let mut wire_messages = Vec::new();
    for message in messages {
        if message.role == Role::System {
            system_parts.push(crate::schema::get_chat_content(message));
            continue;
        }
        let role = match message.role {
            Role::Assistant => "assistant",
            _ => "user",
        };
        let content = match &message.content {
            MessageContent::Text(text) => vec![json!({"text": text})],
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block {
                    crate::schema::ContentBlock::Text { text } => json!({"text": text}),
                    crate::schema::ContentBlock::Image { source, .. } => match source {
                        crate::schema::ImageSource::Base64 { data, media_type } => json!({
                            "image": {
                                "format": image_format_from_media_type(media_type),
                                "source": {"bytes": data},
                            },
                        }),
                        crate::schema::ImageSource::Url { url } => json!({
                            "text": format!("[image: {url}]"),
                        }),
                    },
                    _ => json!({"text": ""}),
                })
                .collect::<Vec<_>>(),
        };
        wire_messages.push(json!({"role": role, "content": content}));
    }

    let max_tokens = params.and_then(|p| p.max_tokens).unwrap_or(4096);
    let mut inference_config = json!({"maxTokens": max_tokens});
    if let Some(params) = params {
        if let Some(t) = params.temperature {
            inference_config["temperature"] = json!(t);
        }
        if let Some(t) = params.top_p {
            inference_config["topP"] = json!(t);
        }
    }

    let mut body = json!({
        "messages": wire_messages,
        "inferenceConfig": inference_config,
    });
    if !system_parts.is_empty() {
        body["system"] = json!([{"text": system_parts.join(" ")}]);
    }
    Ok(body)
}

/// Bedrock's Converse API wants a bare image format (`png`, `jpeg`, ...),
/// not a MIME type.
fn image_format_from_media_type(media_type: &str) -> &str {
    media_type.rsplit('/').next().unwrap_or(media_type)
}

#[derive(Debug, Deserialize)]
struct AnthropicInvokeResponse {
    id: String,
    content: Vec<AnthropicInvokeBlock>,
    stop_reason: Option<String>,
    usage: AnthropicInvokeUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicInvokeBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize, Default)]
struct AnthropicInvokeUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MistralInvokeResponse {
    outputs: Vec<MistralOutput>,
}

#[derive(Debug, Deserialize)]
struct MistralOutput {
    text: String,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BedrockErrorBody {
    message: String,
}

impl ProviderErrorBody for BedrockErrorBody {
    fn into_detail(self) -> ErrorDetail {
        ErrorDetail::message(self.message)
    }
}

fn parse_invoke_response(
    family: ModelFamily,
    model_requested: &str,
    body: &[u8],
    latency_ms_header: Option<Duration>,
    latency: Duration,
) -> Result<ResponseEnvelope> {
    let latency = latency_ms_header.unwrap_or(latency);
    match family {
        ModelFamily::Anthropic => {
            let decoded = handler::decode_body::<AnthropicInvokeResponse>(Provider::Bedrock, body)?;
            let typed = decoded.typed;
            let text = typed
                .content
                .into_iter()
                .filter_map(|block| match block {
                    AnthropicInvokeBlock::Text { text } => Some(text),
                    AnthropicInvokeBlock::Other => None,
                })
                .collect::<Vec<_>>()
                .join("");

            Ok(ResponseEnvelope {
                id: typed.id,
                object: "chat.completion".to_string(),
                model: model_requested.to_string(),
                created: chrono::Utc::now().timestamp(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(text),
                    finish_reason: typed.stop_reason.clone(),
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
                    provider: Provider::Bedrock,
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
        ModelFamily::Mistral => {
            let decoded = handler::decode_body::<MistralInvokeResponse>(Provider::Bedrock, body)?;
            let typed = decoded.typed;
            let output = typed.outputs.into_iter().next().ok_or_else(|| GatewayError::Marshalling {
                provider: Provider::Bedrock,
                message: "mistral invoke response had no outputs".to_string(),
            })?;

            Ok(ResponseEnvelope {
                id: uuid::Uuid::new_v4().to_string(),
                object: "chat.completion".to_string(),
                model: model_requested.to_string(),
                created: chrono::Utc::now().timestamp(),
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(output.text),
                    finish_reason: output.stop_reason.clone(),
                    stop_string: None,
                    log_probs: None,
                }],
                usage: Usage::default(),
                extra_fields: ExtraFields {
                    provider: Provider::Bedrock,
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
    }
}

#[derive(Debug, Deserialize)]
struct ConverseResponse {
    output: Option<ConverseOutput>,
    #[serde(rename = "stopReason")]
    stop_reason: Option<String>,
    usage: Option<ConverseUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ConverseOutput {
    Message(ConverseMessage),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ConverseMessage {
    content: Vec<ConverseContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ConverseContentBlock {
    Text(String),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize, Default)]
struct ConverseUsage {
    #[serde(rename = "inputTokens")]
    input_tokens: u32,
    #[serde(rename = "outputTokens")]
    output_tokens: u32,
}

fn parse_converse_response(
    model_requested: &str,
    body: &[u8],
    latency_ms_header: Option<Duration>,
    latency: Duration,
) -> Result<ResponseEnvelope> {
    let latency = latency_ms_header.unwrap_or(latency);
    let decoded = handler::decode_body::<ConverseResponse>(Provider::Bedrock, body)?;
    let typed = decoded.typed;

    let text = match typed.output {
        Some(ConverseOutput::Message(message)) => message
            .content
            .into_iter()
            .filter_map(|block| match block {
                ConverseContentBlock::Text(text) => Some(text),
                ConverseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };

    let usage = typed.usage.unwrap_or_default();

    Ok(ResponseEnvelope {
        id: uuid::Uuid::new_v4().to_string(),
        object: "chat.completion".to_string(),
        model: model_requested.to_string(),
        created: chrono::Utc::now().timestamp(),
        choices: vec![Choice {
            index: 0,
            message: Message::assistant(text),
            finish_reason: typed.stop_reason,
            stop_string: None,
            log_probs: None,
        }],
        usage: Usage {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
            audio_tokens: None,
            cached_tokens: None,
            reasoning_tokens: None,
        },
        extra_fields: ExtraFields {
            provider: Provider::Bedrock,
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

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn key(&self) -> Provider {
        Provider::Bedrock
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: false,
            tools: false,
            images: true,
            audio: false,
            image_generation: false,
            embedding: false,
            responses: false,
            count_tokens: false,
        }
    }

    async fn text_completion(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let prompt = match &request.input {
            RequestInput::TextCompletion { prompt } => prompt.clone(),
            _ => {
                return Err(GatewayError::Marshalling {
                    provider: Provider::Bedrock,
                    message: "bedrock text completion requires a text input".to_string(),
                });
            }
        };

        let family = family_of(&request.model)?;
        let messages = vec![Message::user(prompt)];
        let body = match family {
            ModelFamily::Anthropic => anthropic_invoke_body(&messages, request.params.as_ref())?,
            ModelFamily::Mistral => mistral_invoke_body(&messages, request.params.as_ref())?,
        };

        let path = self.path_for(&request.model, BedrockOperation::Invoke);
        let (bytes, latency_ms_header, elapsed) =
            self.sign_and_send(credential, &path, body).await?;

        parse_invoke_response(family, &request.model, &bytes, latency_ms_header, elapsed)
    }

    async fn chat_completion(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let messages = match &request.input {
            RequestInput::ChatCompletion { messages } => messages,
            _ => {
                return Err(GatewayError::Marshalling {
                    provider: Provider::Bedrock,
                    message: "bedrock chat completion requires a chat input".to_string(),
                });
            }
        };
        let body = converse_body(messages, request.params.as_ref())?;

        let path = self.path_for(&request.model, BedrockOperation::Converse);
        let (bytes, latency_ms_header, elapsed) =
            self.sign_and_send(credential, &path, body).await?;

        parse_converse_response(&request.model, &bytes, latency_ms_header, elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Message;

    #[test]
    fn anthropic_family_detected_from_model_prefix() {
        assert_eq!(
            family_of("anthropic.claude-3-sonnet-20240229-v1:0").unwrap(),
            ModelFamily::Anthropic
        );
    }

    #[test]
    fn mistral_family_detected_from_model_prefix() {
        assert_eq!(
            family_of("mistral.mistral-7b-instruct-v0:2").unwrap(),
            ModelFamily::Mistral
        );
    }

    #[test]
    fn unknown_family_is_configuration_error() {
        let err = family_of("unknown.model-v1").unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[test]
    fn inference_profile_arn_is_escaped_into_the_converse_path() {
        let adapter = BedrockAdapter {
            client: reqwest::Client::new(),
            region: "us-east-1".to_string(),
        };
        let arn = "arn:aws:bedrock:us-east-1:123456789012:inference-profile/my-profile";
        let path = adapter.path_for(arn, BedrockOperation::Converse);
        assert!(path.starts_with("/model/"));
        assert!(!path.contains(':'));
        assert!(path.ends_with("/converse"));
    }

    #[test]
    fn text_completion_path_hits_invoke() {
        let adapter = BedrockAdapter {
            client: reqwest::Client::new(),
            region: "us-east-1".to_string(),
        };
        let path = adapter.path_for("anthropic.claude-3-sonnet-20240229-v1:0", BedrockOperation::Invoke);
        assert!(path.ends_with("/invoke"));
    }

    #[test]
    fn anthropic_invoke_body_lifts_system_messages() {
        let messages = vec![Message::system("be terse"), Message::user("hi")];
        let body = anthropic_invoke_body(&messages, None).unwrap();
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn converse_body_lifts_system_messages_space_joined() {
        let messages = vec![
            Message::system("be terse"),
            Message::system("no emoji"),
            Message::user("hi"),
        ];
        let body = converse_body(&messages, None).unwrap();
        assert_eq!(body["system"][0]["text"], "be terse no emoji");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["inferenceConfig"]["maxTokens"], 4096);
    }
}
