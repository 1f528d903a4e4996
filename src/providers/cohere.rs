//! Cohere adapter (§4.F).
//!
//! Cohere's chat wire shape takes the latest turn as a standalone `message`
//! field and every prior turn as `chat_history` (`USER`/`CHATBOT` roles),
//! not a flat message array. Tools are declared via `parameter_definitions`
//! rather than a JSON-schema `parameters` object. Usage is reported as a
//! billed/actual split, both of which are preserved (billed in
//! `ExtraFields.BilledUsage`, actual in `Usage`).

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{GatewayError, Result};
use crate::handler::{self, ProviderErrorBody};
use crate::schema::{
    BilledUsage, Choice, ErrorDetail, ExtraFields, Message, MessageContent, Provider,
    RequestEnvelope, RequestInput, ResponseEnvelope, Role, Tool, ToolCall, Usage,
};
use crate::transport::NetworkConfig;

use super::{Capabilities, Credential, ProviderAdapter};

pub struct CohereAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl CohereAdapter {
    pub fn new(
        network: &NetworkConfig,
        proxy: &crate::transport::ProxyConfig,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = crate::transport::build_client(
            Provider::Cohere,
            network,
            proxy,
        )?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

fn cohere_role(role: Role) -> &'static str {
    match role {
        Role::Assistant | Role::Chatbot => "CHATBOT",
        Role::Tool => "TOOL",
        _ => "USER",
    }
}

fn tool_to_wire(tool: &Tool) -> Value {
    let parameter_definitions: serde_json::Map<String, Value> = tool
        .parameters
        .properties
        .iter()
        .map(|(name, descriptor)| {
            let mut def = descriptor.clone();
            if let Some(obj) = def.as_object_mut() {
                obj.insert(
                    "required".to_string(),
                    json!(tool.parameters.required.contains(name)),
                );
            }
            (name.clone(), def)
        })
        .collect();

    json!({
        "name": tool.name,
        "description": tool.description.clone().unwrap_or_default(),
        "parameter_definitions": parameter_definitions,
    })
}

/// Splits `messages` into the standalone latest turn plus everything before
/// it as `chat_history`, and lifts any system message out as `preamble`.
fn build_chat_body(model: &str, request: &RequestEnvelope) -> Result<Value> {
    let messages = match &request.input {
        RequestInput::ChatCompletion { messages } => messages,
        _ => {
            return Err(GatewayError::Marshalling {
                provider: Provider::Cohere,
                message: "chat_completion called with non-chat input".to_string(),
            });
        }
    };

    let mut preamble = None;
    let mut turns = Vec::new();
    for message in messages {
        if message.role == Role::System {
            preamble = Some(crate::schema::get_chat_content(message));
        } else {
            turns.push(message);
        }
    }

    let Some((latest, history)) = turns.split_last() else {
        return Err(GatewayError::Marshalling {
            provider: Provider::Cohere,
            message: "chat_completion requires at least one non-system message".to_string(),
        });
    };

    let chat_history: Vec<Value> = history
        .iter()
        .map(|m| {
            json!({
                "role": cohere_role(m.role),
                "message": crate::schema::get_chat_content(m),
            })
        })
        .collect();

    let max_tokens = request
        .params
        .as_ref()
        .and_then(|p| p.max_tokens)
        .unwrap_or(4096);

    let mut body = json!({
        "model": model,
        "message": crate::schema::get_chat_content(latest),
        "max_tokens": max_tokens,
    });
    if !chat_history.is_empty() {
        body["chat_history"] = json!(chat_history);
    }
    if let Some(preamble) = preamble {
        body["preamble"] = json!(preamble);
    }

    if let Some(params) = &request.params {
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = params.top_p {
            body["p"] = json!(p);
        }
        if let Some(stop) = &params.stop {
            body["stop_sequences"] = json!(stop);
        }
        if let Some(tools) = &params.tools {
            body["tools"] = json!(tools.iter().map(tool_to_wire).collect::<Vec<_>>());
        }
    }

    Ok(body)
}

#[derive(Debug, Deserialize)]
struct CohereChatResponse {
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    chat_history: Vec<CohereHistoryTurn>,
    #[serde(default)]
    tool_calls: Vec<CohereToolCall>,
    #[serde(default)]
    meta: Option<CohereMeta>,
}

#[derive(Debug, Deserialize)]
struct CohereHistoryTurn {
    role: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct CohereToolCall {
    name: String,
    #[serde(default)]
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct CohereMeta {
    #[serde(default)]
    billed_units: Option<CohereBilledUnits>,
    #[serde(default)]
    tokens: Option<CohereTokens>,
}

#[derive(Debug, Deserialize, Default)]
struct CohereBilledUnits {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize, Default)]
struct CohereTokens {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CohereErrorBody {
    message: String,
}

impl ProviderErrorBody for CohereErrorBody {
    fn into_detail(self) -> ErrorDetail {
        ErrorDetail::message(self.message)
    }
}

fn parse_chat_response(
    model_requested: &str,
    body: &[u8],
    latency: std::time::Duration,
) -> Result<ResponseEnvelope> {
    let decoded = handler::decode_body::<CohereChatResponse>(Provider::Cohere, body)?;
    let typed = decoded.typed;

    let chat_history: Vec<Message> = typed
        .chat_history
        .iter()
        .map(|turn| {
            let role = match turn.role.as_str() {
                "CHATBOT" => Role::Assistant,
                "TOOL" => Role::Tool,
                _ => Role::User,
            };
            Message::new(role, MessageContent::Text(turn.message.clone()))
        })
        .collect();

    let (usage, billed_usage) = match typed.meta {
        Some(meta) => {
            let tokens = meta.tokens.unwrap_or_default();
            let billed = meta.billed_units.unwrap_or_default();
            (
                Usage {
                    prompt_tokens: tokens.input_tokens,
                    completion_tokens: tokens.output_tokens,
                    total_tokens: tokens.input_tokens + tokens.output_tokens,
                    audio_tokens: None,
                    cached_tokens: None,
                    reasoning_tokens: None,
                },
                Some(BilledUsage {
                    billed_prompt_tokens: billed.input_tokens,
                    billed_completion_tokens: billed.output_tokens,
                }),
            )
        }
        None => (Usage::default(), None),
    };

    // When chat_history is returned, the assistant turn it carries is the
    // authoritative text; typed.text otherwise.
    let text = match typed.chat_history.last() {
        Some(turn) => turn.message.clone(),
        None => typed.text,
    };

    let tool_calls: Vec<ToolCall> = typed
        .tool_calls
        .iter()
        .map(|call| ToolCall::from_parsed(uuid::Uuid::new_v4().to_string(), &call.name, &call.parameters))
        .collect();
    let mut message = Message::assistant(text);
    if !tool_calls.is_empty() {
        message.tool_calls = Some(tool_calls);
    }

    Ok(ResponseEnvelope {
        id: uuid::Uuid::new_v4().to_string(),
        object: "chat.completion".to_string(),
        model: model_requested.to_string(),
        created: chrono::Utc::now().timestamp(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: typed.finish_reason.clone(),
            stop_string: None,
            log_probs: None,
        }],
        usage,
        extra_fields: ExtraFields {
            provider: Provider::Cohere,
            model_requested: model_requested.to_string(),
            latency,
            raw_response: decoded.raw,
            billed_usage,
            cache_debug: None,
            chat_history: if chat_history.is_empty() {
                None
            } else {
                Some(chat_history)
            },
            request_id: uuid::Uuid::new_v4(),
        },
    })
}

#[async_trait]
impl ProviderAdapter for CohereAdapter {
    fn key(&self) -> Provider {
        Provider::Cohere
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: false,
            tools: true,
            images: false,
            audio: false,
            image_generation: false,
            embedding: true,
            responses: false,
            count_tokens: false,
        }
    }

    async fn text_completion(
        &self,
        _credential: &Credential,
        _request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        Err(GatewayError::UnsupportedCapability {
            provider: Provider::Cohere,
            capability: "text_completion",
        })
    }

    async fn chat_completion(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let body = build_chat_body(&request.model, request)?;
        let url = format!("{}/v1/chat", self.base_url);

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", credential.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::Cohere, err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| handler::transport_error(Provider::Cohere, err.to_string()))?;

        if !status.is_success() {
            return Err(handler::classify_http_error::<CohereErrorBody>(
                Provider::Cohere,
                status.as_u16(),
                &bytes,
            ));
        }

        parse_chat_response(&request.model, &bytes, started.elapsed())
    }

    async fn embedding(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let RequestInput::Embedding { input } = &request.input else {
            return Err(GatewayError::Marshalling {
                provider: Provider::Cohere,
                message: "embedding called with non-embedding input".to_string(),
            });
        };

        let url = format!("{}/v1/embed", self.base_url);
        let body = json!({"model": request.model, "texts": input, "input_type": "search_document"});

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", credential.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::Cohere, err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| handler::transport_error(Provider::Cohere, err.to_string()))?;
        if !status.is_success() {
            return Err(handler::classify_http_error::<CohereErrorBody>(
                Provider::Cohere,
                status.as_u16(),
                &bytes,
            ));
        }

        let decoded = handler::decode_body::<Value>(Provider::Cohere, &bytes)?;
        Ok(ResponseEnvelope {
            id: uuid::Uuid::new_v4().to_string(),
            object: "embedding".to_string(),
            model: request.model.clone(),
            created: chrono::Utc::now().timestamp(),
            choices: Vec::new(),
            usage: Usage::default(),
            extra_fields: ExtraFields {
                provider: Provider::Cohere,
                model_requested: request.model.clone(),
                latency: std::time::Duration::default(),
                raw_response: decoded.raw,
                billed_usage: None,
                cache_debug: None,
                chat_history: None,
                request_id: uuid::Uuid::new_v4(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Message;

    #[test]
    fn latest_turn_is_split_from_history() {
        let request = RequestEnvelope::new(
            Provider::Cohere,
            "command-r",
            RequestInput::ChatCompletion {
                messages: vec![
                    Message::user("first"),
                    Message::assistant("reply"),
                    Message::user("second"),
                ],
            },
        );
        let body = build_chat_body("command-r", &request).unwrap();
        assert_eq!(body["message"], "second");
        assert_eq!(body["chat_history"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn system_message_becomes_preamble() {
        let request = RequestEnvelope::new(
            Provider::Cohere,
            "command-r",
            RequestInput::ChatCompletion {
                messages: vec![Message::system("be terse"), Message::user("hi")],
            },
        );
        let body = build_chat_body("command-r", &request).unwrap();
        assert_eq!(body["preamble"], "be terse");
        assert!(body["chat_history"].as_array().is_none());
    }

    #[test]
    fn assistant_text_prefers_last_chat_history_entry_over_top_level_text() {
        let body = json!({
            "text": "stale top-level text",
            "chat_history": [
                {"role": "USER", "message": "hi"},
                {"role": "CHATBOT", "message": "fresh reply"},
            ],
        });
        let response =
            parse_chat_response("command-r", body.to_string().as_bytes(), Default::default())
                .unwrap();
        assert_eq!(
            response.choices[0].message.content,
            MessageContent::Text("fresh reply".to_string())
        );
    }

    #[test]
    fn assistant_text_falls_back_to_top_level_text_when_history_empty() {
        let body = json!({"text": "only answer"});
        let response =
            parse_chat_response("command-r", body.to_string().as_bytes(), Default::default())
                .unwrap();
        assert_eq!(
            response.choices[0].message.content,
            MessageContent::Text("only answer".to_string())
        );
    }

    #[test]
    fn tool_calls_are_mapped_from_the_response() {
        let body = json!({
            "text": "",
            "tool_calls": [
                {"name": "get_weather", "parameters": {"city": "Paris"}},
            ],
        });
        let response =
            parse_chat_response("command-r", body.to_string().as_bytes(), Default::default())
                .unwrap();
        let tool_calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "get_weather");
        assert_eq!(
            tool_calls[0].parsed_arguments().unwrap()["city"],
            "Paris"
        );
    }
}
