//! ElevenLabs adapter (§4.F, §4.G).
//!
//! Speech synthesis and transcription are plain HTTP calls; its
//! conversational-agent path is a realtime WebSocket the core exposes
//! as-is rather than translating (`conversation_initiation_metadata`
//! handshake, client-side `ping`/`pong`, `agent_response`/`audio` events —
//! none of that is the core's concern per §4.G).

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::handler::{self, ProviderErrorBody};
use crate::schema::{
    Choice, ContentBlock, ErrorDetail, ExtraFields, Message, MessageContent, Provider,
    RequestEnvelope, RequestInput, ResponseEnvelope, Role, Usage,
};
use crate::transport::NetworkConfig;

use super::{Capabilities, Credential, ProviderAdapter, RealtimeCapable, WebSocketCapable};

pub struct ElevenLabsAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl ElevenLabsAdapter {
    pub fn new(
        network: &NetworkConfig,
        proxy: &crate::transport::ProxyConfig,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let client = crate::transport::build_client(
            Provider::ElevenLabs,
            network,
            proxy,
        )?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ElevenLabsErrorBody {
    detail: ElevenLabsErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ElevenLabsErrorDetail {
    Message(String),
    Structured { message: String },
}

impl ProviderErrorBody for ElevenLabsErrorBody {
    fn into_detail(self) -> ErrorDetail {
        let message = match self.detail {
            ElevenLabsErrorDetail::Message(m) => m,
            ElevenLabsErrorDetail::Structured { message } => message,
        };
        ErrorDetail::message(message)
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl ProviderAdapter for ElevenLabsAdapter {
    fn key(&self) -> Provider {
        Provider::ElevenLabs
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: false,
            tools: false,
            images: false,
            audio: true,
            image_generation: false,
            embedding: false,
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
            provider: Provider::ElevenLabs,
            capability: "text_completion",
        })
    }

    async fn chat_completion(
        &self,
        _credential: &Credential,
        _request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        Err(GatewayError::UnsupportedCapability {
            provider: Provider::ElevenLabs,
            capability: "chat_completion",
        })
    }

    async fn speech(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let RequestInput::Speech { text, voice, format } = &request.input else {
            return Err(GatewayError::Marshalling {
                provider: Provider::ElevenLabs,
                message: "speech called with non-speech input".to_string(),
            });
        };

        let url = format!(
            "{}/v1/text-to-speech/{}?output_format={}",
            self.base_url, voice, format
        );
        let body = serde_json::json!({
            "text": text,
            "model_id": request.model,
        });

        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &credential.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::ElevenLabs, err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| handler::transport_error(Provider::ElevenLabs, err.to_string()))?;

        if !status.is_success() {
            return Err(handler::classify_http_error::<ElevenLabsErrorBody>(
                Provider::ElevenLabs,
                status.as_u16(),
                &bytes,
            ));
        }

        use base64::Engine;
        let audio_base64 = base64::engine::general_purpose::STANDARD.encode(bytes.as_ref());

        Ok(ResponseEnvelope {
            id: uuid::Uuid::new_v4().to_string(),
            object: "audio.speech".to_string(),
            model: request.model.clone(),
            created: chrono::Utc::now().timestamp(),
            choices: vec![Choice {
                index: 0,
                message: Message {
                    role: Role::Assistant,
                    content: MessageContent::Blocks(vec![ContentBlock::Audio {
                        audio: crate::schema::AudioData {
                            data: audio_base64,
                            format: format.clone(),
                        },
                    }]),
                    tool_calls: None,
                    tool_call_id: None,
                    audio: None,
                    reasoning: None,
                    finish_reason: None,
                },
                finish_reason: None,
                stop_string: None,
                log_probs: None,
            }],
            usage: Usage::default(),
            extra_fields: ExtraFields {
                provider: Provider::ElevenLabs,
                model_requested: request.model.clone(),
                latency: started.elapsed(),
                raw_response: Value::Null,
                billed_usage: None,
                cache_debug: None,
                chat_history: None,
                request_id: uuid::Uuid::new_v4(),
            },
        })
    }

    async fn transcription(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let RequestInput::Transcription { audio_base64, format } = &request.input else {
            return Err(GatewayError::Marshalling {
                provider: Provider::ElevenLabs,
                message: "transcription called with non-transcription input".to_string(),
            });
        };

        use base64::Engine;
        let audio_bytes = base64::engine::general_purpose::STANDARD
            .decode(audio_base64.as_bytes())
            .map_err(|err| GatewayError::Marshalling {
                provider: Provider::ElevenLabs,
                message: format!("invalid base64 audio: {err}"),
            })?;

        let part = reqwest::multipart::Part::bytes(audio_bytes)
            .file_name(format!("audio.{format}"))
            .mime_str(&format!("audio/{format}"))
            .map_err(|err| GatewayError::Marshalling {
                provider: Provider::ElevenLabs,
                message: err.to_string(),
            })?;
        let form = reqwest::multipart::Form::new()
            .text("model_id", request.model.clone())
            .part("file", part);

        let url = format!("{}/v1/speech-to-text", self.base_url);
        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &credential.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::ElevenLabs, err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| handler::transport_error(Provider::ElevenLabs, err.to_string()))?;

        if !status.is_success() {
            return Err(handler::classify_http_error::<ElevenLabsErrorBody>(
                Provider::ElevenLabs,
                status.as_u16(),
                &bytes,
            ));
        }

        let decoded = handler::decode_body::<TranscriptionResponse>(Provider::ElevenLabs, &bytes)?;

        Ok(ResponseEnvelope {
            id: uuid::Uuid::new_v4().to_string(),
            object: "audio.transcription".to_string(),
            model: request.model.clone(),
            created: chrono::Utc::now().timestamp(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(decoded.typed.text),
                finish_reason: None,
                stop_string: None,
                log_probs: None,
            }],
            usage: Usage::default(),
            extra_fields: ExtraFields {
                provider: Provider::ElevenLabs,
                model_requested: request.model.clone(),
                latency: started.elapsed(),
                raw_response: decoded.raw,
                billed_usage: None,
                cache_debug: None,
                chat_history: None,
                request_id: uuid::Uuid::new_v4(),
            },
        })
    }

    fn websocket(&self) -> Option<&dyn WebSocketCapable> {
        Some(self)
    }

    fn realtime(&self) -> Option<&dyn RealtimeCapable> {
        Some(self)
    }
}

impl WebSocketCapable for ElevenLabsAdapter {
    fn websocket_url(&self, credential: &Credential) -> Result<String> {
        let agent_id = credential.extra.get("agent_id").ok_or_else(|| {
            GatewayError::Configuration {
                provider: Provider::ElevenLabs,
                message: "no agent_id configured for conversational WebSocket".to_string(),
            }
        })?;
        Ok(format!(
            "wss://api.elevenlabs.io/v1/convai/conversation?agent_id={agent_id}"
        ))
    }

    fn websocket_headers(&self, credential: &Credential) -> Result<Vec<(String, String)>> {
        Ok(vec![("xi-api-key".to_string(), credential.api_key.clone())])
    }
}

impl RealtimeCapable for ElevenLabsAdapter {
    fn realtime_url(&self, credential: &Credential, _model: &str) -> Result<String> {
        self.websocket_url(credential)
    }

    fn realtime_headers(&self, credential: &Credential) -> Result<Vec<(String, String)>> {
        self.websocket_headers(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_requires_agent_id() {
        let adapter = ElevenLabsAdapter {
            client: reqwest::Client::new(),
            base_url: "https://api.elevenlabs.io".to_string(),
        };
        let credential = Credential {
            api_key: "key".to_string(),
            extra: Default::default(),
        };
        assert!(adapter.websocket_url(&credential).is_err());
    }

    #[test]
    fn websocket_url_embeds_agent_id_when_configured() {
        let adapter = ElevenLabsAdapter {
            client: reqwest::Client::new(),
            base_url: "https://api.elevenlabs.io".to_string(),
        };
        let mut extra = std::collections::BTreeMap::new();
        extra.insert("agent_id".to_string(), "abc123".to_string());
        let credential = Credential {
            api_key: "key".to_string(),
            extra,
        };
        let url = adapter.websocket_url(&credential).unwrap();
        assert!(url.contains("agent_id=abc123"));
    }
}
