//! The provider-abstraction contract (§4.F) and capability interfaces
//! (§4.I).

mod anthropic;
mod azure;
mod bedrock;
mod cohere;
mod elevenlabs;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use azure::AzureAdapter;
pub use bedrock::BedrockAdapter;
pub use cohere::CohereAdapter;
pub use elevenlabs::ElevenLabsAdapter;
pub use openai::OpenAiAdapter;

use async_trait::async_trait;

use crate::error::{GatewayError, Result};
use crate::schema::{Provider, RequestEnvelope, ResponseEnvelope};
use crate::streaming::{CancellationToken, StreamHandle};

/// A credential resolved for one provider/model pair. Adapters never read
/// credentials from anywhere but this — no hidden environment lookups.
#[derive(Debug, Clone)]
pub struct Credential {
    pub api_key: String,
    pub extra: std::collections::BTreeMap<String, String>,
}

/// Which optional operations an adapter implements. Checked by the
/// dispatcher *before* calling the adapter, so an unsupported capability
/// fails fast as a tagged-variant check rather than a caught exception
/// (§4.I, §9).
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub streaming: bool,
    pub tools: bool,
    pub images: bool,
    pub audio: bool,
    pub image_generation: bool,
    pub embedding: bool,
    pub responses: bool,
    pub count_tokens: bool,
}

fn capability_error(provider: Provider, capability: &'static str) -> GatewayError {
    GatewayError::UnsupportedCapability {
        provider,
        capability,
    }
}

/// The contract every provider adapter implements (§4.F).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn key(&self) -> Provider;
    fn capabilities(&self) -> Capabilities;

    /// May legitimately return an unsupported-capability error: some
    /// providers (OpenAI's current chat-first API surface) have no legacy
    /// text-completion endpoint at all.
    async fn text_completion(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope>;

    async fn chat_completion(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope>;

    async fn responses(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let _ = (credential, request);
        Err(capability_error(self.key(), "responses"))
    }

    async fn embedding(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let _ = (credential, request);
        Err(capability_error(self.key(), "embedding"))
    }

    async fn speech(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let _ = (credential, request);
        Err(capability_error(self.key(), "speech"))
    }

    async fn transcription(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let _ = (credential, request);
        Err(capability_error(self.key(), "transcription"))
    }

    async fn image_generation(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let _ = (credential, request);
        Err(capability_error(self.key(), "image_generation"))
    }

    async fn count_tokens(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let _ = (credential, request);
        Err(capability_error(self.key(), "count_tokens"))
    }

    async fn chat_completion_stream(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<StreamHandle> {
        let _ = (credential, request, cancel);
        Err(capability_error(self.key(), "chat_completion_stream"))
    }

    async fn image_generation_stream(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<StreamHandle> {
        let _ = (credential, request, cancel);
        Err(capability_error(self.key(), "image_generation_stream"))
    }

    async fn transcription_stream(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<StreamHandle> {
        let _ = (credential, request, cancel);
        Err(capability_error(self.key(), "transcription_stream"))
    }

    /// `Some` only for adapters that can hand the caller a raw WebSocket.
    fn websocket(&self) -> Option<&dyn WebSocketCapable> {
        None
    }

    /// `Some` only for adapters exposing a realtime (bidirectional) path.
    fn realtime(&self) -> Option<&dyn RealtimeCapable> {
        None
    }
}

/// A provider-hosted WebSocket endpoint the caller dials directly. The core
/// guarantees transport lifetime and header correctness but never
/// translates the exchanged events (§4.G).
pub trait WebSocketCapable: Send + Sync {
    fn websocket_url(&self, credential: &Credential) -> Result<String>;
    fn websocket_headers(&self, credential: &Credential) -> Result<Vec<(String, String)>>;
}

/// A realtime variant of [`WebSocketCapable`], parameterized by the model
/// in addition to the credential.
pub trait RealtimeCapable: Send + Sync {
    fn realtime_url(&self, credential: &Credential, model: &str) -> Result<String>;
    fn realtime_headers(&self, credential: &Credential) -> Result<Vec<(String, String)>>;
}
