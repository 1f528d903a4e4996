//! Request dispatch and the fallback walk (§4.H).
//!
//! `Bifrost` is the single entry point a caller holds: it resolves a
//! provider adapter, gates admission through a per-provider semaphore, and
//! retries across the request's declared fallback chain on failure. Nothing
//! here talks HTTP directly; that is every adapter's job.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::providers::{
    AnthropicAdapter, AzureAdapter, BedrockAdapter, CohereAdapter, Credential, ElevenLabsAdapter,
    OpenAiAdapter, ProviderAdapter, RealtimeCapable, WebSocketCapable,
};
use crate::schema::{Provider, RequestEnvelope, ResponseEnvelope};
use crate::streaming::{CancellationToken, StreamHandle};

type ResponseFuture<'a> = Pin<Box<dyn Future<Output = Result<ResponseEnvelope>> + Send + 'a>>;
type StreamFuture<'a> = Pin<Box<dyn Future<Output = Result<StreamHandle>> + Send + 'a>>;

/// A pointer to one `ProviderAdapter` method, used so the fallback walk can
/// be written once and shared by every request kind instead of duplicated
/// per operation.
type ResponseOp =
    for<'a> fn(&'a dyn ProviderAdapter, &'a Credential, &'a RequestEnvelope) -> ResponseFuture<'a>;
type StreamOp = for<'a> fn(
    &'a dyn ProviderAdapter,
    &'a Credential,
    &'a RequestEnvelope,
    CancellationToken,
) -> StreamFuture<'a>;

fn op_text_completion<'a>(
    adapter: &'a dyn ProviderAdapter,
    credential: &'a Credential,
    request: &'a RequestEnvelope,
) -> ResponseFuture<'a> {
    adapter.text_completion(credential, request)
}

fn op_chat_completion<'a>(
    adapter: &'a dyn ProviderAdapter,
    credential: &'a Credential,
    request: &'a RequestEnvelope,
) -> ResponseFuture<'a> {
    adapter.chat_completion(credential, request)
}

fn op_responses<'a>(
    adapter: &'a dyn ProviderAdapter,
    credential: &'a Credential,
    request: &'a RequestEnvelope,
) -> ResponseFuture<'a> {
    adapter.responses(credential, request)
}

fn op_embedding<'a>(
    adapter: &'a dyn ProviderAdapter,
    credential: &'a Credential,
    request: &'a RequestEnvelope,
) -> ResponseFuture<'a> {
    adapter.embedding(credential, request)
}

fn op_speech<'a>(
    adapter: &'a dyn ProviderAdapter,
    credential: &'a Credential,
    request: &'a RequestEnvelope,
) -> ResponseFuture<'a> {
    adapter.speech(credential, request)
}

fn op_transcription<'a>(
    adapter: &'a dyn ProviderAdapter,
    credential: &'a Credential,
    request: &'a RequestEnvelope,
) -> ResponseFuture<'a> {
    adapter.transcription(credential, request)
}

fn op_image_generation<'a>(
    adapter: &'a dyn ProviderAdapter,
    credential: &'a Credential,
    request: &'a RequestEnvelope,
) -> ResponseFuture<'a> {
    adapter.image_generation(credential, request)
}

fn op_count_tokens<'a>(
    adapter: &'a dyn ProviderAdapter,
    credential: &'a Credential,
    request: &'a RequestEnvelope,
) -> ResponseFuture<'a> {
    adapter.count_tokens(credential, request)
}

fn stream_op_chat_completion<'a>(
    adapter: &'a dyn ProviderAdapter,
    credential: &'a Credential,
    request: &'a RequestEnvelope,
    cancel: CancellationToken,
) -> StreamFuture<'a> {
    adapter.chat_completion_stream(credential, request, cancel)
}

fn stream_op_image_generation<'a>(
    adapter: &'a dyn ProviderAdapter,
    credential: &'a Credential,
    request: &'a RequestEnvelope,
    cancel: CancellationToken,
) -> StreamFuture<'a> {
    adapter.image_generation_stream(credential, request, cancel)
}

fn stream_op_transcription<'a>(
    adapter: &'a dyn ProviderAdapter,
    credential: &'a Credential,
    request: &'a RequestEnvelope,
    cancel: CancellationToken,
) -> StreamFuture<'a> {
    adapter.transcription_stream(credential, request, cancel)
}

/// The gateway handle. Cheap to clone (everything inside is `Arc`-backed);
/// callers are expected to build one at startup and share it.
pub struct Bifrost {
    adapters: BTreeMap<Provider, Arc<dyn ProviderAdapter>>,
    config: GatewayConfig,
    semaphores: BTreeMap<Provider, Arc<Semaphore>>,
}

impl Bifrost {
    /// Builds one adapter per configured credential. A provider with no
    /// credential entry simply has no adapter and every call to it fails
    /// with `UnknownProvider` — not a construction-time error, since a
    /// caller may legitimately configure only the providers it uses.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let mut adapters: BTreeMap<Provider, Arc<dyn ProviderAdapter>> = BTreeMap::new();
        let mut semaphores = BTreeMap::new();

        for provider in config.credentials.keys().copied().collect::<Vec<_>>() {
            let meta = config.meta.get(&provider).cloned().unwrap_or_default();
            let adapter: Arc<dyn ProviderAdapter> = match provider {
                Provider::OpenAI => Arc::new(OpenAiAdapter::new(
                    &config.network,
                    &config.proxy,
                    meta.base_url
                        .unwrap_or_else(|| "https://api.openai.com".to_string()),
                )?),
                Provider::Anthropic => Arc::new(AnthropicAdapter::new(
                    &config.network,
                    &config.proxy,
                    meta.base_url
                        .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
                )?),
                Provider::Cohere => Arc::new(CohereAdapter::new(
                    &config.network,
                    &config.proxy,
                    meta.base_url
                        .unwrap_or_else(|| "https://api.cohere.ai".to_string()),
                )?),
                Provider::ElevenLabs => Arc::new(ElevenLabsAdapter::new(
                    &config.network,
                    &config.proxy,
                    meta.base_url
                        .unwrap_or_else(|| "https://api.elevenlabs.io".to_string()),
                )?),
                Provider::Azure => {
                    let endpoint = meta.azure_endpoint.ok_or_else(|| GatewayError::Configuration {
                        provider,
                        message: "azure provider requires meta.azure_endpoint".to_string(),
                    })?;
                    let api_version = meta
                        .azure_api_version
                        .unwrap_or_else(|| "2024-02-01".to_string());
                    Arc::new(AzureAdapter::new(
                        &config.network,
                        &config.proxy,
                        endpoint,
                        api_version,
                        meta.azure_deployments,
                    )?)
                }
                Provider::Bedrock => {
                    let region = meta.aws_region.unwrap_or_else(|| "us-east-1".to_string());
                    Arc::new(BedrockAdapter::new(&config.network, &config.proxy, region)?)
                }
            };

            let concurrency = config.concurrency_for(provider).concurrency.max(1);
            semaphores.insert(provider, Arc::new(Semaphore::new(concurrency)));
            adapters.insert(provider, adapter);
            info!(%provider, "registered provider adapter");
        }

        Ok(Self {
            adapters,
            config,
            semaphores,
        })
    }

    pub fn provider_by_key(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    /// Resolves the credential to use for `provider`. `model` is accepted
    /// for parity with model-scoped key selection policies but is unused:
    /// `GatewayConfig` keys credentials by provider alone, so every model
    /// hosted by a given provider shares one credential (see DESIGN.md's
    /// Open Question decisions).
    pub fn select_key_for_provider(&self, provider: Provider, model: &str) -> Result<Credential> {
        let _ = model;
        self.config.credential(provider)
    }

    /// Acquires one admission slot for `provider`, honoring `cancel`. A
    /// cancelled wait never starts the call and never triggers fallback —
    /// both are surfaced as `GatewayError::Cancelled`.
    async fn acquire(
        &self,
        provider: Provider,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::OwnedSemaphorePermit> {
        let semaphore = self
            .semaphores
            .get(&provider)
            .cloned()
            .ok_or(GatewayError::UnknownProvider(provider))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            permit = semaphore.acquire_owned() => {
                permit.map_err(|_| GatewayError::Configuration {
                    provider,
                    message: "admission semaphore closed".to_string(),
                })
            }
        }
    }

    /// The §4.H dispatch algorithm for every non-streaming operation:
    /// resolve adapter, resolve credential, gate admission, invoke, and on
    /// failure walk `request.fallbacks` in order. Cancellation never
    /// triggers fallback; at most `1 + fallbacks.len()` providers are tried.
    async fn dispatch(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
        op: ResponseOp,
    ) -> Result<ResponseEnvelope> {
        let original_model = request.model.clone();
        let mut attempt = request.clone();
        let mut fallback_queue = attempt.fallbacks.clone();

        loop {
            let outcome = self.try_once(&attempt, &original_model, &cancel, op).await;
            match outcome {
                Ok(response) => return Ok(response),
                Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(err) => {
                    if fallback_queue.is_empty() {
                        return Err(err);
                    }
                    let target = fallback_queue.remove(0);
                    warn!(
                        provider = %attempt.provider,
                        model = %attempt.model,
                        fallback_provider = %target.provider,
                        fallback_model = %target.model,
                        error = %err,
                        "request failed, walking fallback chain"
                    );
                    attempt = attempt.rewritten_for_fallback(&target);
                }
            }
        }
    }

    async fn try_once(
        &self,
        request: &RequestEnvelope,
        original_model: &str,
        cancel: &CancellationToken,
        op: ResponseOp,
    ) -> Result<ResponseEnvelope> {
        let adapter = self
            .provider_by_key(request.provider)
            .ok_or(GatewayError::UnknownProvider(request.provider))?;
        let credential = self.select_key_for_provider(request.provider, &request.model)?;
        let _permit = self.acquire(request.provider, cancel).await?;

        let started = Instant::now();
        let mut response = op(adapter.as_ref(), &credential, request).await?;

        if response.extra_fields.latency.is_zero() {
            response.extra_fields.latency = started.elapsed();
        }
        response.extra_fields.model_requested = original_model.to_string();
        Ok(response)
    }

    async fn dispatch_stream(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
        op: StreamOp,
    ) -> Result<StreamHandle> {
        let mut attempt = request.clone();
        let mut fallback_queue = attempt.fallbacks.clone();

        loop {
            let adapter = self
                .provider_by_key(attempt.provider)
                .ok_or(GatewayError::UnknownProvider(attempt.provider));
            let outcome = match adapter {
                Err(err) => Err(err),
                Ok(adapter) => match self.select_key_for_provider(attempt.provider, &attempt.model) {
                    Err(err) => Err(err),
                    Ok(credential) => match self.acquire(attempt.provider, &cancel).await {
                        Err(err) => Err(err),
                        Ok(_permit) => {
                            op(adapter.as_ref(), &credential, &attempt, cancel.clone()).await
                        }
                    },
                },
            };

            match outcome {
                Ok(handle) => return Ok(handle),
                Err(GatewayError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(err) => {
                    if fallback_queue.is_empty() {
                        return Err(err);
                    }
                    let target = fallback_queue.remove(0);
                    warn!(
                        provider = %attempt.provider,
                        fallback_provider = %target.provider,
                        error = %err,
                        "stream handshake failed, walking fallback chain"
                    );
                    attempt = attempt.rewritten_for_fallback(&target);
                }
            }
        }
    }

    pub async fn text_completion(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<ResponseEnvelope> {
        self.dispatch(request, cancel, op_text_completion).await
    }

    pub async fn chat_completion(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<ResponseEnvelope> {
        self.dispatch(request, cancel, op_chat_completion).await
    }

    pub async fn responses(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<ResponseEnvelope> {
        self.dispatch(request, cancel, op_responses).await
    }

    pub async fn embedding(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<ResponseEnvelope> {
        self.dispatch(request, cancel, op_embedding).await
    }

    pub async fn speech(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<ResponseEnvelope> {
        self.dispatch(request, cancel, op_speech).await
    }

    pub async fn transcription(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<ResponseEnvelope> {
        self.dispatch(request, cancel, op_transcription).await
    }

    pub async fn image_generation(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<ResponseEnvelope> {
        self.dispatch(request, cancel, op_image_generation).await
    }

    pub async fn count_tokens(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<ResponseEnvelope> {
        self.dispatch(request, cancel, op_count_tokens).await
    }

    pub async fn chat_completion_stream(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<StreamHandle> {
        self.dispatch_stream(request, cancel, stream_op_chat_completion)
            .await
    }

    pub async fn image_generation_stream(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<StreamHandle> {
        self.dispatch_stream(request, cancel, stream_op_image_generation)
            .await
    }

    pub async fn transcription_stream(
        &self,
        request: &RequestEnvelope,
        cancel: CancellationToken,
    ) -> Result<StreamHandle> {
        self.dispatch_stream(request, cancel, stream_op_transcription)
            .await
    }

    /// The WebSocket/Realtime capability surface (§4.G, §4.I): the caller
    /// dials the returned URL/headers itself, the gateway never proxies the
    /// connection.
    pub fn websocket_for(&self, provider: Provider) -> Result<(&dyn WebSocketCapable, Credential)> {
        let adapter = self
            .adapters
            .get(&provider)
            .ok_or(GatewayError::UnknownProvider(provider))?;
        let websocket = adapter
            .websocket()
            .ok_or(GatewayError::UnsupportedCapability {
                provider,
                capability: "websocket",
            })?;
        let credential = self.select_key_for_provider(provider, "")?;
        Ok((websocket, credential))
    }

    pub fn realtime_for(&self, provider: Provider) -> Result<(&dyn RealtimeCapable, Credential)> {
        let adapter = self
            .adapters
            .get(&provider)
            .ok_or(GatewayError::UnknownProvider(provider))?;
        let realtime = adapter.realtime().ok_or(GatewayError::UnsupportedCapability {
            provider,
            capability: "realtime",
        })?;
        let credential = self.select_key_for_provider(provider, "")?;
        Ok((realtime, credential))
    }

    /// Drains in-flight admission permits before returning, so a caller
    /// shutting down doesn't tear client connections out from under
    /// requests already admitted. Pending but not-yet-admitted callers
    /// still observe the semaphore closing via their own cancellation.
    pub async fn shutdown(&self) {
        for (provider, semaphore) in &self.semaphores {
            let total = self.config.concurrency_for(*provider).concurrency.max(1);
            let _ = semaphore.acquire_many(total as u32).await;
            semaphore.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialConfig;
    use crate::schema::{FallbackTarget, Message, RequestInput};

    fn chat_request(provider: Provider, model: &str) -> RequestEnvelope {
        RequestEnvelope::new(
            provider,
            model,
            RequestInput::ChatCompletion {
                messages: vec![Message::user("hi")],
            },
        )
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected_before_any_credential_lookup() {
        let config = GatewayConfig::default();
        let gateway = Bifrost::new(config).unwrap();
        let request = chat_request(Provider::OpenAI, "gpt-4");
        let err = gateway
            .chat_completion(&request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownProvider(Provider::OpenAI)));
    }

    #[tokio::test]
    async fn missing_credential_is_a_distinct_error_from_missing_adapter() {
        let mut config = GatewayConfig::default();
        config.meta.insert(
            Provider::Azure,
            crate::config::ProviderMeta {
                azure_endpoint: Some("https://example.openai.azure.com".to_string()),
                ..Default::default()
            },
        );
        // No credential inserted, so no adapter is ever constructed for Azure.
        let gateway = Bifrost::new(config).unwrap();
        let request = chat_request(Provider::Azure, "gpt-4");
        let err = gateway
            .chat_completion(&request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownProvider(Provider::Azure)));
    }

    #[tokio::test]
    async fn cancellation_before_admission_never_calls_the_adapter() {
        let mut config = GatewayConfig::default();
        config.credentials.insert(
            Provider::OpenAI,
            CredentialConfig {
                api_key: "sk-test".to_string(),
                extra: Default::default(),
            },
        );
        let gateway = Bifrost::new(config).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = chat_request(Provider::OpenAI, "gpt-4");
        let err = gateway
            .chat_completion(&request, cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
    }

    #[tokio::test]
    async fn fallback_chain_is_walked_in_order_on_unknown_provider() {
        // Neither provider has a credential configured, so every attempt in
        // the chain fails with UnknownProvider and the walk exhausts it.
        let config = GatewayConfig::default();
        let gateway = Bifrost::new(config).unwrap();

        let request = chat_request(Provider::OpenAI, "gpt-4").with_fallbacks(vec![
            FallbackTarget {
                provider: Provider::Anthropic,
                model: "claude-3".to_string(),
            },
            FallbackTarget {
                provider: Provider::Cohere,
                model: "command-r".to_string(),
            },
        ]);

        let err = gateway
            .chat_completion(&request, CancellationToken::new())
            .await
            .unwrap_err();
        // The last attempt in the chain is Cohere; its failure is what
        // propagates once the chain is exhausted.
        assert!(matches!(err, GatewayError::UnknownProvider(Provider::Cohere)));
    }

    #[tokio::test]
    async fn shutdown_waits_for_outstanding_permits_then_closes() {
        let config = GatewayConfig::default();
        let gateway = Bifrost::new(config).unwrap();
        gateway.shutdown().await;
    }
}
