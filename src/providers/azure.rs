//! Azure OpenAI adapter (§4.F).
//!
//! The wire shape is identical to OpenAI's, so request and response bodies
//! are built and parsed with [`super::openai`]'s helpers. What differs is
//! the URL (deployment-scoped, API-versioned) and the auth header
//! (`api-key`, not `Authorization: Bearer`). A model name with no
//! configured deployment mapping is a configuration error resolved before
//! any network call is made.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::error::{GatewayError, Result};
use crate::handler;
use crate::schema::{Provider, RequestEnvelope, ResponseEnvelope};
use crate::transport::NetworkConfig;

use super::openai::{
    OpenAiErrorBody, build_chat_body, build_image_body, parse_chat_response, parse_image_response,
};
use super::{Capabilities, Credential, ProviderAdapter};
use crate::streaming::{CancellationToken, StreamHandle, spawn_sse_reader};

pub struct AzureAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_version: String,
    /// Maps a normalized model name to the deployment name it was deployed
    /// under. Azure has no implicit model-to-deployment mapping.
    deployments: BTreeMap<String, String>,
}

impl AzureAdapter {
    pub fn new(
        network: &NetworkConfig,
        proxy: &crate::transport::ProxyConfig,
        endpoint: impl Into<String>,
        api_version: impl Into<String>,
        deployments: BTreeMap<String, String>,
    ) -> Result<Self> {
        let client = crate::transport::build_client(Provider::Azure, network, proxy)?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_version: api_version.into(),
            deployments,
        })
    }

    fn deployment_for(&self, model: &str) -> Result<&str> {
        self.deployments.get(model).map(String::as_str).ok_or_else(|| {
            GatewayError::Configuration {
                provider: Provider::Azure,
                message: format!("no deployment configured for model {model}"),
            }
        })
    }

    fn url_for(&self, deployment: &str, path: &str) -> String {
        format!(
            "{}/openai/deployments/{}/{}?api-version={}",
            self.endpoint.trim_end_matches('/'),
            deployment,
            path,
            self.api_version,
        )
    }
}

#[async_trait]
impl ProviderAdapter for AzureAdapter {
    fn key(&self) -> Provider {
        Provider::Azure
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
            provider: Provider::Azure,
            capability: "text_completion",
        })
    }

    async fn chat_completion(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let deployment = self.deployment_for(&request.model)?;
        let mut body = build_chat_body(&request.model, request)?;
        // Azure's deployment already pins the model; the field is redundant
        // on the wire but harmless, matching what the Azure REST API accepts.
        body.as_object_mut().map(|o| o.remove("model"));

        let url = self.url_for(deployment, "chat/completions");
        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("api-key", &credential.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::Azure, err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| handler::transport_error(Provider::Azure, err.to_string()))?;

        if !status.is_success() {
            return Err(handler::classify_http_error::<OpenAiErrorBody>(
                Provider::Azure,
                status.as_u16(),
                &bytes,
            ));
        }

        parse_chat_response(Provider::Azure, &request.model, &bytes, started.elapsed())
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
        let deployment = self.deployment_for(&request.model)?;
        let mut body = build_chat_body(&request.model, request)?;
        body.as_object_mut().map(|o| o.remove("model"));
        body["stream"] = json!(true);

        let url = self.url_for(deployment, "chat/completions");
        let response = self
            .client
            .post(&url)
            .header("api-key", &credential.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::Azure, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let bytes = response.bytes().await.unwrap_or_default();
            return Err(handler::classify_http_error::<OpenAiErrorBody>(
                Provider::Azure,
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
            super::openai::parse_chat_stream_event,
        ))
    }

    async fn image_generation(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let deployment = self.deployment_for(&request.model)?;
        let mut body = build_image_body(&request.model, request)?;
        body.as_object_mut().map(|o| o.remove("model"));

        let url = self.url_for(deployment, "images/generations");
        let started = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("api-key", &credential.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::Azure, err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| handler::transport_error(Provider::Azure, err.to_string()))?;

        if !status.is_success() {
            return Err(handler::classify_http_error::<OpenAiErrorBody>(
                Provider::Azure,
                status.as_u16(),
                &bytes,
            ));
        }

        parse_image_response(&request.model, &bytes, started.elapsed())
    }

    async fn embedding(
        &self,
        credential: &Credential,
        request: &RequestEnvelope,
    ) -> Result<ResponseEnvelope> {
        let deployment = self.deployment_for(&request.model)?;
        let crate::schema::RequestInput::Embedding { input } = &request.input else {
            return Err(GatewayError::Marshalling {
                provider: Provider::Azure,
                message: "embedding called with non-embedding input".to_string(),
            });
        };

        let url = self.url_for(deployment, "embeddings");
        let body = json!({"input": input});
        let response = self
            .client
            .post(&url)
            .header("api-key", &credential.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| handler::transport_error(Provider::Azure, err.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| handler::transport_error(Provider::Azure, err.to_string()))?;
        if !status.is_success() {
            return Err(handler::classify_http_error::<OpenAiErrorBody>(
                Provider::Azure,
                status.as_u16(),
                &bytes,
            ));
        }

        let decoded = handler::decode_body::<serde_json::Value>(Provider::Azure, &bytes)?;
        Ok(ResponseEnvelope {
            id: uuid::Uuid::new_v4().to_string(),
            object: "embedding".to_string(),
            model: request.model.clone(),
            created: chrono::Utc::now().timestamp(),
            choices: Vec::new(),
            usage: crate::schema::Usage::default(),
            extra_fields: crate::schema::ExtraFields {
                provider: Provider::Azure,
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

    #[test]
    fn missing_deployment_is_a_configuration_error_before_any_network_call() {
        let adapter = AzureAdapter {
            client: reqwest::Client::new(),
            endpoint: "https://example.openai.azure.com".to_string(),
            api_version: "2024-02-01".to_string(),
            deployments: BTreeMap::new(),
        };
        let err = adapter.deployment_for("gpt-4").unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }

    #[test]
    fn url_is_deployment_and_version_scoped() {
        let mut deployments = BTreeMap::new();
        deployments.insert("gpt-4".to_string(), "my-deployment".to_string());
        let adapter = AzureAdapter {
            client: reqwest::Client::new(),
            endpoint: "https://example.openai.azure.com/".to_string(),
            api_version: "2024-02-01".to_string(),
            deployments,
        };
        let url = adapter.url_for(
            adapter.deployment_for("gpt-4").unwrap(),
            "chat/completions",
        );
        assert_eq!(
            url,
            "https://example.openai.azure.com/openai/deployments/my-deployment/chat/completions?api-version=2024-02-01"
        );
    }
}
