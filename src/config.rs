//! Configuration loading (ambient stack): one YAML document, layered with
//! `BIFROST_*` environment overrides read via `dotenvy`, following the
//! `config/loader.rs` idiom this crate is otherwise built on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GatewayError, Result};
use crate::schema::Provider;
use crate::transport::{ConcurrencyAndBufferSize, NetworkConfig, ProxyConfig};

/// One provider's credential plus whatever extra fields its adapter needs
/// (Bedrock's AWS secret/session token, ElevenLabs' agent id, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub api_key: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// AWS/Azure-specific metadata that doesn't fit the generic credential
/// shape: Bedrock's region, Azure's endpoint/deployment map/api-version.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderMeta {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub aws_region: Option<String>,
    #[serde(default)]
    pub azure_endpoint: Option<String>,
    #[serde(default)]
    pub azure_api_version: Option<String>,
    #[serde(default)]
    pub azure_deployments: BTreeMap<String, String>,
}

/// Logging configuration: a `tracing-subscriber` `EnvFilter` directive plus
/// a structured/plain toggle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

/// Top-level gateway configuration: one entry per provider this instance
/// dispatches to, plus shared concurrency/network/proxy/logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    pub credentials: BTreeMap<Provider, CredentialConfig>,
    #[serde(default)]
    pub meta: BTreeMap<Provider, ProviderMeta>,
    #[serde(default)]
    pub concurrency: BTreeMap<Provider, ConcurrencyAndBufferSize>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

impl GatewayConfig {
    /// Loads from a YAML file, then overlays `BIFROST_*` environment
    /// variables (via `dotenvy`, which is a no-op if no `.env` is present).
    pub async fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "loading gateway configuration");

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| GatewayError::Configuration {
                provider: Provider::OpenAI,
                message: format!("failed to read config file {}: {err}", path.display()),
            })?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut config: GatewayConfig =
            serde_yaml::from_str(content).map_err(|err| GatewayError::Configuration {
                provider: Provider::OpenAI,
                message: format!("failed to parse config: {err}"),
            })?;

        config.apply_env_overrides();
        debug!("configuration loaded");
        Ok(config)
    }

    /// Builds configuration purely from `BIFROST_*` environment variables
    /// (and `.env`, loaded via `dotenvy`), with no base YAML document.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = GatewayConfig::default();
        config.apply_env_overrides();
        Ok(config)
    }

    /// `BIFROST_<PROVIDER>_API_KEY` always wins over whatever the YAML
    /// document set, matching the layering order of every `config`-crate
    /// based loader: file, then environment.
    fn apply_env_overrides(&mut self) {
        for provider in [
            Provider::OpenAI,
            Provider::Anthropic,
            Provider::Cohere,
            Provider::Azure,
            Provider::Bedrock,
            Provider::ElevenLabs,
        ] {
            let env_name = format!("BIFROST_{}_API_KEY", provider.to_string().to_uppercase());
            if let Ok(api_key) = std::env::var(&env_name) {
                self.credentials
                    .entry(provider)
                    .or_insert_with(|| CredentialConfig {
                        api_key: String::new(),
                        extra: BTreeMap::new(),
                    })
                    .api_key = api_key;
            }
        }

        if let Ok(filter) = std::env::var("BIFROST_LOG_FILTER") {
            self.logger.filter = filter;
        }
    }

    pub fn credential(&self, provider: Provider) -> Result<crate::providers::Credential> {
        let entry = self
            .credentials
            .get(&provider)
            .ok_or(GatewayError::NoCredential(provider))?;
        Ok(crate::providers::Credential {
            api_key: entry.api_key.clone(),
            extra: entry.extra.clone(),
        })
    }

    pub fn concurrency_for(&self, provider: Provider) -> ConcurrencyAndBufferSize {
        self.concurrency
            .get(&provider)
            .copied()
            .unwrap_or_default()
    }
}

/// Installs a `tracing-subscriber` global default from [`LoggerConfig`].
/// Idempotent-ish: a second call is a silent no-op rather than a panic,
/// since library initialization may race with a host application's own.
pub fn init_tracing(logger: &LoggerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&logger.filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if logger.json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };
    if result.is_err() {
        debug!("tracing subscriber already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_roundtrip_parses_credentials_and_network() {
        let mut original = GatewayConfig::default();
        original.credentials.insert(
            Provider::OpenAI,
            CredentialConfig {
                api_key: "sk-test".to_string(),
                extra: BTreeMap::new(),
            },
        );
        original.network.max_connections_per_host = 16;

        let yaml = serde_yaml::to_string(&original).unwrap();
        let config = GatewayConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(config.credential(Provider::OpenAI).unwrap().api_key, "sk-test");
        assert_eq!(config.network.max_connections_per_host, 16);
    }

    #[test]
    fn missing_credential_is_a_distinct_error() {
        let config = GatewayConfig::default();
        let err = config.credential(Provider::Anthropic).unwrap_err();
        assert!(matches!(err, GatewayError::NoCredential(Provider::Anthropic)));
    }

    #[tokio::test]
    async fn from_file_reads_a_yaml_document_off_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        std::fs::write(
            &path,
            "credentials:\n  cohere:\n    api_key: file-key\n",
        )
        .unwrap();

        let config = GatewayConfig::from_file(&path).await.unwrap();
        assert_eq!(config.credential(Provider::Cohere).unwrap().api_key, "file-key");
    }
}
