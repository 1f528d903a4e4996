//! Bounded-concurrency HTTP transport per provider (§4.D).
//!
//! One [`reqwest::Client`] is built per adapter at construction time and
//! shared across every call that adapter makes — clients are designed for
//! concurrent use, so there is no per-request client churn.

pub mod sigv4;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{GatewayError, Result};
use crate::schema::Provider;

/// `{read timeout, write timeout, max connections per host}` (§4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub max_connections_per_host: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(60),
            max_connections_per_host: 64,
        }
    }
}

/// `{Concurrency, BufferSize}`: the admission width and the stream channel
/// capacity, both sized per provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConcurrencyAndBufferSize {
    pub concurrency: usize,
    pub buffer_size: usize,
}

impl Default for ConcurrencyAndBufferSize {
    fn default() -> Self {
        Self {
            concurrency: 16,
            buffer_size: 32,
        }
    }
}

/// Proxy policy, enumerated per §4.D.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProxyConfig {
    #[default]
    None,
    Http {
        url: String,
    },
    Socks5 {
        url: String,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        password: Option<String>,
    },
    /// Proxy is resolved from `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY`.
    Env,
}

/// Builds one [`reqwest::Client`] for `provider` from the given network and
/// proxy configuration. An unknown or malformed proxy logs a warning and
/// falls through to direct dialing rather than failing construction.
pub fn build_client(
    provider: Provider,
    network: &NetworkConfig,
    proxy: &ProxyConfig,
) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(network.write_timeout)
        .timeout(network.read_timeout)
        .pool_max_idle_per_host(network.max_connections_per_host);

    builder = match proxy {
        ProxyConfig::None => builder.no_proxy(),
        ProxyConfig::Http { url } => match reqwest::Proxy::all(url) {
            Ok(p) => builder.proxy(p),
            Err(err) => {
                warn!(%provider, %err, "malformed HTTP proxy URL, falling back to direct dialing");
                builder.no_proxy()
            }
        },
        ProxyConfig::Socks5 {
            url,
            username,
            password,
        } => match reqwest::Proxy::all(url) {
            Ok(mut p) => {
                if let (Some(user), Some(pass)) = (username, password) {
                    p = p.basic_auth(user, pass);
                }
                builder.proxy(p)
            }
            Err(err) => {
                warn!(%provider, %err, "malformed SOCKS5 proxy URL, falling back to direct dialing");
                builder.no_proxy()
            }
        },
        // `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY` are read by reqwest itself
        // when no explicit proxy is configured on the builder.
        ProxyConfig::Env => builder,
    };

    builder
        .build()
        .map_err(|err| GatewayError::Configuration {
            provider,
            message: format!("failed to build HTTP client: {err}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_dialing_is_the_default() {
        let client = build_client(
            Provider::OpenAI,
            &NetworkConfig::default(),
            &ProxyConfig::None,
        );
        assert!(client.is_ok());
    }

    #[test]
    fn malformed_proxy_url_falls_back_without_erroring() {
        let client = build_client(
            Provider::OpenAI,
            &NetworkConfig::default(),
            &ProxyConfig::Http {
                url: "not a url".to_string(),
            },
        );
        assert!(client.is_ok());
    }
}
