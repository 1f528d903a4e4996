//! Crate-wide error taxonomy (§7).
//!
//! Every public operation returns `Result<T, GatewayError>`. Adapters never
//! recover their own errors — they return them to the dispatcher, which
//! applies fallback (§4.H) and otherwise propagates the last attempt's error
//! verbatim to the caller.

use crate::schema::{ErrorDetail, ErrorEnvelope, Provider};

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing endpoint/deployment/AWS meta, unsupported proxy type. Never
    /// retried, never triggers a network call.
    #[error("configuration error ({provider}): {message}")]
    Configuration { provider: Provider, message: String },

    /// No adapter registered for the requested provider.
    #[error("no adapter registered for provider {0}")]
    UnknownProvider(Provider),

    /// No credential available for the requested provider/model.
    #[error("no credential available for provider {0}")]
    NoCredential(Provider),

    /// JSON encode/decode failure, including a provider error body that
    /// itself failed to decode. `is_internal_error() == true`.
    #[error("marshalling error ({provider}): {message}")]
    Marshalling { provider: Provider, message: String },

    /// Connect/read/write failure before a response was received.
    #[error("transport error ({provider}): {message}")]
    Transport { provider: Provider, message: String },

    /// Non-2xx response from the upstream.
    #[error("upstream error ({provider}, status {status_code}): {message}")]
    Upstream {
        provider: Provider,
        status_code: u16,
        message: String,
        detail: ErrorDetail,
    },

    /// A capability (streaming, tools, images, audio, image generation,
    /// websocket, realtime) was invoked on an adapter that doesn't have it.
    #[error("provider {provider} does not support {capability}")]
    UnsupportedCapability { provider: Provider, capability: &'static str },

    /// The caller's context was cancelled. Distinguished from every other
    /// variant: the dispatcher never applies fallback on this one.
    #[error("request cancelled")]
    Cancelled,
}

impl GatewayError {
    pub fn is_internal_error(&self) -> bool {
        !matches!(self, GatewayError::Upstream { .. } | GatewayError::Cancelled)
    }

    pub fn provider(&self) -> Option<Provider> {
        match self {
            GatewayError::Configuration { provider, .. }
            | GatewayError::Marshalling { provider, .. }
            | GatewayError::Transport { provider, .. }
            | GatewayError::Upstream { provider, .. }
            | GatewayError::UnsupportedCapability { provider, .. } => Some(*provider),
            GatewayError::UnknownProvider(p) | GatewayError::NoCredential(p) => Some(*p),
            GatewayError::Cancelled => None,
        }
    }

    /// Maps this error into the caller-visible envelope of §3. Never called
    /// for `Cancelled`, which propagates as a distinct signal instead.
    pub fn into_envelope(self) -> ErrorEnvelope {
        match self {
            GatewayError::Upstream {
                status_code, detail, ..
            } => ErrorEnvelope::upstream(status_code, detail),
            GatewayError::Configuration { message, .. } => {
                ErrorEnvelope::internal(ErrorDetail::message(message))
            }
            GatewayError::UnknownProvider(p) => {
                ErrorEnvelope::internal(ErrorDetail::message(format!("unknown provider {p}")))
            }
            GatewayError::NoCredential(p) => {
                ErrorEnvelope::internal(ErrorDetail::message(format!("no credential for {p}")))
            }
            GatewayError::Marshalling { message, .. } => {
                ErrorEnvelope::internal(ErrorDetail::message(message))
            }
            GatewayError::Transport { message, .. } => {
                ErrorEnvelope::internal(ErrorDetail::message(message))
            }
            GatewayError::UnsupportedCapability {
                provider,
                capability,
            } => ErrorEnvelope::internal(ErrorDetail::message(format!(
                "{provider} does not support {capability}"
            ))),
            GatewayError::Cancelled => {
                ErrorEnvelope::internal(ErrorDetail::message("request cancelled"))
            }
        }
    }
}
