//! Shared response-decoding and error-classification logic (§4.E), reused
//! by every adapter so each one doesn't reimplement its own JSON-decode and
//! non-2xx handling.

use serde::de::DeserializeOwned;

use crate::error::GatewayError;
use crate::schema::{ErrorDetail, Provider};

/// Result of decoding a successful (2xx) response body.
#[derive(Debug)]
pub struct Decoded<T> {
    pub typed: T,
    /// The same body, decoded into an untyped value, preserved as
    /// `ExtraFields.RawResponse` for debuggability.
    pub raw: serde_json::Value,
}

/// JSON-decodes `body` into `T`, and separately into an untyped value for
/// `RawResponse`. No partial fills: on failure nothing is returned, and the
/// caller's pooled target (if any) must be released by the caller.
pub fn decode_body<T: DeserializeOwned>(
    provider: Provider,
    body: &[u8],
) -> Result<Decoded<T>, GatewayError> {
    let typed: T = serde_json::from_slice(body).map_err(|err| GatewayError::Marshalling {
        provider,
        message: format!("failed to decode response body: {err}"),
    })?;
    let raw: serde_json::Value =
        serde_json::from_slice(body).unwrap_or(serde_json::Value::Null);
    Ok(Decoded { typed, raw })
}

/// A provider's own error-body shape, reduced to the fields the normalized
/// envelope needs. Every provider error type converts into this.
pub trait ProviderErrorBody {
    fn into_detail(self) -> ErrorDetail;
}

/// Decodes a non-2xx body into `E` and copies its primary fields into the
/// normalized error. If the error body itself fails to decode, the failure
/// is a marshalling error, not swallowed into a generic upstream error.
pub fn classify_http_error<E>(
    provider: Provider,
    status_code: u16,
    body: &[u8],
) -> GatewayError
where
    E: DeserializeOwned + ProviderErrorBody,
{
    match serde_json::from_slice::<E>(body) {
        Ok(parsed) => GatewayError::Upstream {
            provider,
            status_code,
            message: String::new(),
            detail: parsed.into_detail(),
        }
        .with_message_from_detail(),
        Err(err) => GatewayError::Marshalling {
            provider,
            message: format!("failed to decode error body (status {status_code}): {err}"),
        },
    }
}

/// A transport-level failure: no response was received at all.
/// `IsInternalError=false` — the network is visible to the caller, it is
/// simply not a provider-authored error.
pub fn transport_error(provider: Provider, message: impl Into<String>) -> GatewayError {
    GatewayError::Transport {
        provider,
        message: message.into(),
    }
}

impl GatewayError {
    fn with_message_from_detail(self) -> Self {
        match self {
            GatewayError::Upstream {
                provider,
                status_code,
                detail,
                ..
            } => GatewayError::Upstream {
                provider,
                status_code,
                message: detail.message.clone(),
                detail,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Echo {
        value: u32,
    }

    #[derive(Deserialize)]
    struct FakeProviderError {
        message: String,
    }

    impl ProviderErrorBody for FakeProviderError {
        fn into_detail(self) -> ErrorDetail {
            ErrorDetail::message(self.message)
        }
    }

    #[test]
    fn decode_body_yields_typed_and_raw() {
        let decoded = decode_body::<Echo>(Provider::OpenAI, br#"{"value": 7}"#).unwrap();
        assert_eq!(decoded.typed.value, 7);
        assert_eq!(decoded.raw["value"], 7);
    }

    #[test]
    fn malformed_body_is_marshalling_error() {
        let err = decode_body::<Echo>(Provider::OpenAI, b"not json").unwrap_err();
        assert!(err.is_internal_error());
    }

    #[test]
    fn classify_http_error_copies_message_and_status() {
        let err = classify_http_error::<FakeProviderError>(
            Provider::OpenAI,
            429,
            br#"{"message": "rate limited"}"#,
        );
        match err {
            GatewayError::Upstream {
                status_code,
                message,
                ..
            } => {
                assert_eq!(status_code, 429);
                assert_eq!(message, "rate limited");
            }
            _ => panic!("expected upstream error"),
        }
    }

    #[test]
    fn undecodable_error_body_is_marshalling_not_upstream() {
        let err = classify_http_error::<FakeProviderError>(Provider::OpenAI, 500, b"<html/>");
        assert!(matches!(err, GatewayError::Marshalling { .. }));
    }
}
