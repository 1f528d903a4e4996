//! The caller-visible error envelope (§3), distinct from the Rust-level
//! [`crate::error::GatewayError`] it is produced from.

use serde::{Deserialize, Serialize};

/// The provider-reported (or internally synthesized) error detail.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying: Option<String>,
}

impl ErrorDetail {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// `{IsInternalError, StatusCode?, EventID?, Error}` (§3).
///
/// `is_internal_error = true` marks marshalling/transport/decoding failures;
/// otherwise the upstream HTTP status is authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub is_internal_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub error: ErrorDetail,
}

impl ErrorEnvelope {
    pub fn internal(detail: ErrorDetail) -> Self {
        Self {
            is_internal_error: true,
            status_code: None,
            event_id: None,
            error: detail,
        }
    }

    pub fn upstream(status_code: u16, detail: ErrorDetail) -> Self {
        Self {
            is_internal_error: false,
            status_code: Some(status_code),
            event_id: None,
            error: detail,
        }
    }
}
