//! A unified LLM gateway: one normalized request/response schema dispatched
//! across heterogeneous inference providers, with pooling, streaming and
//! fallback (§1-§9).
//!
//! A caller builds a [`config::GatewayConfig`] (from a YAML file, the
//! environment, or in-process), hands it to [`dispatcher::Bifrost::new`],
//! and from then on speaks only in terms of the normalized
//! [`schema::RequestEnvelope`]/[`schema::ResponseEnvelope`] shapes — the
//! gateway resolves which upstream each request targets, translates the
//! wire shape, and applies the configured fallback chain on failure.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod params;
pub mod pool;
pub mod providers;
pub mod schema;
pub mod streaming;
pub mod transport;

pub use config::GatewayConfig;
pub use dispatcher::Bifrost;
pub use error::{GatewayError, Result};
pub use schema::{
    ErrorDetail, ErrorEnvelope, FallbackTarget, Message, Provider, RequestEnvelope, RequestInput,
    RequestParams, ResponseEnvelope,
};
pub use streaming::{CancellationToken, StreamHandle};
