//! Normalized request/response schema shared by every provider adapter.
//!
//! Nothing in this module knows how to reach an upstream. It defines the
//! provider-agnostic shapes adapters translate into and out of, plus the
//! structural accessors (`get_chat_content`, `extract_tool_calls`, ...) that
//! let a caller read a response without caring which provider produced it.

mod content;
mod error;
mod message;
mod request;
mod response;
mod stream;
mod tool;

pub use content::{AudioData, ContentBlock, ImageSource};
pub use error::{ErrorDetail, ErrorEnvelope};
pub use message::{Message, MessageContent, Role};
pub use request::{FallbackTarget, Provider, RequestEnvelope, RequestInput, RequestParams};
pub use response::{BilledUsage, Choice, ExtraFields, ResponseEnvelope, Usage};
pub use stream::{StreamElement, StreamElementKind};
pub use tool::{Tool, ToolCall, ToolParameters};

/// Extracts the canonical user-visible text from a chat/responses message,
/// regardless of whether the provider returned a plain string or a list of
/// content blocks. Total and deterministic: never panics, never blocks.
pub fn get_chat_content(message: &Message) -> String {
    match &message.content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(""),
    }
}

/// Alias kept distinct from [`get_chat_content`] because the Responses API
/// shape may in the future diverge from chat (e.g. separate output items);
/// today the extraction rule is identical.
pub fn get_responses_content(message: &Message) -> String {
    get_chat_content(message)
}

/// Collects every tool call carried by a response's choices, in choice then
/// call order. Total: a response with no tool calls yields an empty vector.
pub fn extract_tool_calls(response: &ResponseEnvelope) -> Vec<ToolCall> {
    response
        .choices
        .iter()
        .filter_map(|choice| choice.message.tool_calls.as_ref())
        .flat_map(|calls| calls.iter().cloned())
        .collect()
}
