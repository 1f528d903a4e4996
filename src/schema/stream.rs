//! The normalized stream element union (§3, §4.G).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ErrorEnvelope;

/// The payload carried by one stream element, tagged by the upstream event
/// kind it originated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamElementKind {
    #[serde(rename = "text.delta")]
    TextDelta { text: String },
    #[serde(rename = "audio.delta")]
    AudioDelta { audio_base64: String },
    #[serde(rename = "tool_call.delta")]
    ToolCallDelta {
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments_fragment: String,
    },
    #[serde(rename = "image.partial")]
    ImagePartial { partial_b64: String },
    #[serde(rename = "image_generation.completed")]
    ImageGenerationCompleted { final_b64: Option<String> },
    #[serde(rename = "transcription.delta")]
    TranscriptionDelta { text: String },
    #[serde(rename = "transcription.completed")]
    TranscriptionCompleted { text: String },
    Usage {
        usage: super::response::Usage,
    },
    Error {
        error: ErrorEnvelope,
    },
}

/// One element sent on the streaming fan-out channel.
///
/// `chunk_index` is strictly increasing within a single stream (§5, §8);
/// `latency` is the wall-clock time between the previous chunk (or stream
/// open) and this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamElement {
    pub chunk_index: u64,
    #[serde(with = "super::response::duration_millis")]
    pub latency: Duration,
    pub kind: StreamElementKind,
}

impl StreamElement {
    pub fn new(chunk_index: u64, latency: Duration, kind: StreamElementKind) -> Self {
        Self {
            chunk_index,
            latency,
            kind,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            StreamElementKind::ImageGenerationCompleted { .. }
                | StreamElementKind::TranscriptionCompleted { .. }
        )
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind, StreamElementKind::Error { .. })
    }
}
