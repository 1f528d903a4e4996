//! Typed content-block shapes for multimodal messages.

use serde::{Deserialize, Serialize};

/// One element of a multi-part message body.
///
/// Mirrors the OpenAI-style `type`-tagged content part shape that every
/// adapter either speaks natively (OpenAI-compatible) or translates from
/// (Anthropic's `source`-based images, Bedrock's `bytes`-based images, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image")]
    Image {
        source: ImageSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    #[serde(rename = "file")]
    File {
        /// Base64-encoded file bytes.
        data: String,
        filename: String,
    },

    #[serde(rename = "audio")]
    Audio { audio: AudioData },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentBlock::Image {
            source: ImageSource::Url { url: url.into() },
            detail: None,
        }
    }

    pub fn image_base64(data: impl Into<String>, media_type: impl Into<String>) -> Self {
        ContentBlock::Image {
            source: ImageSource::Base64 {
                data: data.into(),
                media_type: media_type.into(),
            },
            detail: None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ContentBlock::Text { .. })
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentBlock::Image { .. })
    }
}

/// An image's location: either a remote URL or inline base64 bytes with a
/// media type, matching §3's "Image (URL or base64 with media type)".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ImageSource {
    Url {
        url: String,
    },
    Base64 {
        data: String,
        media_type: String,
    },
}

/// Base64-encoded audio with its container/codec format, e.g. `"mp3"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioData {
    pub data: String,
    pub format: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_each_canonical_block_kind() {
        let blocks = vec![
            ContentBlock::text("hello"),
            ContentBlock::image_url("https://example.com/cat.png"),
            ContentBlock::image_base64("Zm9v", "image/png"),
            ContentBlock::Audio {
                audio: AudioData {
                    data: "YWJj".to_string(),
                    format: "mp3".to_string(),
                },
            },
            ContentBlock::File {
                data: "ZGVmZw==".to_string(),
                filename: "report.pdf".to_string(),
            },
        ];

        for block in &blocks {
            let encoded = serde_json::to_string(block).unwrap();
            let decoded: ContentBlock = serde_json::from_str(&encoded).unwrap();
            assert_eq!(&decoded, block);
        }
    }
}
