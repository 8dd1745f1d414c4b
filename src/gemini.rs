use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use tracing::info;

use crate::error::GenerationError;
use crate::models::{AspectRatio, GenerationResult, ImageCollection};

pub const DEFAULT_RESULT_MIME: &str = "image/png";

// --- Request Types ---

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub image_config: Option<ImageConfig>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    pub aspect_ratio: String,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Content {
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Request and response fragment. Inline data is tried first when parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text { text: String },
    Other(serde_json::Value),
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    pub data: String,
}

/// Builds the single-turn request: prompt first, then one inline part per
/// image in collection order. Rejects the call when there is nothing to send.
pub fn build_request(
    prompt: &str,
    images: &ImageCollection,
    aspect_ratio: Option<AspectRatio>,
) -> Result<GenerateContentRequest, GenerationError> {
    if prompt.trim().is_empty() && images.is_empty() {
        return Err(GenerationError::Validation);
    }

    let mut parts = Vec::with_capacity(images.len() + 1);
    parts.push(Part::Text { text: prompt.to_string() });
    parts.extend(images.iter().map(|img| Part::Inline {
        inline_data: InlineData { mime_type: Some(img.mime_type.clone()), data: img.encoded_data.clone() },
    }));

    Ok(GenerateContentRequest {
        contents: vec![Content { role: Some("user".to_string()), parts }],
        generation_config: GenerationConfig {
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            image_config: aspect_ratio.map(|r| ImageConfig { aspect_ratio: r.as_str().to_string() }),
        },
    })
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Content,
}

/// First inline-data part across all candidates, paired with its MIME type.
pub fn extract_first_image(resp: &GenerateContentResponse) -> Option<GenerationResult> {
    for c in &resp.candidates {
        for p in &c.content.parts {
            if let Part::Inline { inline_data } = p {
                let mime = inline_data.mime_type.as_deref().filter(|m| !m.is_empty()).unwrap_or(DEFAULT_RESULT_MIME);
                info!("🎯 Found image data with mime type: {}", mime);
                return Some(GenerationResult::new(mime, &inline_data.data));
            }
        }
    }
    info!("⚠️ No inline image data found in response structure");
    None
}

/// Text the model sent alongside (or instead of) an image, joined for diagnostics.
pub fn collect_text(resp: &GenerateContentResponse) -> String {
    resp.candidates
        .iter()
        .flat_map(|c| c.content.parts.iter())
        .filter_map(|p| match p {
            Part::Text { text } => Some(text.trim()),
            _ => None,
        })
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// Shortens long base64 "data" fields so payloads can be logged.
pub fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let serde_json::Value::String(s) = val {
                        // base64 alphabet only, so byte offsets are char offsets
                        if s.len() > 100 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            let head: String = s.chars().take(50).collect();
                            *val = serde_json::Value::String(format!("{}...[truncated {} chars]", head, s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

/// Loggable rendering of a JSON body with image payloads elided.
pub fn loggable(value: &serde_json::Value) -> String {
    let mut copy = value.clone();
    truncate_base64_in_json(&mut copy);
    serde_json::to_string(&copy).unwrap_or_default()
}
