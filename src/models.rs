use std::{path::PathBuf, sync::Arc};

use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionFailure;

/// One decoded source image. `encoded_data` is bare base64, never a data URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: Uuid,
    pub encoded_data: String,
    pub mime_type: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub added_at: DateTime<Utc>,
}

/// What the presentation layer gets to see of a record.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSummary {
    pub id: Uuid,
    pub mime_type: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub added_at: DateTime<Utc>,
}

impl From<&ImageRecord> for ImageSummary {
    fn from(r: &ImageRecord) -> Self {
        Self {
            id: r.id,
            mime_type: r.mime_type.clone(),
            original_name: r.original_name.clone(),
            size_bytes: r.size_bytes,
            added_at: r.added_at,
        }
    }
}

/// Ordered, duplicate-free set of records. Every mutation returns a new
/// collection so it can be applied to whatever value is current.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageCollection {
    records: Vec<Arc<ImageRecord>>,
}

impl ImageCollection {
    pub fn with_appended(&self, record: ImageRecord) -> Self {
        if self.contains(record.id) {
            return self.clone();
        }
        let mut records = self.records.clone();
        records.push(Arc::new(record));
        Self { records }
    }

    pub fn without(&self, id: Uuid) -> Self {
        Self { records: self.records.iter().filter(|r| r.id != id).cloned().collect() }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.records.iter().map(|r| &**r)
    }

    pub fn summaries(&self) -> Vec<ImageSummary> {
        self.iter().map(ImageSummary::from).collect()
    }
}

/// Where a file's bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    Memory(Bytes),
    Path(PathBuf),
}

/// Raw file as handed over by the file-input collaborator.
#[derive(Debug, Clone)]
pub struct FileInput {
    pub name: String,
    pub declared_mime: Option<String>,
    pub size: u64,
    pub source: FileSource,
}

impl FileInput {
    pub fn from_bytes(name: impl Into<String>, declared_mime: Option<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self { name: name.into(), declared_mime, size: data.len() as u64, source: FileSource::Memory(data) }
    }

    pub fn from_path(path: impl Into<PathBuf>, declared_mime: Option<String>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, declared_mime, size, source: FileSource::Path(path) }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AspectRatio {
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Tall => "9:16",
            AspectRatio::Wide => "16:9",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub image_data_uri: String,
    pub mime_type: String,
}

impl GenerationResult {
    pub fn new(mime_type: impl Into<String>, base64_data: &str) -> Self {
        let mime_type = mime_type.into();
        Self { image_data_uri: format!("data:{mime_type};base64,{base64_data}"), mime_type }
    }

    /// Raw bytes of the generated image, for saving to disk.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        let payload = self.image_data_uri.split_once(',').map(|(_, d)| d).unwrap_or_default();
        base64::engine::general_purpose::STANDARD.decode(payload)
    }

    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Submitting,
    Succeeded,
    Failed,
}

/// `result` is only set when succeeded, `error` only when failed.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub phase: Phase,
    pub result: Option<GenerationResult>,
    pub error: Option<SessionFailure>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn idle() -> Self {
        Self { phase: Phase::Idle, result: None, error: None, updated_at: Utc::now() }
    }

    pub fn submitting() -> Self {
        Self { phase: Phase::Submitting, ..Self::idle() }
    }

    pub fn succeeded(result: GenerationResult) -> Self {
        Self { phase: Phase::Succeeded, result: Some(result), ..Self::idle() }
    }

    pub fn failed(failure: SessionFailure) -> Self {
        Self { phase: Phase::Failed, error: Some(failure), ..Self::idle() }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::idle()
    }
}
