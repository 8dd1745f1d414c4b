use std::{collections::VecDeque, sync::Arc};

use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::{sync::watch, task::JoinSet};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::IntakeWarning;
use crate::models::{FileInput, FileSource, ImageCollection, ImageRecord};

/// 30 MiB per file.
pub const MAX_IMAGE_BYTES: u64 = 30 * 1024 * 1024;
pub const FALLBACK_MIME: &str = "image/jpeg";
const RECENT_WARNINGS: usize = 20;

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeReport {
    /// Ids of the records appended, in completion order.
    pub added: Vec<Uuid>,
    pub warnings: Vec<IntakeWarning>,
}

/// Owns the session's image collection. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ImageIntake {
    images: Arc<watch::Sender<ImageCollection>>,
    recent_warnings: Arc<Mutex<VecDeque<IntakeWarning>>>,
    max_bytes: u64,
}

impl Default for ImageIntake {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageIntake {
    pub fn new() -> Self {
        Self::with_limit(MAX_IMAGE_BYTES)
    }

    pub fn with_limit(max_bytes: u64) -> Self {
        let (images, _) = watch::channel(ImageCollection::default());
        Self { images: Arc::new(images), recent_warnings: Arc::default(), max_bytes }
    }

    pub fn snapshot(&self) -> ImageCollection {
        self.images.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ImageCollection> {
        self.images.subscribe()
    }

    pub fn recent_warnings(&self) -> Vec<IntakeWarning> {
        self.recent_warnings.lock().iter().cloned().collect()
    }

    /// Decodes every file concurrently. Each success is appended as soon as it
    /// completes, against the collection current at that moment.
    pub async fn ingest(&self, files: Vec<FileInput>) -> IntakeReport {
        let mut tasks = JoinSet::new();
        for file in files {
            let images = Arc::clone(&self.images);
            let max_bytes = self.max_bytes;
            tasks.spawn(async move {
                let record = decode_file(file, max_bytes).await?;
                let id = record.id;
                images.send_modify(|current| *current = current.with_appended(record));
                Ok::<Uuid, IntakeWarning>(id)
            });
        }

        let mut report = IntakeReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(id)) => report.added.push(id),
                Ok(Err(warning)) => {
                    warn!("⚠️ Skipping file: {}", warning);
                    self.remember(warning.clone());
                    report.warnings.push(warning);
                }
                Err(e) => warn!("⚠️ Decode task aborted: {}", e),
            }
        }
        info!("🖼️ Intake finished: {} added, {} warning(s)", report.added.len(), report.warnings.len());
        report
    }

    /// Removes the record with `id`; no-op when it is not present.
    pub fn remove(&self, id: Uuid) -> bool {
        self.images.send_if_modified(|current| {
            if !current.contains(id) {
                return false;
            }
            *current = current.without(id);
            true
        })
    }

    pub fn clear(&self) {
        self.images.send_modify(|current| *current = ImageCollection::default());
        self.recent_warnings.lock().clear();
    }

    fn remember(&self, warning: IntakeWarning) {
        let mut recent = self.recent_warnings.lock();
        if recent.len() == RECENT_WARNINGS {
            recent.pop_front();
        }
        recent.push_back(warning);
    }
}

async fn decode_file(file: FileInput, max_bytes: u64) -> Result<ImageRecord, IntakeWarning> {
    let FileInput { name, declared_mime, size, source } = file;
    let too_large = |size: u64| IntakeWarning::FileTooLarge { name: name.clone(), size, limit: max_bytes };
    if size > max_bytes {
        return Err(too_large(size));
    }

    let bytes = match source {
        FileSource::Memory(bytes) => bytes,
        FileSource::Path(path) => tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| IntakeWarning::FileUnreadable { name: name.clone(), reason: e.to_string() })?,
    };
    // declared size may understate what was actually read
    if bytes.len() as u64 > max_bytes {
        return Err(too_large(bytes.len() as u64));
    }
    if bytes.is_empty() {
        return Err(IntakeWarning::FileUnreadable { name, reason: "file is empty".into() });
    }
    let size_bytes = bytes.len() as u64;

    let (encoded_data, sniffed) = tokio::task::spawn_blocking(move || {
        let sniffed = image::guess_format(&bytes).ok().map(|f| f.to_mime_type().to_string());
        (base64::engine::general_purpose::STANDARD.encode(&bytes), sniffed)
    })
    .await
    .map_err(|e| IntakeWarning::FileUnreadable { name: name.clone(), reason: e.to_string() })?;

    let mime_type = resolve_mime(sniffed, declared_mime);
    Ok(ImageRecord {
        id: Uuid::new_v4(),
        encoded_data,
        mime_type,
        original_name: name,
        size_bytes,
        added_at: Utc::now(),
    })
}

/// Content-derived type wins, then the declared type, then JPEG.
fn resolve_mime(sniffed: Option<String>, declared: Option<String>) -> String {
    sniffed
        .or_else(|| declared.filter(|m| !m.trim().is_empty()))
        .unwrap_or_else(|| FALLBACK_MIME.to_string())
}
