use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message body published by the watcher and consumed by the orchestrator:
/// an absolute source path, and nothing else. Queue payloads are the UTF-8
/// bytes of `FileEvent::path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    path: PathBuf,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }

    /// Encode as the raw queue payload: the absolute path, UTF-8.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.path.to_string_lossy().into_owned().into_bytes()
    }

    /// Decode a queue payload back into a `FileEvent`.
    pub fn from_bytes(body: &[u8]) -> Option<Self> {
        std::str::from_utf8(body).ok().map(|s| Self::new(s))
    }
}

/// Which configured suffix list a file's extension fell into, and therefore
/// which prober and which catalog collection it routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn collection_name<'a>(self, images: &'a str, videos: &'a str) -> &'a str {
        match self {
            MediaKind::Image => images,
            MediaKind::Video => videos,
        }
    }
}

/// A file that has been accepted into the warehouse: its content hash, its
/// original suffix, its size, and the derived warehouse path.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub hash: String,
    pub suffix: String,
    pub file_size: u64,
    pub warehouse_path: PathBuf,
    pub source_path: PathBuf,
}

/// One catalog document per `Artifact`, matching the fields this system has
/// always recorded: base name, warehouse path, hash, size, index time, the
/// prober's opaque tag dictionary, and the manually supplied tags/authors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub base_name: String,
    pub path: String,
    pub hash: String,
    pub file_size: i64,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub index_time: DateTime<Utc>,
    pub raw_tag: serde_json::Value,
    pub manual_tags: Vec<String>,
    pub authors: Vec<String>,
}

impl CatalogRecord {
    pub fn from_artifact(
        artifact: &Artifact,
        raw_tag: serde_json::Value,
        manual_tags: Vec<String>,
        authors: Vec<String>,
    ) -> Self {
        Self {
            base_name: artifact
                .source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path: artifact.warehouse_path.to_string_lossy().into_owned(),
            hash: artifact.hash.clone(),
            file_size: artifact.file_size as i64,
            index_time: Utc::now(),
            raw_tag,
            manual_tags,
            authors,
        }
    }
}
