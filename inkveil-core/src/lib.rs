use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod buffer;
pub mod chapters;
pub mod composition;
pub mod config;
pub mod engine;
pub mod error;
pub mod reader;
pub mod restore;
pub mod session;
pub mod store;

pub use buffer::{EditorBuffer, MemoryBuffer};
pub use chapters::{Chapter, ChapterIndexer, ChapterOptions};
pub use composition::{CleanupOutcome, CleanupTicket, CompositionInterceptor};
pub use config::ReaderConfig;
pub use engine::{
    IgnoreReason, Key, KeystrokeOutcome, Modifier, OutputMode, ReadingStatistics, RevealEngine,
    RevealState,
};
pub use error::RestoreError;
pub use reader::{Command, PasteDecision, Reader, ReaderEvent, SharedReader};
pub use restore::{
    ContentOrigin, RestorationCoordinator, RestorationGate, RestorationPhase, RestoreOutcome,
    RestoreSource, RestoreStep,
};
pub use session::{
    AutosaveTimer, CurrentDocument, HistoryConfig, HistoryEntry, HistorySort, Mark, Session,
    SessionStore,
};
pub use store::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f1d6c2a-8b47-5e0f-9c3d-72a4be51d0e9").expect("valid namespace UUID")
});

/// Stable identifier for a file on disk, so reopening the same file maps
/// onto the same session and history entry.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&*DOCUMENT_NAMESPACE, rendered.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    #[default]
    Txt,
    Md,
    Docx,
    Unknown,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match ext.as_deref() {
            Some("txt") => DocumentFormat::Txt,
            Some("md") | Some("markdown") => DocumentFormat::Md,
            Some("docx") => DocumentFormat::Docx,
            _ => DocumentFormat::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Txt => "txt",
            DocumentFormat::Md => "md",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: String,
    pub format: DocumentFormat,
    pub file_size: u64,
}

/// What a loader hands to the core: already normalized plain text.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub id: DocumentId,
    pub raw_content: String,
    pub metadata: DocumentMetadata,
    pub path: Option<PathBuf>,
}

#[async_trait::async_trait]
pub trait ContentLoader: Send + Sync {
    async fn load(&self, path: &Path) -> Result<LoadedDocument>;
}

/// Immutable loaded text. Positions are counted in `char`s; `boundaries`
/// maps every position (including `total_length`) to its byte offset.
#[derive(Clone)]
pub struct Document {
    id: DocumentId,
    metadata: DocumentMetadata,
    content: Arc<str>,
    boundaries: Arc<[usize]>,
}

impl Document {
    pub fn new(id: DocumentId, content: impl Into<String>, metadata: DocumentMetadata) -> Self {
        let content: String = content.into();
        let boundaries: Vec<usize> = content
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(content.len()))
            .collect();
        Self {
            id,
            metadata,
            content: Arc::from(content),
            boundaries: Arc::from(boundaries),
        }
    }

    pub fn from_loaded(loaded: LoadedDocument) -> Self {
        Self::new(loaded.id, loaded.raw_content, loaded.metadata)
    }

    /// Same text under another identity; used when history already knows
    /// this file by an older id.
    pub fn with_id(mut self, id: DocumentId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn title(&self) -> &str {
        &self.metadata.title
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn total_length(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn clamp(&self, position: usize) -> usize {
        position.min(self.total_length())
    }

    /// Characters in `[start, end)`, both ends clamped.
    pub fn slice(&self, start: usize, end: usize) -> &str {
        let end = self.clamp(end);
        let start = start.min(end);
        &self.content[self.boundaries[start]..self.boundaries[end]]
    }

    pub fn prefix(&self, position: usize) -> &str {
        self.slice(0, position)
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .field("total_length", &self.total_length())
            .finish()
    }
}
