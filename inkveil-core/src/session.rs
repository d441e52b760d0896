use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::{get_json, set_json, KeyValueStore};
use crate::{Document, DocumentFormat, DocumentId, DocumentMetadata};

pub const CURRENT_DOCUMENT_KEY: &str = "current_document";
pub const HISTORY_KEY: &str = "history";
const COMPLETED_PERCENTAGE: f64 = 99.0;

fn session_key(document_id: DocumentId) -> String {
    format!("session.{document_id}")
}

/// Path comparison key: separators unified to `/`.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub document_id: DocumentId,
    pub position: usize,
    pub percentage: f64,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub marks: BTreeMap<char, Mark>,
}

/// A named spot in a document, recalled by its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    pub position: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(document_id: DocumentId, position: usize, total_length: usize) -> Self {
        Self {
            document_id,
            position,
            percentage: percentage(position, total_length),
            last_accessed_at: Utc::now(),
            marks: BTreeMap::new(),
        }
    }
}

fn percentage(position: usize, total_length: usize) -> f64 {
    if total_length == 0 {
        return 0.0;
    }
    position as f64 / total_length as f64 * 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub document_id: DocumentId,
    pub title: String,
    pub format: DocumentFormat,
    pub file_size: u64,
    pub total_length: usize,
    pub file_path: Option<String>,
    pub progress: Session,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_content: Option<String>,
}

impl HistoryEntry {
    pub fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            title: self.title.clone(),
            format: self.format,
            file_size: self.file_size,
        }
    }

    fn matches_path(&self, normalized: &str) -> bool {
        self.file_path
            .as_deref()
            .is_some_and(|path| normalize_path(path) == normalized)
    }
}

/// The document that was open when the process last ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentDocument {
    pub id: DocumentId,
    pub content: String,
    pub metadata: DocumentMetadata,
    pub file_path: Option<PathBuf>,
}

impl CurrentDocument {
    pub fn from_document(document: &Document, file_path: Option<&Path>) -> Self {
        Self {
            id: document.id(),
            content: document.content().to_string(),
            metadata: document.metadata().clone(),
            file_path: file_path.map(Path::to_path_buf),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_items: usize,
    pub retention_days: u32,
    pub auto_cleanup: bool,
    /// Keep a copy of the content even when the file can be re-read.
    pub cache_content: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_items: 50,
            retention_days: 30,
            auto_cleanup: true,
            cache_content: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistorySort {
    #[default]
    LastAccessed,
    Title,
    Progress,
    CreatedAt,
}

pub struct SessionStore {
    kv: Arc<dyn KeyValueStore>,
    config: HistoryConfig,
    history: Vec<HistoryEntry>,
    sessions: HashMap<DocumentId, Session>,
    persisted_positions: HashMap<DocumentId, usize>,
}

impl SessionStore {
    /// Loads the history list. A malformed list is discarded.
    pub fn open(kv: Arc<dyn KeyValueStore>, config: HistoryConfig) -> Result<Self> {
        let history = match get_json::<Vec<HistoryEntry>>(kv.as_ref(), HISTORY_KEY) {
            Ok(history) => history.unwrap_or_default(),
            Err(err) => {
                warn!(?err, "discarding malformed history list");
                Vec::new()
            }
        };
        let mut store = Self {
            kv,
            config,
            history,
            sessions: HashMap::new(),
            persisted_positions: HashMap::new(),
        };
        if store.config.auto_cleanup {
            store.cleanup_expired(Utc::now())?;
        }
        Ok(store)
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// The saved session for `document_id`. A record that fails to decode
    /// is removed and treated as absent.
    pub fn session(&mut self, document_id: DocumentId) -> Result<Option<Session>> {
        if let Some(session) = self.sessions.get(&document_id) {
            return Ok(Some(session.clone()));
        }
        let key = session_key(document_id);
        match get_json::<Session>(self.kv.as_ref(), &key) {
            Ok(Some(session)) => {
                self.persisted_positions.insert(document_id, session.position);
                self.sessions.insert(document_id, session.clone());
                Ok(Some(session))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                warn!(?err, %document_id, "discarding malformed session");
                self.kv.remove(&key)?;
                Ok(None)
            }
        }
    }

    /// Updates the in-memory session only; [`Self::record_position`]
    /// persists it.
    pub fn note_position(&mut self, document_id: DocumentId, position: usize, total_length: usize) {
        let session = self
            .sessions
            .entry(document_id)
            .or_insert_with(|| Session::new(document_id, position, total_length));
        session.position = position;
        session.percentage = percentage(position, total_length);
        session.last_accessed_at = Utc::now();
    }

    /// Persists the session and refreshes the history entry. Returns `false`
    /// without writing when this position was already persisted.
    pub fn record_position(
        &mut self,
        document_id: DocumentId,
        position: usize,
        total_length: usize,
    ) -> Result<bool> {
        self.session(document_id)?;
        if self.persisted_positions.get(&document_id) == Some(&position) {
            return Ok(false);
        }
        self.note_position(document_id, position, total_length);
        let Some(session) = self.sessions.get(&document_id).cloned() else {
            return Ok(false);
        };
        set_json(self.kv.as_ref(), &session_key(document_id), &session)?;
        self.persisted_positions.insert(document_id, position);

        if let Some(index) = self.history_index(document_id) {
            let mut entry = self.history.remove(index);
            entry.progress = session.clone();
            entry.total_length = total_length;
            entry.last_accessed_at = session.last_accessed_at;
            entry.is_completed = session.percentage >= COMPLETED_PERCENTAGE;
            self.history.insert(0, entry);
            self.persist_history()?;
        }
        debug!(%document_id, position, "recorded position");
        Ok(true)
    }

    /// Records `position` under `key`. Replacing a mark keeps its creation
    /// time.
    pub fn set_mark(
        &mut self,
        document_id: DocumentId,
        key: char,
        position: usize,
        total_length: usize,
        label: Option<String>,
    ) -> Result<Mark> {
        self.session(document_id)?;
        let now = Utc::now();
        let session = self
            .sessions
            .entry(document_id)
            .or_insert_with(|| Session::new(document_id, position, total_length));
        let created_at = session.marks.get(&key).map_or(now, |mark| mark.created_at);
        let mark = Mark {
            position,
            label,
            created_at,
            updated_at: now,
        };
        session.marks.insert(key, mark.clone());
        self.persist_session(document_id)?;
        debug!(%document_id, %key, position, "mark set");
        Ok(mark)
    }

    pub fn mark(&mut self, document_id: DocumentId, key: char) -> Result<Option<Mark>> {
        Ok(self
            .session(document_id)?
            .and_then(|session| session.marks.get(&key).cloned()))
    }

    /// Every mark of the document, newest first.
    pub fn marks(&mut self, document_id: DocumentId) -> Result<Vec<(char, Mark)>> {
        let mut marks: Vec<(char, Mark)> = self
            .session(document_id)?
            .map(|session| session.marks.into_iter().collect())
            .unwrap_or_default();
        marks.sort_by(|(a_key, a), (b_key, b)| {
            b.created_at.cmp(&a.created_at).then(a_key.cmp(b_key))
        });
        Ok(marks)
    }

    /// Replaces the label of an existing mark. `false` when there is none.
    pub fn relabel_mark(
        &mut self,
        document_id: DocumentId,
        key: char,
        label: Option<String>,
    ) -> Result<bool> {
        self.session(document_id)?;
        let Some(mark) = self
            .sessions
            .get_mut(&document_id)
            .and_then(|session| session.marks.get_mut(&key))
        else {
            return Ok(false);
        };
        mark.label = label;
        mark.updated_at = Utc::now();
        self.persist_session(document_id)?;
        Ok(true)
    }

    pub fn remove_mark(&mut self, document_id: DocumentId, key: char) -> Result<bool> {
        self.session(document_id)?;
        let removed = self
            .sessions
            .get_mut(&document_id)
            .and_then(|session| session.marks.remove(&key))
            .is_some();
        if removed {
            self.persist_session(document_id)?;
            debug!(%document_id, %key, "mark removed");
        }
        Ok(removed)
    }

    fn persist_session(&mut self, document_id: DocumentId) -> Result<()> {
        let Some(session) = self.sessions.get(&document_id) else {
            return Ok(());
        };
        set_json(self.kv.as_ref(), &session_key(document_id), session)?;
        self.persisted_positions.insert(document_id, session.position);
        Ok(())
    }

    /// Inserts or refreshes the history entry for `document`. An existing
    /// entry is found by file path, then title and size, then id; its id,
    /// progress and creation time are kept.
    pub fn upsert_history(
        &mut self,
        document: &Document,
        file_path: Option<&Path>,
    ) -> Result<HistoryEntry> {
        let now = Utc::now();
        let file_path = file_path.map(|path| path.to_string_lossy().into_owned());
        let metadata = document.metadata();

        let existing = file_path
            .as_deref()
            .map(normalize_path)
            .and_then(|normalized| self.history.iter().position(|e| e.matches_path(&normalized)))
            .or_else(|| {
                self.history.iter().position(|e| {
                    e.title == metadata.title && e.file_size == metadata.file_size
                })
            })
            .or_else(|| self.history_index(document.id()));

        let cache = self.config.cache_content || file_path.is_none();
        let cached_content = cache.then(|| document.content().to_string());

        let entry = match existing {
            Some(index) => {
                let previous = self.history.remove(index);
                HistoryEntry {
                    title: metadata.title.clone(),
                    format: metadata.format,
                    file_size: metadata.file_size,
                    total_length: document.total_length(),
                    file_path: file_path.or(previous.file_path),
                    last_accessed_at: now,
                    cached_content,
                    ..previous
                }
            }
            None => HistoryEntry {
                document_id: document.id(),
                title: metadata.title.clone(),
                format: metadata.format,
                file_size: metadata.file_size,
                total_length: document.total_length(),
                file_path,
                progress: Session::new(document.id(), 0, document.total_length()),
                created_at: now,
                last_accessed_at: now,
                is_completed: false,
                cached_content,
            },
        };
        self.history.insert(0, entry.clone());

        if self.config.auto_cleanup {
            self.evict_expired(now);
        }
        self.history.truncate(self.config.max_items);
        self.persist_history()?;
        Ok(entry)
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn get(&self, document_id: DocumentId) -> Option<&HistoryEntry> {
        self.history.iter().find(|e| e.document_id == document_id)
    }

    pub fn find_by_path(&self, path: &Path) -> Option<&HistoryEntry> {
        let normalized = normalize_path(&path.to_string_lossy());
        self.history.iter().find(|e| e.matches_path(&normalized))
    }

    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let mut entries = self.sorted(HistorySort::LastAccessed);
        entries.truncate(limit);
        entries
    }

    pub fn sorted(&self, by: HistorySort) -> Vec<HistoryEntry> {
        let mut entries = self.history.clone();
        match by {
            HistorySort::LastAccessed => {
                entries.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at))
            }
            HistorySort::Title => entries.sort_by(|a, b| a.title.cmp(&b.title)),
            HistorySort::Progress => entries.sort_by(|a, b| {
                b.progress
                    .percentage
                    .partial_cmp(&a.progress.percentage)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            HistorySort::CreatedAt => entries.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
        entries
    }

    /// Case-insensitive title search; an empty keyword matches everything.
    pub fn search(&self, keyword: &str) -> Vec<HistoryEntry> {
        let keyword = keyword.trim().to_lowercase();
        self.history
            .iter()
            .filter(|e| keyword.is_empty() || e.title.to_lowercase().contains(&keyword))
            .cloned()
            .collect()
    }

    /// Forgets the entry and its saved session.
    pub fn remove_history(&mut self, document_id: DocumentId) -> Result<bool> {
        let Some(index) = self.history_index(document_id) else {
            return Ok(false);
        };
        self.history.remove(index);
        self.sessions.remove(&document_id);
        self.persisted_positions.remove(&document_id);
        self.kv.remove(&session_key(document_id))?;
        self.persist_history()?;
        Ok(true)
    }

    pub fn clear_history(&mut self) -> Result<()> {
        self.history.clear();
        self.persist_history()
    }

    /// Drops entries not accessed within the retention window.
    pub fn cleanup_expired(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.evict_expired(now);
        if removed > 0 {
            self.persist_history()?;
        }
        Ok(removed)
    }

    pub fn save_current_document(&self, current: &CurrentDocument) -> Result<()> {
        set_json(self.kv.as_ref(), CURRENT_DOCUMENT_KEY, current)
    }

    /// The last open document, or `None` when absent or unreadable.
    pub fn load_current_document(&self) -> Result<Option<CurrentDocument>> {
        match get_json::<CurrentDocument>(self.kv.as_ref(), CURRENT_DOCUMENT_KEY) {
            Ok(current) => Ok(current),
            Err(err) => {
                warn!(?err, "discarding malformed current document");
                self.kv.remove(CURRENT_DOCUMENT_KEY)?;
                Ok(None)
            }
        }
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::days(i64::from(self.config.retention_days));
        let before = self.history.len();
        self.history.retain(|e| e.last_accessed_at >= cutoff);
        before - self.history.len()
    }

    fn history_index(&self, document_id: DocumentId) -> Option<usize> {
        self.history.iter().position(|e| e.document_id == document_id)
    }

    fn persist_history(&self) -> Result<()> {
        set_json(self.kv.as_ref(), HISTORY_KEY, &self.history)
    }
}

/// Deadline-based autosave, polled from the host loop.
#[derive(Debug, Clone)]
pub struct AutosaveTimer {
    interval: Duration,
    next_due: Option<Instant>,
}

impl AutosaveTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn arm(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    /// Returns `true` once per elapsed interval while armed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }
}
