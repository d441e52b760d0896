use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::buffer::{EditorBuffer, MemoryBuffer};
use crate::chapters::{find_chapter_by_position, Chapter, ChapterIndexer};
use crate::composition::{CleanupOutcome, CleanupTicket, CompositionInterceptor};
use crate::config::ReaderConfig;
use crate::engine::{Key, KeystrokeOutcome, OutputMode, ReadingStatistics, RevealEngine, RevealState};
use crate::restore::RestorationGate;
use crate::session::{AutosaveTimer, CurrentDocument, Mark, SessionStore};
use crate::{Document, DocumentId};

pub type SharedReader<B = MemoryBuffer> = Arc<Mutex<Reader<B>>>;

#[derive(Debug, Clone, PartialEq)]
pub enum ReaderEvent {
    StateChanged(RevealState),
    PositionChanged { document_id: DocumentId, position: usize },
    /// The document ran out while reading.
    Completed(DocumentId),
    PositionClamped { requested: usize, clamped: usize },
    /// A percentage jump outside `0..=100` was ignored.
    PercentageRejected(f64),
    /// The committed IME text was not found in the buffer.
    CompositionMismatch { position: usize },
    ChunkSizeRejected(usize),
    PasteRejected,
    DocumentLoaded(DocumentId),
    DocumentRestored { document_id: DocumentId, position: usize },
    /// A "document loaded" reset arrived while a restoration was in flight.
    BufferResetSkipped(DocumentId),
    RedrawNeeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartReading,
    PauseReading,
    ResumeReading,
    TogglePause,
    StopReading,
    Reset,
    JumpToPosition { position: usize },
    JumpToPercentage { percent: u8 },
    JumpToStart,
    JumpToEnd,
    JumpToChapter { index: usize },
    NextChapter,
    PrevChapter,
    PutMark { key: char },
    GotoMark { key: char },
    RemoveMark { key: char },
    SetChunkSize { size: usize },
    SetOutputMode { mode: OutputMode },
    ReparseChapters,
    SaveProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteDecision {
    Accept,
    Reject,
}

/// Owns the engine, the visible buffer and the session store for the one
/// open document. All mutation happens on the host's event loop.
pub struct Reader<B: EditorBuffer = MemoryBuffer> {
    config: ReaderConfig,
    engine: RevealEngine,
    composition: CompositionInterceptor,
    buffer: B,
    sessions: SessionStore,
    indexer: ChapterIndexer,
    chapters: Vec<Chapter>,
    selected_chapter: Option<usize>,
    file_path: Option<PathBuf>,
    autosave: AutosaveTimer,
    gate: RestorationGate,
    events: Arc<Mutex<Vec<ReaderEvent>>>,
}

impl<B: EditorBuffer> Reader<B> {
    pub fn new(config: ReaderConfig, sessions: SessionStore, buffer: B) -> Self {
        let config = config.validated();
        Self {
            engine: RevealEngine::new(config.chunk_size),
            composition: CompositionInterceptor::new(),
            buffer,
            sessions,
            indexer: ChapterIndexer::new(config.chapters.clone()),
            chapters: Vec::new(),
            selected_chapter: None,
            file_path: None,
            autosave: AutosaveTimer::new(config.autosave_interval),
            gate: RestorationGate::new(),
            events: Arc::new(Mutex::new(Vec::new())),
            config,
        }
    }

    pub fn into_shared(self) -> SharedReader<B> {
        Arc::new(Mutex::new(self))
    }

    pub fn events(&self) -> Arc<Mutex<Vec<ReaderEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn drain_events(&self) -> Vec<ReaderEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn engine(&self) -> &RevealEngine {
        &self.engine
    }

    pub fn state(&self) -> RevealState {
        self.engine.state()
    }

    pub fn position(&self) -> usize {
        self.engine.position()
    }

    pub fn statistics(&self) -> &ReadingStatistics {
        self.engine.statistics()
    }

    pub fn document(&self) -> Option<&Document> {
        self.engine.document()
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// For the host's own insertions, such as committed IME text.
    pub fn buffer_mut(&mut self) -> &mut B {
        &mut self.buffer
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut SessionStore {
        &mut self.sessions
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    /// The explicitly selected chapter, else the one containing the position.
    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.selected_chapter
            .and_then(|index| self.chapters.get(index))
            .or_else(|| find_chapter_by_position(&self.chapters, self.position()))
    }

    pub fn restoration_gate(&self) -> RestorationGate {
        self.gate.clone()
    }

    pub fn is_restoring(&self) -> bool {
        self.gate.is_restoring()
    }

    pub fn start_reading(&mut self) -> bool {
        if !self.engine.start() {
            return false;
        }
        if self.config.autosave {
            self.autosave.arm(Instant::now());
        }
        self.emit(ReaderEvent::StateChanged(RevealState::Reading));
        true
    }

    pub fn pause_reading(&mut self) -> Result<bool> {
        if !self.engine.pause() {
            return Ok(false);
        }
        self.leave_reading();
        self.emit(ReaderEvent::StateChanged(RevealState::Paused));
        self.save_progress()?;
        Ok(true)
    }

    pub fn resume_reading(&mut self) -> bool {
        if !self.engine.resume() {
            return false;
        }
        if self.config.autosave {
            self.autosave.arm(Instant::now());
        }
        self.emit(ReaderEvent::StateChanged(RevealState::Reading));
        true
    }

    pub fn toggle_pause(&mut self) -> Result<bool> {
        match self.state() {
            RevealState::Reading => self.pause_reading(),
            RevealState::Paused => Ok(self.resume_reading()),
            _ => Ok(false),
        }
    }

    /// Returns `false`, writing nothing, when already stopped.
    pub fn stop_reading(&mut self) -> Result<bool> {
        if !self.engine.stop() {
            return Ok(false);
        }
        self.leave_reading();
        self.emit(ReaderEvent::StateChanged(RevealState::Stopped));
        self.save_progress()?;
        Ok(true)
    }

    /// Only from `Stopped`; returns `false` otherwise.
    pub fn reset(&mut self) -> bool {
        if !self.engine.reset() {
            return false;
        }
        self.leave_reading();
        self.emit(ReaderEvent::StateChanged(RevealState::Idle));
        true
    }

    pub fn on_keystroke(&mut self, key: Key) -> KeystrokeOutcome {
        let outcome = self.engine.on_keystroke(key, &mut self.buffer);
        match &outcome {
            KeystrokeOutcome::Revealed {
                position, completed, ..
            } => {
                self.position_moved(*position);
                if *completed {
                    self.complete();
                }
            }
            KeystrokeOutcome::Retracted { position } => self.position_moved(*position),
            KeystrokeOutcome::Ignored(reason) => debug!(?key, ?reason, "keystroke ignored"),
        }
        outcome
    }

    pub fn on_composition_start(&mut self, text: &str) {
        self.composition.start(&mut self.engine, text);
    }

    pub fn on_composition_update(&mut self, text: &str) {
        self.composition.update(text);
    }

    /// Schedules the cleanup; the host must call [`Self::run_deferred`]
    /// after inserting `composed` itself.
    pub fn on_composition_end(&mut self, composed: &str) -> Option<CleanupTicket> {
        self.composition.end(&mut self.engine, composed)
    }

    pub fn has_deferred(&self) -> bool {
        self.composition.has_pending()
    }

    pub fn run_deferred(&mut self) -> CleanupOutcome {
        let outcome = self.composition.flush(&mut self.engine, &mut self.buffer);
        if let CleanupOutcome::Revealed {
            position,
            completed,
            matched,
            ..
        } = &outcome
        {
            if !matched {
                self.emit(ReaderEvent::CompositionMismatch {
                    position: *position,
                });
            }
            self.position_moved(*position);
            if *completed {
                self.complete();
            }
        }
        outcome
    }

    pub fn on_paste(&mut self, _text: &str) -> PasteDecision {
        if self.engine.is_reading() {
            self.emit(ReaderEvent::PasteRejected);
            return PasteDecision::Reject;
        }
        PasteDecision::Accept
    }

    /// Rewrites the buffer to `content[..position]`. Out-of-range requests
    /// are clamped. Returns the resulting position.
    pub fn jump_to_position(&mut self, position: usize) -> usize {
        let Some(document) = self.engine.document() else {
            return 0;
        };
        let clamped = document.clamp(position);
        if clamped != position {
            self.emit(ReaderEvent::PositionClamped {
                requested: position,
                clamped,
            });
        }
        self.composition.cancel();
        self.engine.seek(clamped);
        self.sync_buffer();
        self.position_moved(clamped);
        self.emit(ReaderEvent::RedrawNeeded);
        clamped
    }

    /// Jumps to `percent` of the document, rounded down to a whole
    /// character. Values outside `0..=100` are rejected, not clamped.
    pub fn jump_to_percentage(&mut self, percent: f64) -> Option<usize> {
        let total = self.engine.document()?.total_length();
        if !(0.0..=100.0).contains(&percent) {
            warn!(percent, "ignoring percentage outside 0..=100");
            self.emit(ReaderEvent::PercentageRejected(percent));
            return None;
        }
        let position = (percent / 100.0 * total as f64).floor() as usize;
        Some(self.jump_to_position(position))
    }

    pub fn jump_to_start(&mut self) -> usize {
        self.jump_to_position(0)
    }

    pub fn jump_to_end(&mut self) -> usize {
        self.jump_to_position(self.engine.total_length())
    }

    pub fn jump_to_chapter(&mut self, index: usize) -> Option<usize> {
        let start = self.chapters.get(index)?.start_position;
        let position = self.jump_to_position(start);
        self.selected_chapter = Some(index);
        Some(position)
    }

    pub fn next_chapter(&mut self) -> Option<usize> {
        let position = self.position();
        let target = match self.current_chapter() {
            Some(chapter) => chapter.index + 1,
            None => self
                .chapters
                .iter()
                .find(|chapter| chapter.start_position > position)?
                .index,
        };
        self.jump_to_chapter(target)
    }

    pub fn prev_chapter(&mut self) -> Option<usize> {
        let target = self.current_chapter()?.index.checked_sub(1)?;
        self.jump_to_chapter(target)
    }

    pub fn put_mark(&mut self, key: char) -> Result<()> {
        self.record_mark(key, None)
    }

    pub fn put_labeled_mark(&mut self, key: char, label: impl Into<String>) -> Result<()> {
        self.record_mark(key, Some(label.into()))
    }

    fn record_mark(&mut self, key: char, label: Option<String>) -> Result<()> {
        let Some(document) = self.engine.document() else {
            return Ok(());
        };
        let (id, total) = (document.id(), document.total_length());
        let position = self.position();
        self.sessions.set_mark(id, key, position, total, label)?;
        Ok(())
    }

    pub fn goto_mark(&mut self, key: char) -> Result<Option<usize>> {
        let Some(id) = self.engine.document().map(Document::id) else {
            return Ok(None);
        };
        match self.sessions.mark(id, key)? {
            Some(mark) => Ok(Some(self.jump_to_position(mark.position))),
            None => Ok(None),
        }
    }

    /// Marks of the open document, newest first.
    pub fn marks(&mut self) -> Result<Vec<(char, Mark)>> {
        match self.engine.document().map(Document::id) {
            Some(id) => self.sessions.marks(id),
            None => Ok(Vec::new()),
        }
    }

    pub fn relabel_mark(&mut self, key: char, label: Option<String>) -> Result<bool> {
        match self.engine.document().map(Document::id) {
            Some(id) => self.sessions.relabel_mark(id, key, label),
            None => Ok(false),
        }
    }

    pub fn remove_mark(&mut self, key: char) -> Result<bool> {
        match self.engine.document().map(Document::id) {
            Some(id) => self.sessions.remove_mark(id, key),
            None => Ok(false),
        }
    }

    pub fn set_chunk_size(&mut self, size: usize) -> bool {
        if self.engine.set_chunk_size(size) {
            return true;
        }
        warn!(size, "ignoring chunk size outside 1..=100");
        self.emit(ReaderEvent::ChunkSizeRejected(size));
        false
    }

    pub fn set_output_mode(&mut self, mode: OutputMode) {
        self.engine.set_output_mode(mode);
    }

    pub fn reparse_chapters(&mut self) {
        self.chapters = self
            .engine
            .document()
            .map(|document| self.indexer.index(document.content()))
            .unwrap_or_default();
        self.selected_chapter = None;
        self.emit(ReaderEvent::RedrawNeeded);
    }

    /// Persists the current position. `false` when nothing was written.
    pub fn save_progress(&mut self) -> Result<bool> {
        let Some(document) = self.engine.document() else {
            return Ok(false);
        };
        let (id, total) = (document.id(), document.total_length());
        let position = self.position();
        self.sessions.record_position(id, position, total)
    }

    /// Drives the autosave timer; returns `true` when it fired.
    pub fn tick(&mut self, now: Instant) -> Result<bool> {
        if !self.engine.is_reading() || !self.autosave.poll(now) {
            return Ok(false);
        }
        self.save_progress()?;
        Ok(true)
    }

    /// Fresh load at position 0. Rebinds to an existing history entry's id
    /// when the file is already known.
    pub fn load_document(&mut self, document: Document, file_path: Option<PathBuf>) -> Result<()> {
        let entry = self.sessions.upsert_history(&document, file_path.as_deref())?;
        let document = if entry.document_id != document.id() {
            document.with_id(entry.document_id)
        } else {
            document
        };
        self.sessions
            .save_current_document(&CurrentDocument::from_document(&document, file_path.as_deref()))?;

        self.leave_reading();
        self.chapters = self.indexer.index(document.content());
        self.selected_chapter = None;
        let id = document.id();
        info!(%id, title = document.title(), chapters = self.chapters.len(), "document loaded");
        self.engine.load(document);
        self.file_path = file_path;
        self.emit(ReaderEvent::DocumentLoaded(id));
        self.emit(ReaderEvent::StateChanged(RevealState::Idle));
        self.notify_document_loaded();
        Ok(())
    }

    /// Reaction to a newly loaded document: clear the visible buffer. While a
    /// restoration is in flight the reset is skipped.
    pub fn notify_document_loaded(&mut self) {
        let id = self.engine.document().map(Document::id).unwrap_or_default();
        if self.gate.is_restoring() {
            debug!(%id, "restoration in flight, keeping buffer");
            self.emit(ReaderEvent::BufferResetSkipped(id));
            return;
        }
        self.buffer.clear();
        self.buffer.force_cursor_to_end();
        self.emit(ReaderEvent::RedrawNeeded);
    }

    /// Installs restored content directly, bypassing the reveal path.
    pub(crate) fn install_restored(
        &mut self,
        document: Document,
        chapters: Vec<Chapter>,
        saved_position: usize,
        file_path: Option<PathBuf>,
    ) -> Result<(DocumentId, usize)> {
        let entry = self.sessions.upsert_history(&document, file_path.as_deref())?;
        let document = if entry.document_id != document.id() {
            document.with_id(entry.document_id)
        } else {
            document
        };
        self.sessions
            .save_current_document(&CurrentDocument::from_document(&document, file_path.as_deref()))?;

        self.leave_reading();
        let id = document.id();
        self.engine.load(document);
        let position = self.engine.seek(saved_position);
        if position != saved_position {
            self.emit(ReaderEvent::PositionClamped {
                requested: saved_position,
                clamped: position,
            });
        }
        self.chapters = chapters;
        self.selected_chapter = None;
        self.file_path = file_path;
        self.sync_buffer();

        let total = self.engine.total_length();
        if let Err(err) = self.sessions.record_position(id, position, total) {
            warn!(?err, %id, "failed to record restored position");
        }
        self.emit(ReaderEvent::DocumentRestored {
            document_id: id,
            position,
        });
        self.emit(ReaderEvent::RedrawNeeded);
        Ok((id, position))
    }

    pub fn apply(&mut self, command: Command) -> Result<()> {
        match command {
            Command::StartReading => {
                self.start_reading();
            }
            Command::PauseReading => {
                self.pause_reading()?;
            }
            Command::ResumeReading => {
                self.resume_reading();
            }
            Command::TogglePause => {
                self.toggle_pause()?;
            }
            Command::StopReading => {
                self.stop_reading()?;
            }
            Command::Reset => {
                self.reset();
            }
            Command::JumpToPosition { position } => {
                self.jump_to_position(position);
            }
            Command::JumpToPercentage { percent } => {
                self.jump_to_percentage(f64::from(percent));
            }
            Command::JumpToStart => {
                self.jump_to_start();
            }
            Command::JumpToEnd => {
                self.jump_to_end();
            }
            Command::JumpToChapter { index } => {
                self.jump_to_chapter(index);
            }
            Command::NextChapter => {
                self.next_chapter();
            }
            Command::PrevChapter => {
                self.prev_chapter();
            }
            Command::PutMark { key } => self.put_mark(key)?,
            Command::GotoMark { key } => {
                self.goto_mark(key)?;
            }
            Command::RemoveMark { key } => {
                self.remove_mark(key)?;
            }
            Command::SetChunkSize { size } => {
                self.set_chunk_size(size);
            }
            Command::SetOutputMode { mode } => self.set_output_mode(mode),
            Command::ReparseChapters => self.reparse_chapters(),
            Command::SaveProgress => {
                self.save_progress()?;
            }
        }
        Ok(())
    }

    fn sync_buffer(&mut self) {
        let prefix = self
            .engine
            .document()
            .map(|document| document.prefix(self.engine.position()))
            .unwrap_or("");
        self.buffer.replace_all(prefix);
        self.buffer.force_cursor_to_end();
    }

    fn position_moved(&mut self, position: usize) {
        let Some(document) = self.engine.document() else {
            return;
        };
        let (id, total) = (document.id(), document.total_length());
        self.sessions.note_position(id, position, total);
        if let Some(selected) = self.selected_chapter {
            if !self.chapters.get(selected).is_some_and(|c| c.contains(position)) {
                self.selected_chapter = None;
            }
        }
        self.emit(ReaderEvent::PositionChanged {
            document_id: id,
            position,
        });
    }

    fn complete(&mut self) {
        self.leave_reading();
        let id = self.engine.document().map(Document::id).unwrap_or_default();
        info!(%id, "document completed");
        if let Err(err) = self.save_progress() {
            warn!(?err, %id, "failed to record completed position");
        }
        self.emit(ReaderEvent::StateChanged(RevealState::Stopped));
        self.emit(ReaderEvent::Completed(id));
    }

    /// Cancels everything that only makes sense while reading.
    fn leave_reading(&mut self) {
        self.autosave.cancel();
        if self.composition.cancel() {
            debug!("dropped pending composition cleanup");
        }
    }

    fn emit(&self, event: ReaderEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::HistoryConfig;
    use crate::store::MemoryKeyValueStore;
    use crate::DocumentMetadata;
    use std::time::Duration;
    use uuid::Uuid;

    fn reader_with(kv: Arc<MemoryKeyValueStore>, chunk_size: usize) -> Reader {
        let sessions = SessionStore::open(kv, HistoryConfig::default()).unwrap();
        let config = ReaderConfig {
            chunk_size,
            ..ReaderConfig::default()
        };
        Reader::new(config, sessions, MemoryBuffer::new())
    }

    fn document(content: &str) -> Document {
        Document::new(
            Uuid::new_v4(),
            content,
            DocumentMetadata {
                title: "Test".into(),
                ..DocumentMetadata::default()
            },
        )
    }

    fn assert_mirrors(reader: &Reader) {
        let document = reader.document().unwrap();
        assert_eq!(reader.buffer().text(), document.prefix(reader.position()));
        assert_eq!(reader.buffer().cursor(), reader.position());
    }

    #[test]
    fn stopping_twice_writes_once() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv.clone(), 5);
        reader.load_document(document("abcdefghijkl"), None).unwrap();
        reader.start_reading();
        reader.on_keystroke(Key::Char('a'));

        assert!(reader.stop_reading().unwrap());
        let writes = kv.write_count();
        assert!(!reader.stop_reading().unwrap());
        assert_eq!(reader.state(), RevealState::Stopped);
        assert_eq!(kv.write_count(), writes);
    }

    #[test]
    fn buffer_mirrors_position_through_reveals_and_backspace() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 3);
        reader.load_document(document("ABCDEFGHIJ"), None).unwrap();
        reader.start_reading();

        for key in [Key::Char('a'), Key::Char('b'), Key::Backspace, Key::Left, Key::Char('c')] {
            reader.on_keystroke(key);
            assert_mirrors(&reader);
        }
        assert_eq!(reader.position(), 8);
    }

    #[test]
    fn composition_end_is_applied_on_the_next_turn() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 3);
        reader.load_document(document("ABCDEFGHIJ"), None).unwrap();
        reader.start_reading();
        reader.on_keystroke(Key::Char('a'));

        reader.on_composition_start("h");
        assert_eq!(reader.on_keystroke(Key::Char('h')).revealed(), None);
        reader.on_composition_update("he");
        reader.on_composition_end("和");
        reader.buffer_mut().append("和");
        assert!(reader.has_deferred());

        reader.run_deferred();
        assert_eq!(reader.buffer().text(), "ABCD");
        assert_mirrors(&reader);
    }

    #[test]
    fn compositions_ending_before_the_next_turn_never_leak_into_the_buffer() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 5);
        reader.load_document(document("ABCDEFGHIJ"), None).unwrap();
        reader.start_reading();

        reader.on_composition_start("ni");
        reader.on_composition_end("你");
        reader.buffer_mut().append("你");
        reader.on_composition_start("hao");
        reader.on_composition_end("好");
        reader.buffer_mut().append("好");

        reader.run_deferred();
        reader.run_deferred();
        assert_eq!(reader.buffer().text(), "AB");
        assert_eq!(reader.position(), 2);
        assert_mirrors(&reader);
    }

    #[test]
    fn pausing_cancels_pending_composition_cleanup() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 3);
        reader.load_document(document("ABCDEFGHIJ"), None).unwrap();
        reader.start_reading();
        reader.on_composition_end("和");
        reader.pause_reading().unwrap();

        assert!(!reader.has_deferred());
        assert_eq!(reader.run_deferred(), CleanupOutcome::Nothing);
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn paste_is_rejected_only_while_reading() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 3);
        reader.load_document(document("ABCDEFGHIJ"), None).unwrap();
        assert_eq!(reader.on_paste("x"), PasteDecision::Accept);
        reader.start_reading();
        assert_eq!(reader.on_paste("x"), PasteDecision::Reject);
        assert!(reader.drain_events().contains(&ReaderEvent::PasteRejected));
    }

    #[test]
    fn autosave_fires_while_reading_and_stops_on_pause() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv.clone(), 3);
        reader.load_document(document("ABCDEFGHIJ"), None).unwrap();
        reader.start_reading();
        reader.on_keystroke(Key::Char('a'));

        let later = Instant::now() + Duration::from_secs(6);
        assert!(reader.tick(later).unwrap());
        let id = reader.document().unwrap().id();
        let saved = reader.sessions_mut().session(id).unwrap().unwrap();
        assert_eq!(saved.position, 3);

        reader.on_keystroke(Key::Char('a'));
        reader.pause_reading().unwrap();
        let writes = kv.write_count();
        assert!(!reader.tick(later + Duration::from_secs(60)).unwrap());
        assert_eq!(kv.write_count(), writes);
    }

    #[test]
    fn completion_stops_and_marks_history() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 5);
        reader.load_document(document("abcdefghijkl"), None).unwrap();
        reader.start_reading();
        reader.drain_events();
        for _ in 0..3 {
            reader.on_keystroke(Key::Enter);
        }
        let id = reader.document().unwrap().id();
        assert_eq!(reader.state(), RevealState::Stopped);
        assert!(reader.drain_events().contains(&ReaderEvent::Completed(id)));
        assert!(reader.sessions().get(id).unwrap().is_completed);
    }

    #[test]
    fn jumps_clamp_and_resync_buffer() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 3);
        reader.load_document(document("ABCDEFGHIJ"), None).unwrap();
        reader.drain_events();

        assert_eq!(reader.jump_to_position(4), 4);
        assert_mirrors(&reader);
        assert_eq!(reader.jump_to_position(40), 10);
        assert_mirrors(&reader);
        assert!(reader.drain_events().contains(&ReaderEvent::PositionClamped {
            requested: 40,
            clamped: 10
        }));
    }

    #[test]
    fn chapter_navigation_walks_spans() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 5);
        let content = format!(
            "Chapter 1\n{}\nChapter 2\n{}\nChapter 3\n{}",
            "a".repeat(120),
            "b".repeat(120),
            "c".repeat(120)
        );
        reader.load_document(document(&content), None).unwrap();
        assert_eq!(reader.chapters().len(), 3);
        let second = reader.chapters()[1].start_position;
        let third = reader.chapters()[2].start_position;

        assert_eq!(reader.next_chapter(), Some(second));
        assert_eq!(reader.next_chapter(), Some(third));
        assert_eq!(reader.next_chapter(), None);
        assert_eq!(reader.prev_chapter(), Some(second));
        assert_eq!(reader.current_chapter().map(|c| c.index), Some(1));
        assert_mirrors(&reader);

        reader.apply(Command::JumpToChapter { index: 0 }).unwrap();
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.prev_chapter(), None);
    }

    #[test]
    fn marks_round_trip_through_commands() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 3);
        reader.load_document(document("ABCDEFGHIJ"), None).unwrap();
        reader.jump_to_position(6);
        reader.apply(Command::PutMark { key: 'a' }).unwrap();
        reader.jump_to_position(1);

        reader.apply(Command::GotoMark { key: 'a' }).unwrap();
        assert_eq!(reader.position(), 6);
        assert_eq!(reader.goto_mark('z').unwrap(), None);
        assert_eq!(reader.position(), 6);
    }

    #[test]
    fn marks_can_be_labelled_listed_and_removed() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 3);
        assert!(reader.marks().unwrap().is_empty());
        reader.load_document(document("ABCDEFGHIJ"), None).unwrap();

        reader.jump_to_position(2);
        reader.put_labeled_mark('a', "opening").unwrap();
        reader.jump_to_position(8);
        reader.put_mark('b').unwrap();
        assert!(reader.relabel_mark('b', Some("ending".into())).unwrap());

        let mut marks: Vec<_> = reader
            .marks()
            .unwrap()
            .into_iter()
            .map(|(key, mark)| (key, mark.position, mark.label))
            .collect();
        marks.sort_by_key(|(key, ..)| *key);
        assert_eq!(
            marks,
            vec![
                ('a', 2, Some("opening".to_string())),
                ('b', 8, Some("ending".to_string()))
            ]
        );

        reader.apply(Command::RemoveMark { key: 'a' }).unwrap();
        assert_eq!(reader.goto_mark('a').unwrap(), None);
        assert!(!reader.remove_mark('a').unwrap());
        assert_eq!(reader.marks().unwrap().len(), 1);
    }

    #[test]
    fn percentage_and_edge_jumps_resync_buffer() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 3);
        assert_eq!(reader.jump_to_percentage(50.0), None);
        reader.load_document(document("ABCDEFGHIJK"), None).unwrap();

        assert_eq!(reader.jump_to_percentage(50.0), Some(5));
        assert_mirrors(&reader);
        assert_eq!(reader.jump_to_percentage(99.0), Some(10));
        assert_eq!(reader.jump_to_percentage(100.0), Some(11));

        reader.drain_events();
        assert_eq!(reader.jump_to_percentage(150.0), None);
        assert_eq!(reader.jump_to_percentage(-1.0), None);
        assert_eq!(reader.position(), 11);
        assert!(reader
            .drain_events()
            .contains(&ReaderEvent::PercentageRejected(150.0)));

        reader.apply(Command::JumpToStart).unwrap();
        assert_eq!(reader.buffer().text(), "");
        reader.apply(Command::JumpToPercentage { percent: 30 }).unwrap();
        assert_eq!(reader.position(), 3);
        reader.apply(Command::JumpToEnd).unwrap();
        assert_eq!(reader.buffer().text(), "ABCDEFGHIJK");
        assert_mirrors(&reader);
    }

    #[test]
    fn loading_clears_stale_buffer() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 3);
        reader.buffer_mut().append("stale");
        reader.load_document(document("ABCDEFGHIJ"), None).unwrap();
        assert_eq!(reader.buffer().text(), "");
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.state(), RevealState::Idle);
    }

    #[test]
    fn commands_adjust_chunking() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 3);
        reader.apply(Command::SetChunkSize { size: 0 }).unwrap();
        assert_eq!(reader.engine().chunk_size(), 3);
        assert!(reader.drain_events().contains(&ReaderEvent::ChunkSizeRejected(0)));

        reader.apply(Command::SetOutputMode { mode: OutputMode::Fast }).unwrap();
        assert_eq!(reader.engine().chunk_size(), 10);
        reader.apply(Command::SetChunkSize { size: 42 }).unwrap();
        assert_eq!(reader.engine().chunk_size(), 42);
    }

    #[test]
    fn reloading_a_known_file_keeps_its_history_identity() {
        let kv = Arc::new(MemoryKeyValueStore::new());
        let mut reader = reader_with(kv, 3);
        let path = PathBuf::from("/books/novel.txt");
        let first = document("ABCDEFGHIJ");
        let first_id = first.id();
        reader.load_document(first, Some(path.clone())).unwrap();

        reader.load_document(document("ABCDEFGHIJ"), Some(path)).unwrap();
        assert_eq!(reader.document().unwrap().id(), first_id);
        assert_eq!(reader.sessions().history().len(), 1);
    }
}
