use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffer::EditorBuffer;
use crate::Document;

pub const MIN_CHUNK_SIZE: usize = 1;
pub const MAX_CHUNK_SIZE: usize = 100;
pub const DEFAULT_CHUNK_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RevealState {
    #[default]
    Idle,
    Reading,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    Shift,
    Control,
    Alt,
    Meta,
}

/// Platform-independent key as seen by the reveal engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Char(char),
    Enter,
    Backspace,
    Tab,
    Escape,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    CapsLock,
    F(u8),
    /// A modifier pressed on its own.
    Modifier(Modifier),
}

impl Key {
    /// Keys that never reveal content.
    pub fn is_functional(&self) -> bool {
        !matches!(self, Key::Char(_) | Key::Enter | Key::Backspace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Normal,
    Fast,
    Custom,
}

impl OutputMode {
    /// Fixed chunk size for the preset modes; `Custom` keeps whatever is set.
    pub fn chunk_size(self) -> Option<usize> {
        match self {
            OutputMode::Normal => Some(DEFAULT_CHUNK_SIZE),
            OutputMode::Fast => Some(10),
            OutputMode::Custom => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotReading,
    Composing,
    FunctionalKey,
    NothingToRetract,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeystrokeOutcome {
    Ignored(IgnoreReason),
    Revealed {
        text: String,
        position: usize,
        /// The document ran out; the engine is now `Stopped`.
        completed: bool,
    },
    Retracted {
        position: usize,
    },
}

impl KeystrokeOutcome {
    pub fn revealed(&self) -> Option<&str> {
        match self {
            KeystrokeOutcome::Revealed { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn moved(&self) -> bool {
        !matches!(self, KeystrokeOutcome::Ignored(_))
    }

    pub fn completed(&self) -> bool {
        matches!(self, KeystrokeOutcome::Revealed { completed: true, .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadingStatistics {
    pub revealed_chars: usize,
    pub started_at: Option<Instant>,
}

impl ReadingStatistics {
    pub fn duration(&self, now: Instant) -> Duration {
        self.started_at
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default()
    }

    /// Average characters revealed per minute since the session started.
    pub fn chars_per_minute(&self, now: Instant) -> u64 {
        let seconds = self.duration(now).as_secs();
        if seconds == 0 {
            return 0;
        }
        (self.revealed_chars as u64 * 60) / seconds
    }
}

#[derive(Debug, Clone)]
pub struct RevealEngine {
    document: Option<Document>,
    position: usize,
    state: RevealState,
    chunk_size: usize,
    output_mode: OutputMode,
    composing: bool,
    statistics: ReadingStatistics,
}

impl Default for RevealEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl RevealEngine {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            document: None,
            position: 0,
            state: RevealState::Idle,
            chunk_size: chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            output_mode: OutputMode::Normal,
            composing: false,
            statistics: ReadingStatistics::default(),
        }
    }

    /// Arms the engine with a new document at position 0.
    pub fn load(&mut self, document: Document) {
        self.document = Some(document);
        self.position = 0;
        self.state = RevealState::Idle;
        self.composing = false;
        self.statistics = ReadingStatistics::default();
    }

    pub fn unload(&mut self) {
        self.document = None;
        self.position = 0;
        self.state = RevealState::Idle;
        self.composing = false;
        self.statistics = ReadingStatistics::default();
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn total_length(&self) -> usize {
        self.document.as_ref().map_or(0, Document::total_length)
    }

    pub fn remaining(&self) -> usize {
        self.total_length() - self.position
    }

    pub fn state(&self) -> RevealState {
        self.state
    }

    pub fn is_reading(&self) -> bool {
        self.state == RevealState::Reading
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    pub fn is_composing(&self) -> bool {
        self.composing
    }

    pub fn statistics(&self) -> &ReadingStatistics {
        &self.statistics
    }

    pub fn set_composing(&mut self, composing: bool) {
        self.composing = composing;
    }

    /// Accepts sizes in `1..=100`; anything else is ignored.
    pub fn set_chunk_size(&mut self, size: usize) -> bool {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&size) {
            return false;
        }
        self.chunk_size = size;
        true
    }

    pub fn set_output_mode(&mut self, mode: OutputMode) {
        self.output_mode = mode;
        if let Some(size) = mode.chunk_size() {
            self.chunk_size = size;
        }
    }

    /// `idle|stopped → reading`. No-op without a document or with nothing
    /// left to reveal.
    pub fn start(&mut self) -> bool {
        if !matches!(self.state, RevealState::Idle | RevealState::Stopped) {
            return false;
        }
        if self.document.is_none() || self.remaining() == 0 {
            return false;
        }
        self.state = RevealState::Reading;
        if self.statistics.started_at.is_none() {
            self.statistics.started_at = Some(Instant::now());
        }
        true
    }

    pub fn pause(&mut self) -> bool {
        if self.state != RevealState::Reading {
            return false;
        }
        self.state = RevealState::Paused;
        true
    }

    pub fn resume(&mut self) -> bool {
        if self.state != RevealState::Paused {
            return false;
        }
        self.state = RevealState::Reading;
        true
    }

    pub fn stop(&mut self) -> bool {
        if !matches!(self.state, RevealState::Reading | RevealState::Paused) {
            return false;
        }
        self.state = RevealState::Stopped;
        self.composing = false;
        true
    }

    /// `stopped → idle`, clearing statistics. The position is kept.
    pub fn reset(&mut self) -> bool {
        if self.state != RevealState::Stopped {
            return false;
        }
        self.state = RevealState::Idle;
        self.composing = false;
        self.statistics = ReadingStatistics::default();
        true
    }

    /// Privileged repositioning that bypasses the reveal path. Returns the
    /// clamped position.
    pub fn seek(&mut self, position: usize) -> usize {
        self.position = position.min(self.total_length());
        self.position
    }

    pub fn on_keystroke(&mut self, key: Key, buffer: &mut dyn EditorBuffer) -> KeystrokeOutcome {
        if self.state != RevealState::Reading {
            return KeystrokeOutcome::Ignored(IgnoreReason::NotReading);
        }
        if self.composing {
            return KeystrokeOutcome::Ignored(IgnoreReason::Composing);
        }
        match key {
            Key::Backspace => self.retract(buffer),
            key if key.is_functional() => KeystrokeOutcome::Ignored(IgnoreReason::FunctionalKey),
            _ => self.reveal(self.chunk_size, buffer),
        }
    }

    /// Appends up to `count` characters starting at the current position.
    pub fn reveal(&mut self, count: usize, buffer: &mut dyn EditorBuffer) -> KeystrokeOutcome {
        if self.state != RevealState::Reading {
            return KeystrokeOutcome::Ignored(IgnoreReason::NotReading);
        }
        let Some(document) = self.document.as_ref() else {
            return KeystrokeOutcome::Ignored(IgnoreReason::NotReading);
        };
        let end = document.clamp(self.position.saturating_add(count));
        let text = document.slice(self.position, end).to_string();
        buffer.append(&text);
        buffer.force_cursor_to_end();

        self.statistics.revealed_chars += end - self.position;
        self.position = end;

        let completed = self.position == document.total_length();
        if completed {
            debug!(position = self.position, "document exhausted");
            self.state = RevealState::Stopped;
            self.composing = false;
        }

        KeystrokeOutcome::Revealed {
            text,
            position: self.position,
            completed,
        }
    }

    /// One character back, regardless of chunk size.
    fn retract(&mut self, buffer: &mut dyn EditorBuffer) -> KeystrokeOutcome {
        if self.position == 0 {
            return KeystrokeOutcome::Ignored(IgnoreReason::NothingToRetract);
        }
        buffer.pop_char();
        buffer.force_cursor_to_end();
        self.position -= 1;
        KeystrokeOutcome::Retracted {
            position: self.position,
        }
    }
}
