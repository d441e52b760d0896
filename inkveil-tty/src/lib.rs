use std::fmt;
use std::io::{self, Write};

use anyhow::Result;
use crossterm::{
    cursor,
    event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, ModifierKeyCode},
    queue,
    terminal::{Clear, ClearType},
};
use inkveil_core::{Command, EditorBuffer, Key, Modifier, OutputMode, RevealState};
use tracing::debug;
use unicode_width::UnicodeWidthChar;

pub struct SurfaceRenderer<W: Write> {
    writer: W,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawParams {
    pub columns: u16,
    pub rows: u16,
}

impl DrawParams {
    pub fn clamped(columns: u16, rows: u16) -> Self {
        Self {
            columns: columns.max(1),
            rows: rows.max(2),
        }
    }

    /// Rows left for text once the status line is reserved.
    pub fn text_rows(&self) -> u16 {
        self.rows.saturating_sub(1).max(1)
    }
}

impl<W: Write> SurfaceRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Paints the tail of `buffer` above the status line and parks the
    /// cursor after the last revealed character.
    pub fn draw(&mut self, buffer: &TerminalBuffer, status: &str, params: DrawParams) -> Result<()> {
        let text_rows = params.text_rows();
        let lines = buffer.tail_lines(params.columns as usize, text_rows as usize);

        for row in 0..text_rows {
            queue!(self.writer, cursor::MoveTo(0, row), Clear(ClearType::CurrentLine))?;
            if let Some(line) = lines.get(row as usize) {
                self.writer.write_all(line.as_bytes())?;
            }
        }

        queue!(
            self.writer,
            cursor::MoveTo(0, params.rows.saturating_sub(1)),
            Clear(ClearType::CurrentLine)
        )?;
        write_status_line(&mut self.writer, status, params.columns as usize)?;

        let cursor_row = lines.len().saturating_sub(1) as u16;
        let cursor_col = lines.last().map_or(0, |line| display_width(line)) as u16;
        queue!(
            self.writer,
            cursor::MoveTo(cursor_col.min(params.columns.saturating_sub(1)), cursor_row)
        )?;
        Ok(())
    }

    pub fn begin_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026h")?;
        Ok(())
    }

    /// Disables synchronized updates.
    /// The terminal will render all buffered changes at once.
    pub fn end_sync_update(&mut self) -> Result<()> {
        write!(self.writer, "\u{1b}[?2026l")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Clears the entire screen.
    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}

/// Writes `label` in reverse video, cut or padded to `width` columns.
pub fn write_status_line<W: Write>(writer: &mut W, label: &str, width: usize) -> io::Result<()> {
    let mut line = String::with_capacity(width);
    let mut used = 0;
    for c in label.chars() {
        let c = if c.is_control() { ' ' } else { c };
        let w = char_width(c);
        if used + w > width {
            break;
        }
        line.push(c);
        used += w;
    }
    line.extend(std::iter::repeat(' ').take(width - used));
    write!(writer, "\u{1b}[7m{}\u{1b}[0m", line)
}

/// Terminal columns taken by `c`. Control characters take none.
pub fn char_width(c: char) -> usize {
    UnicodeWidthChar::width(c).unwrap_or(0)
}

pub fn display_width(text: &str) -> usize {
    text.chars().map(char_width).sum()
}

fn wrap_line(line: &str, columns: usize) -> Vec<String> {
    let mut rows = vec![String::new()];
    let mut width = 0;
    for c in line.chars() {
        let c = if c.is_control() { ' ' } else { c };
        let w = char_width(c);
        if width + w > columns && width > 0 {
            rows.push(String::new());
            width = 0;
        }
        if let Some(row) = rows.last_mut() {
            row.push(c);
        }
        width += w;
    }
    rows
}

/// [`EditorBuffer`] backing the terminal surface. Mutations set a dirty
/// flag the event loop consumes to decide whether to repaint.
#[derive(Debug, Clone, Default)]
pub struct TerminalBuffer {
    text: String,
    char_len: usize,
    cursor: usize,
    dirty: bool,
}

impl TerminalBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Returns whether anything changed since the last call and clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// The last `rows` screen lines of the text wrapped at `columns`. Only the
    /// tail is wrapped, so cost does not grow with the revealed prefix.
    pub fn tail_lines(&self, columns: usize, rows: usize) -> Vec<String> {
        let columns = columns.max(1);
        let mut tail = Vec::with_capacity(rows);
        if rows == 0 {
            return tail;
        }
        'logical: for logical in self.text.rsplit('\n') {
            for line in wrap_line(logical, columns).into_iter().rev() {
                tail.push(line);
                if tail.len() == rows {
                    break 'logical;
                }
            }
        }
        tail.reverse();
        tail
    }
}

impl EditorBuffer for TerminalBuffer {
    fn text(&self) -> &str {
        &self.text
    }

    fn char_len(&self) -> usize {
        self.char_len
    }

    fn append(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.text.push_str(text);
        self.char_len += text.chars().count();
        self.dirty = true;
    }

    fn pop_char(&mut self) -> Option<char> {
        let popped = self.text.pop()?;
        self.char_len -= 1;
        self.cursor = self.cursor.min(self.char_len);
        self.dirty = true;
        Some(popped)
    }

    fn replace_all(&mut self, text: &str) {
        self.text.clear();
        self.text.push_str(text);
        self.char_len = text.chars().count();
        self.cursor = self.cursor.min(self.char_len);
        self.dirty = true;
    }

    fn force_cursor_to_end(&mut self) {
        if self.cursor != self.char_len {
            self.cursor = self.char_len;
            self.dirty = true;
        }
    }

    fn cursor(&self) -> usize {
        self.cursor
    }
}

/// Bottom-row summary of the reading session.
#[derive(Debug, Clone, Default)]
pub struct StatusLine<'a> {
    pub title: Option<&'a str>,
    pub state: RevealState,
    pub position: usize,
    pub total: usize,
    pub chapter: Option<&'a str>,
    pub chunk_size: usize,
    pub output_mode: OutputMode,
    pub prompt: Option<String>,
    pub message: Option<&'a str>,
}

impl fmt::Display for StatusLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prompt) = &self.prompt {
            return write!(f, " {prompt}");
        }
        let state = match self.state {
            RevealState::Idle => "idle",
            RevealState::Reading => "reading",
            RevealState::Paused => "paused",
            RevealState::Stopped => "stopped",
        };
        write!(f, " [{state}] {}", self.title.unwrap_or("no document"))?;
        if let Some(chapter) = self.chapter {
            write!(f, " | {chapter}")?;
        }
        let percentage = if self.total == 0 {
            0.0
        } else {
            self.position as f64 * 100.0 / self.total as f64
        };
        write!(f, " | {}/{} ({percentage:.1}%)", self.position, self.total)?;
        match self.output_mode {
            OutputMode::Fast => write!(f, " | fast")?,
            _ => write!(f, " | chunk {}", self.chunk_size)?,
        }
        if let Some(message) = self.message {
            write!(f, " | {message}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Keystroke(Key),
    Paste(String),
    Command(Command),
    Resize { columns: u16, rows: u16 },
    PromptChanged,
    Quit,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    JumpPrompt,
}

/// Turns terminal events into reader input. Plain characters go to the
/// reveal engine; control and alt chords are reader commands.
#[derive(Debug, Default)]
pub struct EventMapper {
    mode: InputMode,
    pending_digits: String,
    char_stack: String,
}

impl EventMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&mut self, mode: InputMode) {
        if self.mode != mode {
            self.pending_digits.clear();
            self.reset_char_stack();
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn map_event(&mut self, event: Event) -> UiEvent {
        match event {
            Event::Key(KeyEvent { kind, .. }) if kind == KeyEventKind::Release => UiEvent::None,
            Event::Resize(columns, rows) => UiEvent::Resize { columns, rows },
            Event::Paste(text) => match self.mode {
                InputMode::Normal => UiEvent::Paste(text),
                InputMode::JumpPrompt => {
                    debug!(len = text.len(), "paste ignored in jump prompt");
                    UiEvent::None
                }
            },
            event => match self.mode {
                InputMode::Normal => self.map_event_normal(event),
                InputMode::JumpPrompt => self.map_event_jump(event),
            },
        }
    }

    fn map_event_normal(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };

        if !self.char_stack.is_empty() {
            let pending = std::mem::take(&mut self.char_stack);
            return match (pending.as_str(), code) {
                ("m", KeyCode::Char(c)) => UiEvent::Command(Command::PutMark { key: c }),
                ("'", KeyCode::Char(c)) => UiEvent::Command(Command::GotoMark { key: c }),
                ("d", KeyCode::Char(c)) => UiEvent::Command(Command::RemoveMark { key: c }),
                _ => UiEvent::PromptChanged,
            };
        }

        match (code, modifiers) {
            (KeyCode::Char('q'), m) | (KeyCode::Char('c'), m) if m.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            (KeyCode::Char('r'), m) if m.contains(KeyModifiers::CONTROL) => {
                UiEvent::Command(Command::StartReading)
            }
            (KeyCode::Char('p'), m) if m.contains(KeyModifiers::CONTROL) => {
                UiEvent::Command(Command::TogglePause)
            }
            (KeyCode::Char('e'), m) if m.contains(KeyModifiers::CONTROL) => {
                UiEvent::Command(Command::StopReading)
            }
            (KeyCode::Char('s'), m) if m.contains(KeyModifiers::CONTROL) => {
                UiEvent::Command(Command::SaveProgress)
            }
            (KeyCode::Char('n'), m) if m.contains(KeyModifiers::CONTROL) => {
                UiEvent::Command(Command::NextChapter)
            }
            (KeyCode::Char('b'), m) if m.contains(KeyModifiers::CONTROL) => {
                UiEvent::Command(Command::PrevChapter)
            }
            (KeyCode::Char('g'), m) if m.contains(KeyModifiers::CONTROL) => {
                self.set_mode(InputMode::JumpPrompt);
                UiEvent::PromptChanged
            }
            (KeyCode::Char('m'), m) if m.contains(KeyModifiers::ALT) => {
                self.push_char('m');
                UiEvent::PromptChanged
            }
            (KeyCode::Char('\''), m) if m.contains(KeyModifiers::ALT) => {
                self.push_char('\'');
                UiEvent::PromptChanged
            }
            (KeyCode::Char('d'), m) if m.contains(KeyModifiers::ALT) => {
                self.push_char('d');
                UiEvent::PromptChanged
            }
            (KeyCode::Home, m) if m.contains(KeyModifiers::CONTROL) => {
                UiEvent::Command(Command::JumpToStart)
            }
            (KeyCode::End, m) if m.contains(KeyModifiers::CONTROL) => {
                UiEvent::Command(Command::JumpToEnd)
            }
            (KeyCode::Char('1'), m) if m.contains(KeyModifiers::ALT) => {
                UiEvent::Command(Command::SetOutputMode {
                    mode: OutputMode::Normal,
                })
            }
            (KeyCode::Char('2'), m) if m.contains(KeyModifiers::ALT) => {
                UiEvent::Command(Command::SetOutputMode {
                    mode: OutputMode::Fast,
                })
            }
            (KeyCode::Char('r'), m) if m.contains(KeyModifiers::ALT) => {
                UiEvent::Command(Command::ReparseChapters)
            }
            (KeyCode::Char('x'), m) if m.contains(KeyModifiers::ALT) => {
                UiEvent::Command(Command::Reset)
            }
            (KeyCode::Char(c), m) if m.is_empty() || m == KeyModifiers::SHIFT => {
                UiEvent::Keystroke(Key::Char(c))
            }
            (KeyCode::Char(_), _) => UiEvent::None,
            (code, _) => map_key_code(code).map_or(UiEvent::None, UiEvent::Keystroke),
        }
    }

    fn map_event_jump(&mut self, event: Event) -> UiEvent {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event
        else {
            return UiEvent::None;
        };
        match (code, modifiers) {
            (KeyCode::Char('q'), m) | (KeyCode::Char('c'), m) if m.contains(KeyModifiers::CONTROL) => {
                UiEvent::Quit
            }
            (KeyCode::Char(c), _) if c.is_ascii_digit() => {
                self.pending_digits.push(c);
                UiEvent::PromptChanged
            }
            (KeyCode::Backspace, _) => {
                self.pending_digits.pop();
                UiEvent::PromptChanged
            }
            (KeyCode::Char('%'), _) => {
                let percent = self.pending_digits.parse::<u8>().ok();
                self.set_mode(InputMode::Normal);
                match percent {
                    Some(percent) => UiEvent::Command(Command::JumpToPercentage { percent }),
                    None => UiEvent::PromptChanged,
                }
            }
            (KeyCode::Enter, _) => {
                let position = self.pending_digits.parse::<usize>().ok();
                self.set_mode(InputMode::Normal);
                match position {
                    Some(position) => UiEvent::Command(Command::JumpToPosition { position }),
                    None => UiEvent::PromptChanged,
                }
            }
            (KeyCode::Esc, _) => {
                self.set_mode(InputMode::Normal);
                UiEvent::PromptChanged
            }
            _ => UiEvent::None,
        }
    }

    fn push_char(&mut self, c: char) {
        self.char_stack.push(c);
    }

    fn reset_char_stack(&mut self) {
        self.char_stack = String::new();
    }

    pub fn pending_input(&self) -> Option<String> {
        if matches!(self.mode, InputMode::JumpPrompt) {
            return Some(format!("go to position: {}", self.pending_digits));
        }
        match self.char_stack.as_str() {
            "m" => Some("set mark:".to_string()),
            "'" => Some("go to mark:".to_string()),
            "d" => Some("delete mark:".to_string()),
            _ => None,
        }
    }
}

/// Maps non-character keys. Keys the reader never reacts to return `None`.
pub fn map_key_code(code: KeyCode) -> Option<Key> {
    let key = match code {
        KeyCode::Char(c) => Key::Char(c),
        KeyCode::Enter => Key::Enter,
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Tab | KeyCode::BackTab => Key::Tab,
        KeyCode::Esc => Key::Escape,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        KeyCode::Insert => Key::Insert,
        KeyCode::Delete => Key::Delete,
        KeyCode::CapsLock => Key::CapsLock,
        KeyCode::F(n) => Key::F(n),
        KeyCode::Modifier(modifier) => Key::Modifier(match modifier {
            ModifierKeyCode::LeftShift
            | ModifierKeyCode::RightShift
            | ModifierKeyCode::IsoLevel3Shift
            | ModifierKeyCode::IsoLevel5Shift => Modifier::Shift,
            ModifierKeyCode::LeftControl | ModifierKeyCode::RightControl => Modifier::Control,
            ModifierKeyCode::LeftAlt | ModifierKeyCode::RightAlt => Modifier::Alt,
            _ => Modifier::Meta,
        }),
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn key_event(code: KeyCode) -> Event {
        key_event_with_modifiers(code, KeyModifiers::NONE)
    }

    fn key_event_with_modifiers(code: KeyCode, modifiers: KeyModifiers) -> Event {
        Event::Key(KeyEvent {
            code,
            modifiers,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        })
    }

    fn ctrl(c: char) -> Event {
        key_event_with_modifiers(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn alt(c: char) -> Event {
        key_event_with_modifiers(KeyCode::Char(c), KeyModifiers::ALT)
    }

    #[test]
    fn sync_update_wraps_output() {
        let mut renderer = SurfaceRenderer::new(Vec::new());
        renderer.begin_sync_update().unwrap();
        renderer.end_sync_update().unwrap();
        assert_eq!(renderer.writer().as_slice(), b"\x1b[?2026h\x1b[?2026l");
    }

    #[test]
    fn draw_paints_text_and_status() {
        let mut buffer = TerminalBuffer::new();
        buffer.append("first line\nsecond");
        let mut renderer = SurfaceRenderer::new(Vec::new());
        renderer
            .draw(&buffer, "[reading] book", DrawParams::clamped(20, 4))
            .unwrap();
        let output = String::from_utf8(renderer.writer().clone()).unwrap();
        assert!(output.contains("first line"));
        assert!(output.contains("second"));
        assert!(output.contains("\u{1b}[7m[reading] book      \u{1b}[0m"));
    }

    #[test]
    fn status_line_is_cut_to_width_and_respects_wide_chars() {
        let mut out = Vec::new();
        write_status_line(&mut out, "第一章abc", 7).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\u{1b}[7m第一章a\u{1b}[0m");

        let mut out = Vec::new();
        write_status_line(&mut out, "第一章", 5).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "\u{1b}[7m第一 \u{1b}[0m");
    }

    #[test]
    fn widths_cover_hangul_jamo_and_emoji() {
        assert_eq!(char_width('a'), 1);
        assert_eq!(char_width('第'), 2);
        assert_eq!(char_width('\u{A960}'), 2);
        assert_eq!(char_width('\u{1F680}'), 2);
        assert_eq!(char_width('\u{0301}'), 0);
        assert_eq!(display_width("한글🚀"), 6);
    }

    #[test]
    fn tail_lines_wraps_only_what_fits() {
        let mut buffer = TerminalBuffer::new();
        buffer.append("abcdefgh\nxy\n12345");
        assert_eq!(buffer.tail_lines(4, 3), vec!["xy", "1234", "5"]);
        assert_eq!(buffer.tail_lines(4, 10), vec!["abcd", "efgh", "xy", "1234", "5"]);
        assert!(buffer.tail_lines(4, 0).is_empty());

        let mut wide = TerminalBuffer::new();
        wide.append("第一章节");
        assert_eq!(wide.tail_lines(5, 5), vec!["第一", "章节"]);
    }

    #[test]
    fn trailing_newline_starts_an_empty_row() {
        let mut buffer = TerminalBuffer::new();
        buffer.append("line\n");
        assert_eq!(buffer.tail_lines(10, 5), vec!["line", ""]);
        assert_eq!(TerminalBuffer::new().tail_lines(10, 5), vec![""]);
    }

    #[test]
    fn mutations_mark_the_buffer_dirty() {
        let mut buffer = TerminalBuffer::new();
        assert!(!buffer.take_dirty());
        buffer.append("ab");
        assert!(buffer.take_dirty());
        assert!(!buffer.take_dirty());

        buffer.force_cursor_to_end();
        assert_eq!(buffer.cursor(), 2);
        assert!(buffer.take_dirty());

        assert_eq!(buffer.pop_char(), Some('b'));
        assert_eq!(buffer.cursor(), 1);
        assert!(buffer.is_dirty());
        buffer.replace_all("");
        assert_eq!(buffer.char_len(), 0);
        assert_eq!(buffer.pop_char(), None);
    }

    #[test]
    fn status_line_summarises_progress() {
        let status = StatusLine {
            title: Some("novel"),
            state: RevealState::Reading,
            position: 25,
            total: 200,
            chapter: Some("第一章"),
            chunk_size: 5,
            ..StatusLine::default()
        };
        assert_eq!(
            status.to_string(),
            " [reading] novel | 第一章 | 25/200 (12.5%) | chunk 5"
        );

        let prompting = StatusLine {
            prompt: Some("go to position: 4".to_string()),
            ..status
        };
        assert_eq!(prompting.to_string(), " go to position: 4");
    }

    #[test]
    fn plain_characters_become_keystrokes() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('a'))),
            UiEvent::Keystroke(Key::Char('a'))
        );
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Char('A'), KeyModifiers::SHIFT)),
            UiEvent::Keystroke(Key::Char('A'))
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('7'))),
            UiEvent::Keystroke(Key::Char('7'))
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Backspace)),
            UiEvent::Keystroke(Key::Backspace)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::F(5))),
            UiEvent::Keystroke(Key::F(5))
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Modifier(ModifierKeyCode::LeftShift))),
            UiEvent::Keystroke(Key::Modifier(Modifier::Shift))
        );
        assert_eq!(mapper.map_event(key_event(KeyCode::Null)), UiEvent::None);
    }

    #[test]
    fn key_releases_are_dropped() {
        let mut mapper = EventMapper::new();
        let release = Event::Key(KeyEvent {
            code: KeyCode::Char('a'),
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Release,
            state: KeyEventState::NONE,
        });
        assert_eq!(mapper.map_event(release), UiEvent::None);
    }

    #[test]
    fn control_chords_map_to_commands() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(ctrl('r')), UiEvent::Command(Command::StartReading));
        assert_eq!(mapper.map_event(ctrl('p')), UiEvent::Command(Command::TogglePause));
        assert_eq!(mapper.map_event(ctrl('e')), UiEvent::Command(Command::StopReading));
        assert_eq!(mapper.map_event(ctrl('s')), UiEvent::Command(Command::SaveProgress));
        assert_eq!(mapper.map_event(ctrl('n')), UiEvent::Command(Command::NextChapter));
        assert_eq!(mapper.map_event(ctrl('b')), UiEvent::Command(Command::PrevChapter));
        assert_eq!(mapper.map_event(ctrl('q')), UiEvent::Quit);
        assert_eq!(mapper.map_event(ctrl('z')), UiEvent::None);
        assert_eq!(
            mapper.map_event(alt('2')),
            UiEvent::Command(Command::SetOutputMode {
                mode: OutputMode::Fast
            })
        );
    }

    #[test]
    fn jump_prompt_collects_digits_until_enter() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(ctrl('g')), UiEvent::PromptChanged);
        assert_eq!(mapper.mode(), InputMode::JumpPrompt);
        mapper.map_event(key_event(KeyCode::Char('1')));
        mapper.map_event(key_event(KeyCode::Char('2')));
        mapper.map_event(key_event(KeyCode::Char('9')));
        mapper.map_event(key_event(KeyCode::Backspace));
        assert_eq!(mapper.pending_input().as_deref(), Some("go to position: 12"));

        assert_eq!(
            mapper.map_event(key_event(KeyCode::Enter)),
            UiEvent::Command(Command::JumpToPosition { position: 12 })
        );
        assert_eq!(mapper.mode(), InputMode::Normal);
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn percent_sign_submits_a_percentage_jump() {
        let mut mapper = EventMapper::new();
        mapper.map_event(ctrl('g'));
        mapper.map_event(key_event(KeyCode::Char('4')));
        mapper.map_event(key_event(KeyCode::Char('5')));
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Char('%'), KeyModifiers::SHIFT)),
            UiEvent::Command(Command::JumpToPercentage { percent: 45 })
        );
        assert_eq!(mapper.mode(), InputMode::Normal);

        mapper.map_event(ctrl('g'));
        assert_eq!(mapper.map_event(key_event(KeyCode::Char('%'))), UiEvent::PromptChanged);
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn control_home_and_end_jump_to_the_edges() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::Home, KeyModifiers::CONTROL)),
            UiEvent::Command(Command::JumpToStart)
        );
        assert_eq!(
            mapper.map_event(key_event_with_modifiers(KeyCode::End, KeyModifiers::CONTROL)),
            UiEvent::Command(Command::JumpToEnd)
        );
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Home)),
            UiEvent::Keystroke(Key::Home)
        );
    }

    #[test]
    fn jump_prompt_cancels_on_escape_and_ignores_paste() {
        let mut mapper = EventMapper::new();
        mapper.map_event(ctrl('g'));
        assert_eq!(mapper.map_event(Event::Paste("42".into())), UiEvent::None);
        mapper.map_event(key_event(KeyCode::Char('4')));
        assert_eq!(mapper.map_event(key_event(KeyCode::Esc)), UiEvent::PromptChanged);
        assert!(mapper.pending_input().is_none());

        mapper.map_event(ctrl('g'));
        assert_eq!(mapper.map_event(key_event(KeyCode::Enter)), UiEvent::PromptChanged);
        assert_eq!(mapper.mode(), InputMode::Normal);
    }

    #[test]
    fn alt_chords_set_and_recall_marks() {
        let mut mapper = EventMapper::new();
        assert_eq!(mapper.map_event(alt('m')), UiEvent::PromptChanged);
        assert_eq!(mapper.pending_input().as_deref(), Some("set mark:"));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('a'))),
            UiEvent::Command(Command::PutMark { key: 'a' })
        );
        assert!(mapper.pending_input().is_none());

        mapper.map_event(alt('\''));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('a'))),
            UiEvent::Command(Command::GotoMark { key: 'a' })
        );

        mapper.map_event(alt('d'));
        assert_eq!(mapper.pending_input().as_deref(), Some("delete mark:"));
        assert_eq!(
            mapper.map_event(key_event(KeyCode::Char('a'))),
            UiEvent::Command(Command::RemoveMark { key: 'a' })
        );

        mapper.map_event(alt('m'));
        assert_eq!(mapper.map_event(key_event(KeyCode::Esc)), UiEvent::PromptChanged);
        assert!(mapper.pending_input().is_none());
    }

    #[test]
    fn paste_and_resize_pass_through() {
        let mut mapper = EventMapper::new();
        assert_eq!(
            mapper.map_event(Event::Paste("spoiler".into())),
            UiEvent::Paste("spoiler".into())
        );
        assert_eq!(
            mapper.map_event(Event::Resize(80, 24)),
            UiEvent::Resize {
                columns: 80,
                rows: 24
            }
        );
    }
}
