//! The visible editable surface.
//!
//! Every reveal is an append at the end of the buffer, never a positional
//! insert, so the buffer always mirrors `content[..position]` without any
//! separate cursor bookkeeping. Callers relocate the cursor to the end after
//! each mutation.

pub trait EditorBuffer: Send {
    fn text(&self) -> &str;

    /// Length in `char`s.
    fn char_len(&self) -> usize {
        self.text().chars().count()
    }

    fn append(&mut self, text: &str);

    /// Removes the final character, if any.
    fn pop_char(&mut self) -> Option<char>;

    fn replace_all(&mut self, text: &str);

    fn clear(&mut self) {
        self.replace_all("");
    }

    fn force_cursor_to_end(&mut self);

    /// Cursor as a `char` offset.
    fn cursor(&self) -> usize;
}

/// Removes the last occurrence of `needle`. Returns `false` (and leaves the
/// buffer untouched) when it cannot be found.
pub fn remove_last_occurrence(buffer: &mut dyn EditorBuffer, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let Some(offset) = buffer.text().rfind(needle) else {
        return false;
    };
    let current = buffer.text();
    let mut next = String::with_capacity(current.len() - needle.len());
    next.push_str(&current[..offset]);
    next.push_str(&current[offset + needle.len()..]);
    buffer.replace_all(&next);
    true
}

/// Headless buffer used by tests and non-interactive hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryBuffer {
    text: String,
    char_len: usize,
    cursor: usize,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        let mut buffer = Self::new();
        buffer.replace_all(text);
        buffer.force_cursor_to_end();
        buffer
    }

    /// Moves the cursor as a user click would; clamped to the text.
    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.char_len);
    }
}

impl EditorBuffer for MemoryBuffer {
    fn text(&self) -> &str {
        &self.text
    }

    fn char_len(&self) -> usize {
        self.char_len
    }

    fn append(&mut self, text: &str) {
        self.text.push_str(text);
        self.char_len += text.chars().count();
    }

    fn pop_char(&mut self) -> Option<char> {
        let popped = self.text.pop()?;
        self.char_len -= 1;
        self.cursor = self.cursor.min(self.char_len);
        Some(popped)
    }

    fn replace_all(&mut self, text: &str) {
        self.text.clear();
        self.text.push_str(text);
        self.char_len = text.chars().count();
        self.cursor = self.cursor.min(self.char_len);
    }

    fn force_cursor_to_end(&mut self) {
        self.cursor = self.char_len;
    }

    fn cursor(&self) -> usize {
        self.cursor
    }
}
