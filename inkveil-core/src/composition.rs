//! IME composition handling.
//!
//! While a composition is active the engine ignores keystrokes. When it
//! ends, the host has already inserted the committed text into the buffer;
//! that text is scrubbed on the next turn of the event loop and replaced
//! with the same number of document characters. Several compositions may
//! end before that turn; each one is queued and all of them are applied.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::buffer::{remove_last_occurrence, EditorBuffer};
use crate::engine::{KeystrokeOutcome, RevealEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CleanupTicket(u64);

#[derive(Debug, Clone)]
struct PendingCleanup {
    ticket: CleanupTicket,
    composed: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Revealed {
        text: String,
        position: usize,
        completed: bool,
        /// Whether every composed text was found and removed.
        matched: bool,
    },
    /// The queued cleanups were dropped because reading stopped.
    Cancelled,
    Nothing,
}

#[derive(Debug, Default)]
pub struct CompositionInterceptor {
    provisional: String,
    pending: VecDeque<PendingCleanup>,
    next_ticket: u64,
}

impl CompositionInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, engine: &mut RevealEngine, text: &str) {
        engine.set_composing(true);
        self.provisional.clear();
        self.provisional.push_str(text);
    }

    pub fn update(&mut self, text: &str) {
        self.provisional.clear();
        self.provisional.push_str(text);
    }

    pub fn provisional(&self) -> &str {
        &self.provisional
    }

    /// Ends the composition. Cleanup is queued only while reading; the
    /// returned ticket identifies it among [`Self::pending_tickets`].
    pub fn end(&mut self, engine: &mut RevealEngine, composed: &str) -> Option<CleanupTicket> {
        engine.set_composing(false);
        self.provisional.clear();
        if !engine.is_reading() {
            return None;
        }
        let ticket = CleanupTicket(self.next_ticket);
        self.next_ticket += 1;
        self.pending.push_back(PendingCleanup {
            ticket,
            composed: composed.to_string(),
        });
        debug!(ticket = ticket.0, queued = self.pending.len(), "queued composition cleanup");
        Some(ticket)
    }

    /// Drops every queued cleanup.
    pub fn cancel(&mut self) -> bool {
        self.provisional.clear();
        let dropped = !self.pending.is_empty();
        self.pending.clear();
        dropped
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Tickets still waiting for [`Self::flush`], oldest first.
    pub fn pending_tickets(&self) -> Vec<CleanupTicket> {
        self.pending.iter().map(|pending| pending.ticket).collect()
    }

    /// Runs every queued cleanup. The composed texts are removed newest
    /// first, each at its last occurrence, so they come out exactly as the
    /// host inserted them; then as many characters as they had in total
    /// are revealed in one go.
    pub fn flush(
        &mut self,
        engine: &mut RevealEngine,
        buffer: &mut dyn EditorBuffer,
    ) -> CleanupOutcome {
        if self.pending.is_empty() {
            return CleanupOutcome::Nothing;
        }
        let queued = std::mem::take(&mut self.pending);
        if !engine.is_reading() {
            debug!(dropped = queued.len(), "reading stopped before composition cleanup");
            return CleanupOutcome::Cancelled;
        }

        let mut count = 0;
        let mut matched = true;
        for pending in queued.iter().rev() {
            let chars = pending.composed.chars().count();
            if chars == 0 {
                continue;
            }
            count += chars;
            if !remove_last_occurrence(buffer, &pending.composed) {
                matched = false;
                warn!(
                    composed = %pending.composed,
                    "composed text not found in buffer; revealing without removal"
                );
            }
        }
        if count == 0 {
            return CleanupOutcome::Nothing;
        }

        match engine.reveal(count, buffer) {
            KeystrokeOutcome::Revealed {
                text,
                position,
                completed,
            } => CleanupOutcome::Revealed {
                text,
                position,
                completed,
                matched,
            },
            _ => CleanupOutcome::Nothing,
        }
    }
}
