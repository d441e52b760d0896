//! Race-safe resumption of a saved session.
//!
//! The gate is taken before the first await and released by an RAII ticket
//! once the settle delay has elapsed, so every exit path (including errors)
//! reopens it. While it is held, "document loaded" notifications leave the
//! buffer alone.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::buffer::EditorBuffer;
use crate::chapters::ChapterIndexer;
use crate::error::RestoreError;
use crate::reader::SharedReader;
use crate::session::{CurrentDocument, HistoryEntry, Session};
use crate::{ContentLoader, Document, DocumentId, DocumentMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStep {
    Barrier,
    Resolving,
    Installing,
    Settling,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RestorationPhase {
    #[default]
    Idle,
    InFlight {
        document_id: DocumentId,
        step: RestoreStep,
    },
}

/// Single-slot guard: at most one restoration in flight.
#[derive(Debug, Clone, Default)]
pub struct RestorationGate {
    phase: Arc<Mutex<RestorationPhase>>,
}

impl RestorationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RestorationPhase {
        self.phase.lock().clone()
    }

    pub fn is_restoring(&self) -> bool {
        !matches!(*self.phase.lock(), RestorationPhase::Idle)
    }

    pub fn try_begin(&self, document_id: DocumentId) -> Result<RestorationTicket, RestoreError> {
        let mut phase = self.phase.lock();
        if let RestorationPhase::InFlight { document_id, .. } = *phase {
            return Err(RestoreError::AlreadyInProgress { document_id });
        }
        *phase = RestorationPhase::InFlight {
            document_id,
            step: RestoreStep::Barrier,
        };
        Ok(RestorationTicket {
            gate: self.clone(),
            document_id,
        })
    }
}

/// Holds the gate; dropping it returns the gate to `Idle`.
#[derive(Debug)]
pub struct RestorationTicket {
    gate: RestorationGate,
    document_id: DocumentId,
}

impl RestorationTicket {
    fn advance(&self, step: RestoreStep) {
        debug!(document_id = %self.document_id, ?step, "restoration step");
        *self.gate.phase.lock() = RestorationPhase::InFlight {
            document_id: self.document_id,
            step,
        };
    }
}

impl Drop for RestorationTicket {
    fn drop(&mut self) {
        *self.gate.phase.lock() = RestorationPhase::Idle;
    }
}

/// Everything needed to bring a document back.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreSource {
    pub document_id: DocumentId,
    pub metadata: DocumentMetadata,
    pub file_path: Option<PathBuf>,
    pub cached_content: Option<String>,
    pub saved_position: usize,
}

impl RestoreSource {
    pub fn from_current(current: CurrentDocument, session: Option<Session>) -> Self {
        Self {
            document_id: current.id,
            metadata: current.metadata,
            file_path: current.file_path,
            cached_content: Some(current.content),
            saved_position: session.map_or(0, |session| session.position),
        }
    }

    /// Prefers the separately stored session, which is written more often
    /// than the history entry.
    pub fn with_session(mut self, session: Option<Session>) -> Self {
        if let Some(session) = session {
            self.saved_position = session.position;
        }
        self
    }
}

impl From<&HistoryEntry> for RestoreSource {
    fn from(entry: &HistoryEntry) -> Self {
        Self {
            document_id: entry.document_id,
            metadata: entry.metadata(),
            file_path: entry.file_path.as_ref().map(PathBuf::from),
            cached_content: entry.cached_content.clone(),
            saved_position: entry.progress.position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOrigin {
    Cache,
    Loader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub document_id: DocumentId,
    pub position: usize,
    pub origin: ContentOrigin,
    pub chapters: usize,
}

pub struct RestorationCoordinator<B: EditorBuffer> {
    reader: SharedReader<B>,
    gate: RestorationGate,
    loader: Option<Arc<dyn ContentLoader>>,
    settle_delay: Duration,
}

impl<B: EditorBuffer> RestorationCoordinator<B> {
    pub fn new(reader: SharedReader<B>, loader: Option<Arc<dyn ContentLoader>>) -> Self {
        let (gate, settle_delay) = {
            let guard = reader.lock();
            (guard.restoration_gate(), guard.config().settle_delay)
        };
        Self {
            reader,
            gate,
            loader,
            settle_delay,
        }
    }

    pub fn gate(&self) -> &RestorationGate {
        &self.gate
    }

    /// Resumes `source`. The buffer ends up holding exactly the content
    /// before the saved position, with the engine positioned there.
    #[instrument(skip(self, source), fields(document_id = %source.document_id))]
    pub async fn restore(&self, source: RestoreSource) -> Result<RestoreOutcome, RestoreError> {
        let ticket = self.gate.try_begin(source.document_id)?;

        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        ticket.advance(RestoreStep::Resolving);
        let (content, metadata, origin) = self.resolve(&source).await?;

        let options = self.reader.lock().config().chapters.clone();
        let chapters = ChapterIndexer::new(options).index(&content);
        let chapter_count = chapters.len();
        let document = Document::new(source.document_id, content, metadata);

        ticket.advance(RestoreStep::Installing);
        let (document_id, position) = self
            .reader
            .lock()
            .install_restored(document, chapters, source.saved_position, source.file_path)
            .map_err(RestoreError::Storage)?;

        ticket.advance(RestoreStep::Settling);
        tokio::time::sleep(self.settle_delay).await;
        drop(ticket);

        info!(%document_id, position, ?origin, "session restored");
        Ok(RestoreOutcome {
            document_id,
            position,
            origin,
            chapters: chapter_count,
        })
    }

    async fn resolve(
        &self,
        source: &RestoreSource,
    ) -> Result<(String, DocumentMetadata, ContentOrigin), RestoreError> {
        if let Some(content) = &source.cached_content {
            return Ok((content.clone(), source.metadata.clone(), ContentOrigin::Cache));
        }
        let unavailable = |reason: String| RestoreError::ContentUnavailable {
            document_id: source.document_id,
            reason,
        };
        let Some(path) = &source.file_path else {
            return Err(unavailable("no cached content and no file path".into()));
        };
        let Some(loader) = &self.loader else {
            return Err(unavailable(format!("no loader to re-read {}", path.display())));
        };
        match loader.load(path).await {
            Ok(loaded) => Ok((loaded.raw_content, loaded.metadata, ContentOrigin::Loader)),
            Err(err) => {
                warn!(?err, path = %path.display(), "failed to re-read document");
                Err(unavailable(format!("{err:#}")))
            }
        }
    }
}
