use thiserror::Error;

use crate::DocumentId;

/// Conditions a caller of [`crate::RestorationCoordinator::restore`] is
/// expected to tell apart.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("a restoration of {document_id} is already in flight")]
    AlreadyInProgress { document_id: DocumentId },

    #[error("content for {document_id} is unavailable: {reason}")]
    ContentUnavailable {
        document_id: DocumentId,
        reason: String,
    },

    #[error("failed to persist restored session")]
    Storage(#[source] anyhow::Error),
}
