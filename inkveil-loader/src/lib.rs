use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use inkveil_core::{
    document_id_for_path, ContentLoader, DocumentFormat, DocumentMetadata, LoadedDocument,
};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{info, instrument, warn};

pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("{path:?} is {size} bytes, above the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },
    #[error("{path:?} has no readable text")]
    Empty { path: PathBuf },
    #[error("{format} files are not supported")]
    Unsupported { format: DocumentFormat },
}

/// Unifies line endings and collapses runs of blank lines into one.
pub fn normalize_content(raw: &str) -> String {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    BLANK_RUNS.replace_all(&unified, "\n\n").into_owned()
}

/// Reads `.txt`, `.md` and extensionless files as UTF-8 text.
#[derive(Debug, Clone)]
pub struct PlainTextLoader {
    max_file_size: u64,
}

impl Default for PlainTextLoader {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl PlainTextLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_file_size(mut self, limit: u64) -> Self {
        self.max_file_size = limit;
        self
    }

    /// Blocking variant of [`ContentLoader::load`].
    pub fn load_sync(&self, path: &Path) -> Result<LoadedDocument> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let format = DocumentFormat::from_path(&absolute);
        if format == DocumentFormat::Docx {
            return Err(LoadError::Unsupported { format }.into());
        }

        let size = fs::metadata(&absolute)
            .with_context(|| format!("failed to stat {:?}", absolute))?
            .len();
        if size > self.max_file_size {
            return Err(LoadError::TooLarge {
                path: absolute,
                size,
                limit: self.max_file_size,
            }
            .into());
        }

        let bytes = fs::read(&absolute).with_context(|| format!("failed to read {:?}", absolute))?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(err) => {
                warn!(path = ?absolute, "file is not valid UTF-8, replacing invalid sequences");
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            }
        };
        let content = normalize_content(&text);
        if content.trim().is_empty() {
            return Err(LoadError::Empty { path: absolute }.into());
        }

        let title = absolute
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string());
        info!(path = ?absolute, %format, size, "loaded document");

        Ok(LoadedDocument {
            id: document_id_for_path(&absolute),
            raw_content: content,
            metadata: DocumentMetadata {
                title,
                format,
                file_size: size,
            },
            path: Some(absolute),
        })
    }
}

#[async_trait]
impl ContentLoader for PlainTextLoader {
    #[instrument(skip(self))]
    async fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let loader = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || loader.load_sync(&path))
            .await
            .context("loader task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn normalization_unifies_newlines_and_collapses_blank_runs() {
        let raw = "\u{feff}第一章\r\n\r\n\r\n\r\n正文\r第二行\n\n段落";
        assert_eq!(normalize_content(raw), "第一章\n\n正文\n第二行\n\n段落");
    }

    #[tokio::test]
    async fn loads_text_with_stable_id_and_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("novel.txt");
        fs::write(&path, "Chapter 1\r\nIt begins.").unwrap();

        let loaded = PlainTextLoader::new().load(&path).await.unwrap();
        assert_eq!(loaded.raw_content, "Chapter 1\nIt begins.");
        assert_eq!(loaded.metadata.title, "novel");
        assert_eq!(loaded.metadata.format, DocumentFormat::Txt);
        assert_eq!(loaded.metadata.file_size, 21);
        assert_eq!(loaded.id, document_id_for_path(&path));
    }

    #[test]
    fn rejects_oversized_and_empty_files() {
        let dir = tempdir().unwrap();
        let big = dir.path().join("big.md");
        fs::write(&big, "x".repeat(64)).unwrap();
        let err = PlainTextLoader::new()
            .with_max_file_size(16)
            .load_sync(&big)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::TooLarge { .. })));

        let blank = dir.path().join("blank.txt");
        fs::write(&blank, "\r\n \n").unwrap();
        let err = PlainTextLoader::new().load_sync(&blank).unwrap_err();
        assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::Empty { .. })));
    }

    #[test]
    fn rejects_word_processor_files_and_missing_paths() {
        let dir = tempdir().unwrap();
        let docx = dir.path().join("report.docx");
        fs::write(&docx, b"PK\x03\x04").unwrap();
        let err = PlainTextLoader::new().load_sync(&docx).unwrap_err();
        assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::Unsupported { .. })));

        assert!(PlainTextLoader::new().load_sync(&dir.path().join("nope.txt")).is_err());
    }
}
