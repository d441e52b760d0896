use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::warn;

use crate::chapters::ChapterOptions;
use crate::engine::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::session::HistoryConfig;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub chunk_size: usize,
    pub autosave: bool,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "autosave_interval_ms")]
    pub autosave_interval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "settle_delay_ms")]
    pub settle_delay: Duration,
    pub history: HistoryConfig,
    pub chapters: ChapterOptions,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            autosave: true,
            autosave_interval: Duration::from_millis(5000),
            settle_delay: Duration::from_millis(500),
            history: HistoryConfig::default(),
            chapters: ChapterOptions::default(),
        }
    }
}

impl ReaderConfig {
    /// Reads `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        Ok(config.validated())
    }

    pub fn validated(mut self) -> Self {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            warn!(
                chunk_size = self.chunk_size,
                "chunk size out of range, using {DEFAULT_CHUNK_SIZE}"
            );
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = ReaderConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, ReaderConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "chunk_size = 12\nsettle_delay_ms = 250\n\n[history]\nmax_items = 10\n",
        )
        .unwrap();

        let config = ReaderConfig::load(&path).unwrap();
        assert_eq!(config.chunk_size, 12);
        assert_eq!(config.settle_delay, Duration::from_millis(250));
        assert_eq!(config.autosave_interval, Duration::from_millis(5000));
        assert_eq!(config.history.max_items, 10);
        assert_eq!(config.history.retention_days, 30);
        assert_eq!(config.chapters.min_chapter_length, 100);
    }

    #[test]
    fn out_of_range_chunk_size_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "chunk_size = 500\n").unwrap();
        assert_eq!(ReaderConfig::load(&path).unwrap().chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "chunk_size = [").unwrap();
        let err = ReaderConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }
}
