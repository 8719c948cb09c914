//! Durable storage of the anchor snapshot.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use listsync_engine::AnchorSnapshot;
use tempfile::NamedTempFile;

use crate::error::StoreError;

/// Reads and atomically rewrites the anchor file.
#[derive(Debug, Clone)]
pub struct AnchorStore {
    path: PathBuf,
}

impl AnchorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last committed anchor.
    ///
    /// A missing file is a first run. A file that does not parse is logged
    /// and treated as a first run too; the next cycle merges both lists by
    /// text and overwrites it.
    pub async fn load(&self) -> Result<AnchorSnapshot, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "No anchor yet, starting fresh");
                return Ok(AnchorSnapshot::new());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match AnchorSnapshot::from_json(&contents) {
            Ok(snapshot) => {
                tracing::debug!(
                    path = %self.path.display(),
                    records = snapshot.len(),
                    "Loaded anchor"
                );
                Ok(snapshot)
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Anchor file unreadable, starting fresh"
                );
                Ok(AnchorSnapshot::new())
            }
        }
    }

    /// Replace the anchor file. Readers see either the old or the new
    /// contents, never a mix.
    pub async fn save(&self, snapshot: &AnchorSnapshot) -> Result<(), StoreError> {
        let json = snapshot.to_json_pretty()?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, json.as_bytes()))
            .await?
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;
        tracing::debug!(path = %self.path.display(), records = snapshot.len(), "Saved anchor");
        Ok(())
    }
}

/// Write to a temp file in the destination directory, then rename over.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
