//! The persisted baseline: the last observed Omada population as one JSON
//! array.
//!
//! Writes go to a sibling temporary file which is then renamed over the
//! snapshot, so a reader (or a cancelled writer) only ever sees a complete old
//! or a complete new snapshot.

use std::path::{Path, PathBuf};

use omada_core::source::RawRecord;

use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct SnapshotStore {
  path: PathBuf,
}

impl SnapshotStore {
  /// Fails if the directory that should hold the snapshot does not exist.
  pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
    let store = Self { path: path.into() };
    let dir = store.dir();
    if !dir.is_dir() {
      return Err(Error::SnapshotDirectory(dir));
    }
    Ok(store)
  }

  pub fn path(&self) -> &Path { &self.path }

  /// Load the last snapshot; a missing file is an empty population, a
  /// missing directory is fatal.
  pub async fn load(&self) -> Result<Vec<RawRecord>> {
    match tokio::fs::read(&self.path).await {
      Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        let dir = self.dir();
        if !dir.is_dir() {
          return Err(Error::SnapshotDirectory(dir));
        }
        tracing::info!(path = ?self.path, "no previous snapshot; starting empty");
        Ok(Vec::new())
      }
      Err(e) => Err(e.into()),
    }
  }

  /// Replace the snapshot with `records`.
  ///
  /// A snapshot directory that has disappeared since start-up is reported as
  /// [`Error::SnapshotDirectory`].
  pub async fn save(&self, records: &[RawRecord]) -> Result<()> {
    let bytes = serde_json::to_vec(records)?;
    let tmp = self.temp_path();
    if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
      let dir = self.dir();
      return Err(if dir.is_dir() {
        e.into()
      } else {
        Error::SnapshotDirectory(dir)
      });
    }
    tokio::fs::rename(&tmp, &self.path).await?;
    tracing::debug!(path = ?self.path, records = records.len(), "snapshot saved");
    Ok(())
  }

  fn dir(&self) -> PathBuf {
    match self.path.parent() {
      Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
      _ => PathBuf::from("."),
    }
  }

  fn temp_path(&self) -> PathBuf {
    let mut name = self
      .path
      .file_name()
      .map(|n| n.to_os_string())
      .unwrap_or_default();
    name.push(".tmp");
    self.path.with_file_name(name)
  }
}
