//! Error type for `omada-events`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The snapshot location cannot work at all; retrying will not help.
  #[error("snapshot directory {0:?} does not exist or is not a directory")]
  SnapshotDirectory(PathBuf),

  #[error("snapshot i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("snapshot is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),

  #[error("source error: {0}")]
  Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn is_fatal(&self) -> bool { matches!(self, Self::SnapshotDirectory(_)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
