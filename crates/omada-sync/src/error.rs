//! Error type for a reconciliation pass.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid source record: {0}")]
  Validation(#[from] omada_core::Error),

  #[error("no class {user_key:?} in facet {facet:?}")]
  ClassNotFound { facet: String, user_key: String },

  #[error("no IT system {0:?}")]
  ItSystemNotFound(String),

  #[error("no org unit matches code {0:?}")]
  OrgUnitNotFound(String),

  #[error("user {0} has no service, employee or employment number")]
  MissingEngagementKey(Uuid),

  #[error("{key} matches {} employees: {matches:?}", matches.len())]
  AmbiguousSubject { key: String, matches: Vec<Uuid> },

  #[error("target error: {0}")]
  Target(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("source error: {0}")]
  Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  pub fn target_api(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Target(Box::new(e))
  }

  pub fn source_api(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Source(Box::new(e))
  }

  /// Errors that indicate broken data or configuration rather than a
  /// transient condition. The process should stop rather than retry.
  pub fn is_fatal(&self) -> bool { matches!(self, Self::AmbiguousSubject { .. }) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
