//! Error types for `omada-core`.

use thiserror::Error;

/// A source record failed validation.
#[derive(Debug, Error)]
pub enum Error {
  #[error("missing required field {0}")]
  MissingField(&'static str),

  #[error("invalid value for {field}: {reason}")]
  InvalidField { field: &'static str, reason: String },

  #[error("identity category {found:?} is not the manual category {expected:?}")]
  NotManualCategory { expected: String, found: String },
}

impl Error {
  pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
    Self::InvalidField { field, reason: reason.into() }
  }

  /// The source field the failure is attributed to, if any.
  pub fn field(&self) -> Option<&'static str> {
    match self {
      Self::MissingField(field) | Self::InvalidField { field, .. } => {
        Some(*field)
      }
      Self::NotManualCategory { .. } => {
        Some(crate::source::fields::IDENTITY_CATEGORY)
      }
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
