//! Error type for the HTTP collaborators.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{method} {url} → {status}")]
  Status {
    method: &'static str,
    url:    String,
    status: reqwest::StatusCode,
  },

  #[error("graphql errors: {}", .0.join("; "))]
  Graphql(Vec<String>),

  #[error("unexpected response shape: {0}")]
  Decode(String),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
