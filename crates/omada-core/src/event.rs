//! Change events derived from consecutive Omada snapshots.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::source::RawRecord;

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display,
  EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
  Create,
  Update,
  Delete,
}

/// One changed Omada record.
///
/// `payload` is the new record for creates and updates, and the last observed
/// record for deletes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvent {
  pub kind:    EventKind,
  pub key:     String,
  pub payload: RawRecord,
}
