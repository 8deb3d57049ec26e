//! Event generator: turns periodic full snapshots of the Omada population into
//! create/update/delete events.
//!
//! The last observed snapshot is persisted as a JSON file so restarts do not
//! replay the whole population. The file belongs to this crate alone.

pub mod differ;
pub mod error;
pub mod generator;
pub mod scheduler;
pub mod snapshot;

pub use error::{Error, Result};
pub use generator::{CycleReport, EventGenerator, EventSink};
pub use scheduler::Schedule;
pub use snapshot::SnapshotStore;
