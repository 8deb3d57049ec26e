//! Reconciles Omada users into MO.
//!
//! Events from `omada-events` are dispatched to a [`SyncHandler`], which
//! builds the desired MO state for the affected employee from their current
//! Omada records and reconciles each entity kind against it. What gets built
//! is driven entirely by the [`CustomerConfig`](customer::CustomerConfig).

pub mod builder;
pub mod customer;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod lock;
pub mod reconcile;
pub mod settings;


pub use error::{Error, Result};
pub use handler::{PassReport, SourceKeys, SyncHandler};
pub use settings::Settings;
