//! Core types and trait definitions for the Omada → MO synchronisation.
//!
//! This crate is deliberately free of HTTP and file-system dependencies: it
//! holds the validity algebra, the source and target record models, and the
//! collaborator traits everything else is written against.

pub mod api;
pub mod error;
pub mod event;
pub mod record;
pub mod source;
pub mod validity;

pub use error::{Error, Result};
