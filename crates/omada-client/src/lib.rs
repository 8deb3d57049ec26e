//! HTTP implementations of the collaborator traits: an OData reader for
//! Omada and a GraphQL client for MO.

mod error;
pub mod mo;
pub mod omada;

pub use self::{
  error::{Error, Result},
  mo::{MoClient, MoConfig},
  omada::{OmadaClient, OmadaConfig},
};
