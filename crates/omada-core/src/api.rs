//! The collaborator traits: where Omada records come from and where MO state
//! is read and written.
//!
//! Concrete HTTP implementations live in `omada-client`. The reconciler and
//! event generator only ever see these traits.

use std::{collections::HashMap, future::Future};

use uuid::Uuid;

use crate::{
  record::{
    Address, ComparableAddress, ComparableEmployee, ComparableEngagement,
    ComparableItUser, Employee, Engagement, EntityKind, ItUser,
  },
  source::RawRecord,
  validity::Validity,
};

// ─── Source ──────────────────────────────────────────────────────────────────

/// Build an OData equality predicate, quoting `value`.
pub fn equality_filter(key: &str, value: &str) -> String {
  format!("{key} eq '{}'", value.replace('\'', "''"))
}

/// Read access to the Omada user population.
pub trait SourceApi: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch every record, or those matching an equality-style `filter`.
  fn fetch_all<'a>(
    &'a self,
    filter: Option<&'a str>,
  ) -> impl Future<Output = Result<Vec<RawRecord>, Self::Error>> + Send + 'a;

  /// Fetch the records whose `key` equals any of `values`.
  ///
  /// The source has no OR filters, so this issues one request per value.
  fn fetch_by<'a>(
    &'a self,
    key: &'a str,
    values: &'a [String],
  ) -> impl Future<Output = Result<Vec<RawRecord>, Self::Error>> + Send + 'a
  {
    async move {
      let mut records = Vec::new();
      for value in values {
        let filter = equality_filter(key, value);
        records.extend(self.fetch_all(Some(&filter)).await?);
      }
      Ok(records)
    }
  }
}

// ─── Target ──────────────────────────────────────────────────────────────────

/// How to find an organisation unit in MO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgUnitRef {
  /// The unit owning an IT user with this user key in the given IT system.
  ItUserKey { it_system: String, user_key: String },
  Uuid(Uuid),
  UserKey(String),
}

/// An external key an MO employee can be looked up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectKey {
  Cpr(String),
  /// Matched against engagement user keys.
  ServiceNumber(String),
}

impl SubjectKey {
  /// The bare key, unmasked.
  pub fn value(&self) -> &str {
    match self {
      Self::Cpr(value) | Self::ServiceNumber(value) => value,
    }
  }
}

impl std::fmt::Display for SubjectKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      // Only the birth date part; the full number is personal data.
      Self::Cpr(cpr) => write!(f, "cpr:{}xxxx", cpr.get(..6).unwrap_or("")),
      Self::ServiceNumber(number) => write!(f, "service_number:{number}"),
    }
  }
}

/// The current MO objects attached to one employee.
#[derive(Debug, Clone, Default)]
pub struct SubjectState {
  pub engagements: Vec<Engagement>,
  pub addresses:   Vec<Address>,
  pub it_users:    Vec<ItUser>,
}

/// Read and write access to MO.
///
/// Lookups that can legitimately miss return `Ok(None)`; every `Err` is a
/// failure of the call itself.
pub trait TargetApi: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Classifications ───────────────────────────────────────────────────

  /// Classes of `facet`, by user key.
  fn classes<'a>(
    &'a self,
    facet: &'a str,
  ) -> impl Future<Output = Result<HashMap<String, Uuid>, Self::Error>> + Send + 'a;

  /// IT systems, by user key.
  fn it_systems(
    &self,
  ) -> impl Future<Output = Result<HashMap<String, Uuid>, Self::Error>> + Send + '_;

  // ── Organisation ──────────────────────────────────────────────────────

  fn resolve_org_unit(
    &self,
    by: OrgUnitRef,
  ) -> impl Future<Output = Result<Option<Uuid>, Self::Error>> + Send + '_;

  /// The full span of an organisation unit's existence.
  fn org_unit_validity(
    &self,
    uuid: Uuid,
  ) -> impl Future<Output = Result<Validity, Self::Error>> + Send + '_;

  // ── Employees ─────────────────────────────────────────────────────────

  /// Every employee UUID matching `key`. More than one is a data error the
  /// caller must deal with.
  fn resolve_subject(
    &self,
    key: SubjectKey,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  fn employee(
    &self,
    uuid: Uuid,
  ) -> impl Future<Output = Result<Option<Employee>, Self::Error>> + Send + '_;

  /// Current and future engagements, addresses and IT users of `person`.
  fn subject_state(
    &self,
    person: Uuid,
  ) -> impl Future<Output = Result<SubjectState, Self::Error>> + Send + '_;

  // ── Writes ────────────────────────────────────────────────────────────

  fn create_employee(
    &self,
    employee: ComparableEmployee,
  ) -> impl Future<Output = Result<Uuid, Self::Error>> + Send + '_;

  fn update_employee(
    &self,
    uuid: Uuid,
    employee: ComparableEmployee,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn create_engagements(
    &self,
    engagements: Vec<ComparableEngagement>,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  fn create_addresses(
    &self,
    addresses: Vec<ComparableAddress>,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  fn create_it_users(
    &self,
    it_users: Vec<ComparableItUser>,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  /// End-date an object as of today.
  fn terminate(
    &self,
    kind: EntityKind,
    uuid: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Physically remove an object.
  fn delete(
    &self,
    kind: EntityKind,
    uuid: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
