//! MO entities and their comparable projections.
//!
//! Every entity read from MO carries the UUID MO assigned to it. Diffing never
//! looks at that UUID: each entity is projected into a `Comparable*` value
//! that holds only the fields we are authoritative for, and two entities are
//! "the same" exactly when their projections are equal.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::validity::Validity;

// ─── Entity kinds ────────────────────────────────────────────────────────────

/// The MO object types the reconciler manages.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
  Employee,
  Engagement,
  Address,
  ItUser,
}

/// What happens to an MO object that no longer has a source counterpart.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RemovalPolicy {
  /// End-date the object, keeping its history.
  #[default]
  Terminate,
  /// Physically remove the object.
  Delete,
}

// ─── Comparable projections ──────────────────────────────────────────────────

#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ComparableEmployee {
  pub cpr_number:          String,
  pub given_name:          String,
  pub surname:             String,
  pub nickname_given_name: Option<String>,
  pub nickname_surname:    Option<String>,
}

#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ComparableEngagement {
  pub user_key:        String,
  pub org_unit:        Uuid,
  pub person:          Uuid,
  pub job_function:    Uuid,
  pub engagement_type: Uuid,
  pub primary:         Option<Uuid>,
  pub validity:        Validity,
}

/// Address user keys are copies of the address UUID in MO, so they are not
/// part of the projection.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ComparableAddress {
  pub value:        String,
  pub address_type: Uuid,
  pub person:       Uuid,
  pub visibility:   Option<Uuid>,
  pub engagement:   Option<Uuid>,
  pub ituser:       Option<Uuid>,
  pub validity:     Validity,
}

#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ComparableItUser {
  pub external_id: Option<String>,
  pub user_key:    Option<String>,
  pub itsystem:    Uuid,
  pub person:      Uuid,
  pub engagement:  Option<Uuid>,
  pub validity:    Validity,
}

// ─── Live MO entities ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
  pub uuid:                Uuid,
  pub cpr_number:          String,
  pub given_name:          String,
  pub surname:             String,
  pub nickname_given_name: Option<String>,
  pub nickname_surname:    Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
  pub uuid:            Uuid,
  pub user_key:        String,
  pub org_unit:        Uuid,
  pub person:          Uuid,
  pub job_function:    Uuid,
  pub engagement_type: Uuid,
  pub primary:         Option<Uuid>,
  pub validity:        Validity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
  pub uuid:         Uuid,
  pub user_key:     String,
  pub value:        String,
  pub address_type: Uuid,
  pub person:       Uuid,
  pub visibility:   Option<Uuid>,
  pub engagement:   Option<Uuid>,
  pub ituser:       Option<Uuid>,
  pub validity:     Validity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItUser {
  pub uuid:        Uuid,
  pub external_id: Option<String>,
  pub user_key:    Option<String>,
  pub itsystem:    Uuid,
  pub person:      Uuid,
  pub engagement:  Option<Uuid>,
  pub validity:    Validity,
}

// ─── Projection trait ────────────────────────────────────────────────────────

/// An MO object that can take part in a set reconciliation.
pub trait TargetEntity: Clone + Send + Sync + 'static {
  /// The identity-free projection used as the diff key.
  type Comparable: Clone
    + Eq
    + Ord
    + std::hash::Hash
    + std::fmt::Debug
    + Send
    + Sync
    + 'static;

  const KIND: EntityKind;

  fn uuid(&self) -> Uuid;

  fn comparable(&self) -> Self::Comparable;

  /// `None` for objects MO does not date, i.e. employees.
  fn validity(&self) -> Option<&Validity> { None }
}

impl TargetEntity for Employee {
  type Comparable = ComparableEmployee;

  const KIND: EntityKind = EntityKind::Employee;

  fn uuid(&self) -> Uuid { self.uuid }

  fn comparable(&self) -> ComparableEmployee {
    ComparableEmployee {
      cpr_number:          self.cpr_number.clone(),
      given_name:          self.given_name.clone(),
      surname:             self.surname.clone(),
      nickname_given_name: self.nickname_given_name.clone(),
      nickname_surname:    self.nickname_surname.clone(),
    }
  }
}

impl TargetEntity for Engagement {
  type Comparable = ComparableEngagement;

  const KIND: EntityKind = EntityKind::Engagement;

  fn uuid(&self) -> Uuid { self.uuid }

  fn validity(&self) -> Option<&Validity> { Some(&self.validity) }

  fn comparable(&self) -> ComparableEngagement {
    ComparableEngagement {
      user_key:        self.user_key.clone(),
      org_unit:        self.org_unit,
      person:          self.person,
      job_function:    self.job_function,
      engagement_type: self.engagement_type,
      primary:         self.primary,
      validity:        self.validity,
    }
  }
}

impl TargetEntity for Address {
  type Comparable = ComparableAddress;

  const KIND: EntityKind = EntityKind::Address;

  fn uuid(&self) -> Uuid { self.uuid }

  fn validity(&self) -> Option<&Validity> { Some(&self.validity) }

  fn comparable(&self) -> ComparableAddress {
    ComparableAddress {
      value:        self.value.clone(),
      address_type: self.address_type,
      person:       self.person,
      visibility:   self.visibility,
      engagement:   self.engagement,
      ituser:       self.ituser,
      validity:     self.validity,
    }
  }
}

impl TargetEntity for ItUser {
  type Comparable = ComparableItUser;

  const KIND: EntityKind = EntityKind::ItUser;

  fn uuid(&self) -> Uuid { self.uuid }

  fn validity(&self) -> Option<&Validity> { Some(&self.validity) }

  fn comparable(&self) -> ComparableItUser {
    ComparableItUser {
      external_id: self.external_id.clone(),
      user_key:    self.user_key.clone(),
      itsystem:    self.itsystem,
      person:      self.person,
      engagement:  self.engagement,
      validity:    self.validity,
    }
  }
}
