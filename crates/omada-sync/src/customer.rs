//! Per-customer synchronisation policy.
//!
//! Every deployment runs the same builder and reconciler; what differs is
//! this value: which Omada attributes become which MO addresses and IT users,
//! how engagements are classified, and what happens to objects that disappear
//! from the source.

use std::collections::{BTreeMap, BTreeSet};

use omada_core::{
  api::SubjectKey,
  record::RemovalPolicy,
  source::{NormalUser, fields},
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ─── Source attributes ───────────────────────────────────────────────────────

/// An Omada attribute that can be mapped onto an MO object.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SourceAttribute {
  ServiceNumber,
  EmployeeNumber,
  CprNumber,
  ObjectGuid,
  Login,
  Email,
  Email2,
  Phone,
  Cellphone,
  DirectPhone,
  InstitutionPhone,
}

impl SourceAttribute {
  /// The attribute's value on `user`; `None` when absent or empty.
  pub fn value(self, user: &NormalUser) -> Option<String> {
    let value = match self {
      Self::ServiceNumber => user.service_number.clone(),
      Self::EmployeeNumber => user.employee_number.clone(),
      Self::CprNumber => user.cpr_number.clone(),
      Self::ObjectGuid => user.object_guid.map(|guid| guid.to_string()),
      Self::Login => user.login.clone(),
      Self::Email => user.email.clone(),
      Self::Email2 => user.email2.clone(),
      Self::Phone => user.phone.clone(),
      Self::Cellphone => user.cellphone.clone(),
      Self::DirectPhone => user.direct_phone.clone(),
      Self::InstitutionPhone => user.institution_phone.clone(),
    };
    value.filter(|v| !v.trim().is_empty())
  }
}

// ─── Subject keys ────────────────────────────────────────────────────────────

/// Which Omada attribute identifies the MO employee a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKeyKind {
  #[default]
  Cpr,
  ServiceNumber,
}

impl SubjectKeyKind {
  /// The raw Omada field holding the key, for source-side filtering.
  pub fn field(self) -> &'static str {
    match self {
      Self::Cpr => fields::CPR_NUMBER,
      Self::ServiceNumber => fields::SERVICE_NUMBER,
    }
  }

  pub fn key(self, user: &NormalUser) -> Option<SubjectKey> {
    match self {
      Self::Cpr => user.cpr_number.clone().map(SubjectKey::Cpr),
      Self::ServiceNumber => {
        user.service_number.clone().map(SubjectKey::ServiceNumber)
      }
    }
  }
}

// ─── Mappings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressMapping {
  /// User key of the `employee_address_type` class.
  pub address_type:    String,
  /// User key of the `visibility` class.
  #[serde(default)]
  pub visibility:      Option<String>,
  /// Attach the address to the user's engagement.
  #[serde(default)]
  pub link_engagement: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItSystemMapping {
  /// User key of the IT system.
  pub it_system:       String,
  /// Attribute that becomes the account's user key. Without a value the
  /// account is not created.
  pub user_key:        SourceAttribute,
  #[serde(default)]
  pub external_id:     Option<SourceAttribute>,
  #[serde(default)]
  pub link_engagement: bool,
}

/// Ways of finding the org unit named by a manual user's org unit code, tried
/// in the configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgUnitLookup {
  /// The unit owning an IT user whose user key is the code.
  ItSystem,
  /// The code is the unit's UUID.
  Uuid,
  /// The code is the unit's user key.
  UserKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementConfig {
  /// User key of the `engagement_type` class given to created engagements.
  pub engagement_type:      String,
  /// User key of the `primary_type` class, if engagements are marked.
  #[serde(default)]
  pub primary:              Option<String>,
  /// Job function used when the job title matches no class.
  pub default_job_function: String,
  /// IT system linking org units to Omada org unit codes.
  pub org_unit_it_system:   String,
  #[serde(default = "default_org_unit_lookup")]
  pub org_unit_lookup:      Vec<OrgUnitLookup>,
}

fn default_org_unit_lookup() -> Vec<OrgUnitLookup> {
  vec![OrgUnitLookup::ItSystem, OrgUnitLookup::Uuid]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemovalPolicies {
  #[serde(default)]
  pub engagement: RemovalPolicy,
  #[serde(default)]
  pub address:    RemovalPolicy,
  #[serde(default)]
  pub it_user:    RemovalPolicy,
}

// ─── Customer ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerConfig {
  pub name:                        String,
  /// `IDENTITYCATEGORY.Id` of users whose identity Omada owns.
  pub manual_identity_category:    String,
  #[serde(default)]
  pub subject_key:                 SubjectKeyKind,
  #[serde(default)]
  pub addresses:                   BTreeMap<SourceAttribute, AddressMapping>,
  #[serde(default)]
  pub it_systems:                  Vec<ItSystemMapping>,
  pub engagement:                  EngagementConfig,
  #[serde(default)]
  pub removal:                     RemovalPolicies,
  /// Raw fields whose validation failures drop the record instead of failing
  /// the pass.
  #[serde(default)]
  pub tolerated_validation_fields: BTreeSet<String>,
}

impl CustomerConfig {
  pub fn tolerates(&self, error: &omada_core::Error) -> bool {
    error
      .field()
      .is_some_and(|field| self.tolerated_validation_fields.contains(field))
  }
}
