//! Desired MO state for a set of validated Omada users.
//!
//! The build functions are pure: classification lookups are resolved up front
//! into [`Classes`], and the person, engagement and org unit they attach to
//! are passed in. Only [`resolve_org_unit`] talks to MO.

use std::collections::{BTreeMap, HashMap};

use omada_core::{
  api::{OrgUnitRef, TargetApi},
  record::{
    ComparableAddress, ComparableEmployee, ComparableEngagement,
    ComparableItUser, Engagement,
  },
  source::{ManualFields, ManualUser, NormalUser},
  validity::Validity,
};
use uuid::Uuid;

use crate::{
  customer::{
    AddressMapping, EngagementConfig, ItSystemMapping, OrgUnitLookup,
    SourceAttribute,
  },
  error::{Error, Result},
};

/// MO facet user keys.
pub mod facet {
  pub const ADDRESS_TYPE: &str = "employee_address_type";
  pub const VISIBILITY: &str = "visibility";
  pub const JOB_FUNCTION: &str = "engagement_job_function";
  pub const ENGAGEMENT_TYPE: &str = "engagement_type";
  pub const PRIMARY: &str = "primary_type";
}

// ─── Classifications ─────────────────────────────────────────────────────────

/// Classes and IT systems by user key, fetched once per pass.
#[derive(Debug, Clone, Default)]
pub struct Classes {
  facets:     HashMap<&'static str, HashMap<String, Uuid>>,
  it_systems: HashMap<String, Uuid>,
}

impl Classes {
  pub fn new(
    facets: HashMap<&'static str, HashMap<String, Uuid>>,
    it_systems: HashMap<String, Uuid>,
  ) -> Self {
    Self { facets, it_systems }
  }

  pub async fn fetch<T: TargetApi>(target: &T) -> Result<Self> {
    let (address_types, visibility, job_functions, engagement_types, primary, it_systems) =
      tokio::try_join!(
        target.classes(facet::ADDRESS_TYPE),
        target.classes(facet::VISIBILITY),
        target.classes(facet::JOB_FUNCTION),
        target.classes(facet::ENGAGEMENT_TYPE),
        target.classes(facet::PRIMARY),
        target.it_systems(),
      )
      .map_err(Error::target_api)?;

    let facets = HashMap::from([
      (facet::ADDRESS_TYPE, address_types),
      (facet::VISIBILITY, visibility),
      (facet::JOB_FUNCTION, job_functions),
      (facet::ENGAGEMENT_TYPE, engagement_types),
      (facet::PRIMARY, primary),
    ]);
    Ok(Self { facets, it_systems })
  }

  pub fn class(&self, facet: &'static str, user_key: &str) -> Result<Uuid> {
    self
      .facets
      .get(facet)
      .and_then(|classes| classes.get(user_key))
      .copied()
      .ok_or_else(|| Error::ClassNotFound {
        facet:    facet.to_owned(),
        user_key: user_key.to_owned(),
      })
  }

  pub fn it_system(&self, user_key: &str) -> Result<Uuid> {
    self
      .it_systems
      .get(user_key)
      .copied()
      .ok_or_else(|| Error::ItSystemNotFound(user_key.to_owned()))
  }
}

// ─── Org units ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrgUnit {
  pub uuid:     Uuid,
  pub validity: Validity,
}

/// Find the org unit for an Omada org unit code, trying each configured
/// lookup in turn. Call errors propagate immediately; only a miss moves on to
/// the next lookup.
pub async fn resolve_org_unit<T: TargetApi>(
  target: &T,
  code: &str,
  config: &EngagementConfig,
) -> Result<OrgUnit> {
  for lookup in &config.org_unit_lookup {
    let by = match lookup {
      OrgUnitLookup::ItSystem => OrgUnitRef::ItUserKey {
        it_system: config.org_unit_it_system.clone(),
        user_key:  code.to_owned(),
      },
      OrgUnitLookup::Uuid => match Uuid::parse_str(code) {
        Ok(uuid) => OrgUnitRef::Uuid(uuid),
        Err(_) => continue,
      },
      OrgUnitLookup::UserKey => OrgUnitRef::UserKey(code.to_owned()),
    };
    let found = target
      .resolve_org_unit(by)
      .await
      .map_err(Error::target_api)?;
    if let Some(uuid) = found {
      tracing::debug!(code, %uuid, ?lookup, "resolved org unit");
      let validity = target
        .org_unit_validity(uuid)
        .await
        .map_err(Error::target_api)?;
      return Ok(OrgUnit { uuid, validity });
    }
  }
  Err(Error::OrgUnitNotFound(code.to_owned()))
}

// ─── Builders ────────────────────────────────────────────────────────────────

/// The user key MO engagements for `user` carry.
pub fn engagement_key(user: &NormalUser) -> Option<String> {
  user
    .service_number
    .clone()
    .or_else(|| user.employee_number.clone())
    .or_else(|| user.position.as_ref().map(|p| p.employment_number.clone()))
}

pub fn build_employee(manual: &ManualFields) -> ComparableEmployee {
  ComparableEmployee {
    cpr_number:          manual.cpr_number.clone(),
    given_name:          manual.first_name.clone(),
    surname:             manual.last_name.clone(),
    nickname_given_name: manual.nickname_first_name.clone(),
    nickname_surname:    manual.nickname_last_name.clone(),
  }
}

/// The engagement a manual user holds in `org_unit`.
///
/// The validity is clamped to the org unit's lifetime. An unknown job title
/// falls back to the configured default job function.
pub fn build_engagement(
  user: &ManualUser,
  person: Uuid,
  org_unit: &OrgUnit,
  classes: &Classes,
  config: &EngagementConfig,
) -> Result<ComparableEngagement> {
  let user_key =
    engagement_key(&user.user).ok_or(Error::MissingEngagementKey(user.user.uid))?;

  let job_function =
    match classes.class(facet::JOB_FUNCTION, &user.manual.job_title) {
      Ok(uuid) => uuid,
      Err(_) => {
        tracing::debug!(
          job_title = %user.manual.job_title,
          fallback = %config.default_job_function,
          "unknown job title"
        );
        classes.class(facet::JOB_FUNCTION, &config.default_job_function)?
      }
    };

  let validity = Validity::intersection([&user.user.validity, &org_unit.validity])
    .unwrap_or(user.user.validity);

  Ok(ComparableEngagement {
    user_key,
    org_unit: org_unit.uuid,
    person,
    job_function,
    engagement_type: classes.class(facet::ENGAGEMENT_TYPE, &config.engagement_type)?,
    primary: config
      .primary
      .as_deref()
      .map(|primary| classes.class(facet::PRIMARY, primary))
      .transpose()?,
    validity,
  })
}

/// The engagement of `user` among `engagements`, if it exists yet.
fn linked_engagement(user: &NormalUser, engagements: &[Engagement]) -> Option<Uuid> {
  let key = engagement_key(user)?;
  engagements
    .iter()
    .find(|e| e.user_key == key)
    .map(|e| e.uuid)
}

/// One address per mapped attribute that has a value.
pub fn build_addresses(
  user: &NormalUser,
  person: Uuid,
  engagements: &[Engagement],
  classes: &Classes,
  mappings: &BTreeMap<SourceAttribute, AddressMapping>,
) -> Result<Vec<ComparableAddress>> {
  let mut addresses = Vec::new();
  for (attribute, mapping) in mappings {
    let Some(value) = attribute.value(user) else {
      continue;
    };
    let engagement = if mapping.link_engagement {
      linked_engagement(user, engagements)
    } else {
      None
    };
    addresses.push(ComparableAddress {
      value,
      address_type: classes.class(facet::ADDRESS_TYPE, &mapping.address_type)?,
      person,
      visibility: mapping
        .visibility
        .as_deref()
        .map(|v| classes.class(facet::VISIBILITY, v))
        .transpose()?,
      engagement,
      ituser: None,
      validity: user.validity,
    });
  }
  Ok(addresses)
}

/// One account per mapped IT system whose user key attribute has a value.
pub fn build_it_users(
  user: &NormalUser,
  person: Uuid,
  engagements: &[Engagement],
  classes: &Classes,
  mappings: &[ItSystemMapping],
) -> Result<Vec<ComparableItUser>> {
  let mut it_users = Vec::new();
  for mapping in mappings {
    let Some(user_key) = mapping.user_key.value(user) else {
      continue;
    };
    let engagement = if mapping.link_engagement {
      linked_engagement(user, engagements)
    } else {
      None
    };
    it_users.push(ComparableItUser {
      external_id: mapping.external_id.and_then(|a| a.value(user)),
      user_key: Some(user_key),
      itsystem: classes.it_system(&mapping.it_system)?,
      person,
      engagement,
      validity: user.validity,
    });
  }
  Ok(it_users)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use omada_core::source::{IdentityCategory, Position};

  use super::*;

  fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  fn user() -> NormalUser {
    NormalUser {
      id:                1,
      uid:               Uuid::new_v4(),
      validity:          Validity::open(date(2024, 1, 1)),
      identity_category: IdentityCategory {
        id:    "558".into(),
        uid:   None,
        value: None,
      },
      service_number:    Some("v1216".into()),
      employee_number:   None,
      cpr_number:        Some("0101901234".into()),
      object_guid:       None,
      login:             Some("alice".into()),
      email:             Some("a@b.dk".into()),
      email2:            None,
      phone:             Some("".into()),
      cellphone:         None,
      direct_phone:      None,
      institution_phone: None,
      position:          None,
    }
  }

  fn manual() -> ManualUser {
    ManualUser {
      user:   user(),
      manual: ManualFields {
        first_name:          "Alice".into(),
        last_name:           "Liddell".into(),
        nickname_first_name: None,
        nickname_last_name:  None,
        cpr_number:          "0101901234".into(),
        org_unit:            "123".into(),
        job_title:           "Pædagog".into(),
      },
    }
  }

  struct Fixture {
    classes:   Classes,
    email:     Uuid,
    pedagogue: Uuid,
    fallback:  Uuid,
    omada:     Uuid,
    ad:        Uuid,
  }

  fn fixture() -> Fixture {
    let (email, pedagogue, fallback, omada, ad) = (
      Uuid::new_v4(),
      Uuid::new_v4(),
      Uuid::new_v4(),
      Uuid::new_v4(),
      Uuid::new_v4(),
    );
    let classes = Classes::new(
      HashMap::from([
        (facet::ADDRESS_TYPE, HashMap::from([("EmailEmployee".into(), email)])),
        (
          facet::JOB_FUNCTION,
          HashMap::from([
            ("Pædagog".into(), pedagogue),
            ("not_applicable".into(), fallback),
          ]),
        ),
        (facet::ENGAGEMENT_TYPE, HashMap::from([("omada".into(), omada)])),
      ]),
      HashMap::from([("Active Directory".into(), ad)]),
    );
    Fixture { classes, email, pedagogue, fallback, omada, ad }
  }

  fn engagement_config() -> EngagementConfig {
    EngagementConfig {
      engagement_type:      "omada".into(),
      primary:              None,
      default_job_function: "not_applicable".into(),
      org_unit_it_system:   "omada_org_unit".into(),
      org_unit_lookup:      vec![OrgUnitLookup::ItSystem, OrgUnitLookup::Uuid],
    }
  }

  #[test]
  fn absent_values_produce_no_address() {
    let f = fixture();
    let person = Uuid::new_v4();
    let mappings = BTreeMap::from([
      (SourceAttribute::Email, AddressMapping {
        address_type:    "EmailEmployee".into(),
        visibility:      None,
        link_engagement: false,
      }),
      (SourceAttribute::Phone, AddressMapping {
        address_type:    "PhoneEmployee".into(),
        visibility:      None,
        link_engagement: false,
      }),
    ]);
    // Phone is empty, so its unknown address type is never looked up.
    let addresses =
      build_addresses(&user(), person, &[], &f.classes, &mappings).unwrap();
    assert_eq!(addresses, vec![ComparableAddress {
      value:        "a@b.dk".into(),
      address_type: f.email,
      person,
      visibility:   None,
      engagement:   None,
      ituser:       None,
      validity:     Validity::open(date(2024, 1, 1)),
    }]);
  }

  #[test]
  fn addresses_link_to_existing_engagement() {
    let f = fixture();
    let person = Uuid::new_v4();
    let engagement = Engagement {
      uuid: Uuid::new_v4(),
      user_key: "v1216".into(),
      org_unit: Uuid::new_v4(),
      person,
      job_function: f.pedagogue,
      engagement_type: f.omada,
      primary: None,
      validity: Validity::open(date(2024, 1, 1)),
    };
    let mappings = BTreeMap::from([(SourceAttribute::Email, AddressMapping {
      address_type:    "EmailEmployee".into(),
      visibility:      None,
      link_engagement: true,
    })]);
    let addresses = build_addresses(
      &user(),
      person,
      std::slice::from_ref(&engagement),
      &f.classes,
      &mappings,
    )
    .unwrap();
    assert_eq!(addresses[0].engagement, Some(engagement.uuid));
  }

  #[test]
  fn unknown_address_type_is_a_resolution_error() {
    let f = fixture();
    let mappings = BTreeMap::from([(SourceAttribute::Email, AddressMapping {
      address_type:    "Fax".into(),
      visibility:      None,
      link_engagement: false,
    })]);
    let err = build_addresses(&user(), Uuid::new_v4(), &[], &f.classes, &mappings)
      .unwrap_err();
    assert!(matches!(err, Error::ClassNotFound { .. }));
  }

  #[test]
  fn it_users_need_a_user_key() {
    let f = fixture();
    let mappings = [ItSystemMapping {
      it_system:       "Active Directory".into(),
      user_key:        SourceAttribute::Login,
      external_id:     Some(SourceAttribute::ObjectGuid),
      link_engagement: false,
    }];
    let it_users =
      build_it_users(&user(), Uuid::new_v4(), &[], &f.classes, &mappings).unwrap();
    assert_eq!(it_users.len(), 1);
    assert_eq!(it_users[0].user_key.as_deref(), Some("alice"));
    assert_eq!(it_users[0].external_id, None);
    assert_eq!(it_users[0].itsystem, f.ad);

    let mut no_login = user();
    no_login.login = None;
    let it_users =
      build_it_users(&no_login, Uuid::new_v4(), &[], &f.classes, &mappings)
        .unwrap();
    assert!(it_users.is_empty());
  }

  #[test]
  fn engagement_validity_is_clamped_to_org_unit() {
    let f = fixture();
    let org_unit = OrgUnit {
      uuid:     Uuid::new_v4(),
      validity: Validity::from_dates(date(2020, 1, 1), Some(date(2025, 12, 31))),
    };
    let engagement = build_engagement(
      &manual(),
      Uuid::new_v4(),
      &org_unit,
      &f.classes,
      &engagement_config(),
    )
    .unwrap();
    assert_eq!(engagement.user_key, "v1216");
    assert_eq!(engagement.job_function, f.pedagogue);
    assert_eq!(engagement.engagement_type, f.omada);
    assert_eq!(
      engagement.validity,
      Validity::from_dates(date(2024, 1, 1), Some(date(2025, 12, 31)))
    );
  }

  #[test]
  fn unknown_job_title_uses_default() {
    let f = fixture();
    let mut user = manual();
    user.manual.job_title = "Troldmand".into();
    let org_unit = OrgUnit {
      uuid:     Uuid::new_v4(),
      validity: Validity::open(date(2000, 1, 1)),
    };
    let engagement = build_engagement(
      &user,
      Uuid::new_v4(),
      &org_unit,
      &f.classes,
      &engagement_config(),
    )
    .unwrap();
    assert_eq!(engagement.job_function, f.fallback);
  }

  #[test]
  fn engagement_key_falls_back_to_employment_number() {
    let mut u = user();
    u.service_number = None;
    u.position = Some(Position {
      job_title:         "Pædagog".into(),
      org_unit:          "123".into(),
      employment_number: "42".into(),
    });
    assert_eq!(engagement_key(&u).as_deref(), Some("42"));
    u.position = None;
    assert_eq!(engagement_key(&u), None);
  }

  #[test]
  fn employee_comes_from_manual_fields() {
    let employee = build_employee(&manual().manual);
    assert_eq!(employee.given_name, "Alice");
    assert_eq!(employee.surname, "Liddell");
    assert_eq!(employee.cpr_number, "0101901234");
  }
}
