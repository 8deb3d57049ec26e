//! One subject pass per source event.
//!
//! An event only says that some Omada record changed. The handler works out
//! which MO employee it belongs to, gathers every current Omada record of
//! that person and reconciles MO against all of them. Create, update and
//! delete events therefore take the same path: a deleted record simply no
//! longer shows up among the person's records.
//!
//! A person's records are found through the keys they share. Starting from
//! the event's record, records are fetched by CPR number (in both stored
//! forms) and, when subjects are keyed by service number, by service number,
//! including the user keys of the person's engagements in MO. Keys found on
//! fetched records are followed until nothing new turns up.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::Arc,
};

use chrono::{Local, NaiveDate};
use omada_core::{
  api::{SourceApi, SubjectKey, TargetApi},
  event::SourceEvent,
  record::{Address, Engagement, ItUser, TargetEntity},
  source::{
    ManualFields, NormalUser, OmadaUser, RawRecord, cpr_forms, fields,
    record_key,
  },
};
use serde_json::Value;
use uuid::Uuid;

use crate::{
  builder::{
    self, Classes, build_addresses, build_employee, build_engagement,
    build_it_users, facet,
  },
  customer::{CustomerConfig, SubjectKeyKind},
  error::{Error, Result},
  lock::SubjectLocks,
  reconcile::{Outcome, reconcile},
};

/// What a pass changed, per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassReport {
  pub engagements: Outcome,
  pub addresses:   Outcome,
  pub it_users:    Outcome,
}

/// Omada values shared by the records of one person.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceKeys {
  /// Validated, without separator.
  pub cprs:            BTreeSet<String>,
  /// As stored in Omada as well as zero-stripped.
  pub service_numbers: BTreeSet<String>,
}

impl SourceKeys {
  /// The keys carried by one record.
  pub fn of(raw: &RawRecord, user: &NormalUser) -> Self {
    let mut keys = Self::default();
    keys.add(raw, user);
    keys
  }

  fn add(&mut self, raw: &RawRecord, user: &NormalUser) {
    self.cprs.extend(user.cpr_number.clone());
    self.service_numbers.extend(user.service_number.clone());
    if let Some(Value::String(stored)) = raw.get(fields::SERVICE_NUMBER)
      && !stored.is_empty()
    {
      self.service_numbers.insert(stored.clone());
    }
  }
}

pub struct SyncHandler<S, T> {
  source:   Arc<S>,
  target:   Arc<T>,
  customer: Arc<CustomerConfig>,
  locks:    SubjectLocks,
}

impl<S, T> Clone for SyncHandler<S, T> {
  fn clone(&self) -> Self {
    Self {
      source:   self.source.clone(),
      target:   self.target.clone(),
      customer: self.customer.clone(),
      locks:    self.locks.clone(),
    }
  }
}

fn today() -> NaiveDate { Local::now().date_naive() }

impl<S, T> SyncHandler<S, T>
where
  S: SourceApi,
  T: TargetApi,
{
  pub fn new(source: Arc<S>, target: Arc<T>, customer: Arc<CustomerConfig>) -> Self {
    Self {
      source,
      target,
      customer,
      locks: SubjectLocks::new(),
    }
  }

  /// Bring the MO employee behind `event` in line with Omada.
  ///
  /// Returns `None` when the event is skipped: a tolerated invalid record, a
  /// record without a subject key, or a subject with no MO employee.
  pub async fn handle(&self, event: &SourceEvent) -> Result<Option<PassReport>> {
    let Some(user) = self.validate(&event.payload)? else {
      return Ok(None);
    };
    let Some(key) = self.customer.subject_key.key(user.user()) else {
      tracing::debug!(uid = %event.key, "record has no subject key");
      return Ok(None);
    };
    tracing::debug!(event = %event.kind, uid = %event.key, subject = %key, "handling");
    self
      .sync_subject(key, SourceKeys::of(&event.payload, user.user()))
      .await
  }

  /// Reconcile the person identified by `key` against every current Omada
  /// record reachable from `keys`.
  pub async fn sync_subject(
    &self,
    key: SubjectKey,
    keys: SourceKeys,
  ) -> Result<Option<PassReport>> {
    let today = today();
    let subject = key.to_string();

    let users = self.person_records(keys.clone(), today).await?;
    let Some(person) = self.resolve_person(&key, &users).await? else {
      tracing::info!(subject, "no employee in MO, skipping");
      return Ok(None);
    };

    let _guard = self.locks.lock(&person.to_string()).await;
    let target = self.target.as_ref();

    // Everything below is read again under the lock.
    let mut state = target
      .subject_state(person)
      .await
      .map_err(Error::target_api)?;
    let mut keys = keys;
    if self.customer.subject_key == SubjectKeyKind::ServiceNumber {
      keys
        .service_numbers
        .extend(state.engagements.iter().map(|e| e.user_key.clone()));
    }
    let users = self.person_records(keys, today).await?;
    if let Some(manual) = users.iter().find_map(OmadaUser::manual) {
      self.update_employee(person, manual).await?;
    }

    let classes = Classes::fetch(target).await?;
    let removal = self.customer.removal;

    // Engagements first: addresses and IT users may link to them.
    let engagement_type =
      classes.class(facet::ENGAGEMENT_TYPE, &self.customer.engagement.engagement_type)?;
    let mut expected_engagements = Vec::new();
    for user in &users {
      if let OmadaUser::Manual(manual) = user {
        let org_unit = builder::resolve_org_unit(
          target,
          &manual.manual.org_unit,
          &self.customer.engagement,
        )
        .await?;
        expected_engagements.push(build_engagement(
          manual,
          person,
          &org_unit,
          &classes,
          &self.customer.engagement,
        )?);
      }
    }
    let actual_engagements: Vec<Engagement> = state
      .engagements
      .iter()
      .filter(|e| e.engagement_type == engagement_type)
      .cloned()
      .collect();
    let engagements = reconcile(
      target,
      &subject,
      actual_engagements,
      expected_engagements,
      removal.engagement,
      today,
    )
    .await?;
    if engagements != Outcome::default() {
      state = target
        .subject_state(person)
        .await
        .map_err(Error::target_api)?;
    }

    let address_types = self
      .customer
      .addresses
      .values()
      .map(|m| classes.class(facet::ADDRESS_TYPE, &m.address_type))
      .collect::<Result<Vec<Uuid>>>()?;
    let it_systems = self
      .customer
      .it_systems
      .iter()
      .map(|m| classes.it_system(&m.it_system))
      .collect::<Result<Vec<Uuid>>>()?;

    let mut expected_addresses = Vec::new();
    let mut expected_it_users = Vec::new();
    for user in &users {
      let user = user.user();
      expected_addresses.extend(build_addresses(
        user,
        person,
        &state.engagements,
        &classes,
        &self.customer.addresses,
      )?);
      expected_it_users.extend(build_it_users(
        user,
        person,
        &state.engagements,
        &classes,
        &self.customer.it_systems,
      )?);
    }
    let actual_addresses: Vec<Address> = state
      .addresses
      .into_iter()
      .filter(|a| address_types.contains(&a.address_type))
      .collect();
    let actual_it_users: Vec<ItUser> = state
      .it_users
      .into_iter()
      .filter(|i| it_systems.contains(&i.itsystem))
      .collect();

    let (addresses, it_users) = tokio::try_join!(
      reconcile(
        target,
        &subject,
        actual_addresses,
        expected_addresses,
        removal.address,
        today,
      ),
      reconcile(
        target,
        &subject,
        actual_it_users,
        expected_it_users,
        removal.it_user,
        today,
      ),
    )?;

    let report = PassReport { engagements, addresses, it_users };
    tracing::info!(subject, %person, records = users.len(), ?report, "subject in sync");
    Ok(Some(report))
  }

  /// Every current Omada record reachable from `keys`, once each, ordered by
  /// UId.
  async fn person_records(
    &self,
    mut keys: SourceKeys,
    today: NaiveDate,
  ) -> Result<Vec<OmadaUser>> {
    let by_service_number =
      self.customer.subject_key == SubjectKeyKind::ServiceNumber;
    let mut fetched = SourceKeys::default();
    let mut users = BTreeMap::new();

    loop {
      let cprs: Vec<String> = keys
        .cprs
        .difference(&fetched.cprs)
        .flat_map(|cpr| cpr_forms(cpr))
        .collect();
      let numbers: Vec<String> = if by_service_number {
        keys
          .service_numbers
          .difference(&fetched.service_numbers)
          .cloned()
          .collect()
      } else {
        Vec::new()
      };
      if cprs.is_empty() && numbers.is_empty() {
        break;
      }
      fetched = keys.clone();

      let mut raws = self
        .source
        .fetch_by(fields::CPR_NUMBER, &cprs)
        .await
        .map_err(Error::source_api)?;
      raws.extend(
        self
          .source
          .fetch_by(fields::SERVICE_NUMBER, &numbers)
          .await
          .map_err(Error::source_api)?,
      );

      for raw in &raws {
        let Some(user) = self.validate(raw)? else { continue };
        if !user.user().validity.is_current_or_future(today) {
          continue;
        }
        keys.add(raw, user.user());
        users.insert(user.user().uid, user);
      }
    }

    Ok(users.into_values().collect())
  }

  /// Validate a raw record, dropping it if its failure is tolerated.
  fn validate(&self, raw: &RawRecord) -> Result<Option<OmadaUser>> {
    match OmadaUser::parse(raw, &self.customer.manual_identity_category) {
      Ok(user) => Ok(Some(user)),
      Err(e) if self.customer.tolerates(&e) => {
        tracing::warn!(
          uid = record_key(raw).as_deref().unwrap_or("?"),
          error = %e,
          "dropping invalid record"
        );
        Ok(None)
      }
      Err(e) => Err(e.into()),
    }
  }

  /// The MO employee the records belong to.
  ///
  /// Omada owns the identity of manual users: such an employee is looked up
  /// by CPR number and created when missing. Otherwise the employee must
  /// already exist.
  async fn resolve_person(
    &self,
    key: &SubjectKey,
    users: &[OmadaUser],
  ) -> Result<Option<Uuid>> {
    let Some(manual) = users.iter().find_map(OmadaUser::manual) else {
      return self.lookup_subject(key).await;
    };

    let cpr = SubjectKey::Cpr(manual.cpr_number.clone());
    // Creation is serialised on the CPR number; the person's own lock is
    // only taken once the person exists.
    let _guard = self.locks.lock(cpr.value()).await;
    if let Some(uuid) = self.lookup_subject(&cpr).await? {
      return Ok(Some(uuid));
    }
    let uuid = self
      .target
      .create_employee(build_employee(manual))
      .await
      .map_err(Error::target_api)?;
    tracing::info!(subject = %cpr, %uuid, "created employee");
    Ok(Some(uuid))
  }

  async fn lookup_subject(&self, key: &SubjectKey) -> Result<Option<Uuid>> {
    let matches = self
      .target
      .resolve_subject(key.clone())
      .await
      .map_err(Error::target_api)?;
    match matches.as_slice() {
      [] => Ok(None),
      [uuid] => Ok(Some(*uuid)),
      _ => Err(Error::AmbiguousSubject {
        key: key.to_string(),
        matches,
      }),
    }
  }

  /// Bring the employee's identity in line with a manual record.
  async fn update_employee(&self, person: Uuid, manual: &ManualFields) -> Result<()> {
    let desired = build_employee(manual);
    let current = self
      .target
      .employee(person)
      .await
      .map_err(Error::target_api)?;
    if current.map(|e| e.comparable()).as_ref() != Some(&desired) {
      self
        .target
        .update_employee(person, desired)
        .await
        .map_err(Error::target_api)?;
      tracing::info!(%person, "updated employee");
    }
    Ok(())
  }
}
