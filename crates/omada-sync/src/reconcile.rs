//! Set reconciliation of one entity kind for one subject.
//!
//! Live MO objects are keyed by their comparable projection. Whatever is live
//! but not expected is removed, whatever is expected but not live is created,
//! and everything else is left alone. Running a pass twice without changes in
//! between therefore does nothing the second time.

use std::{
  collections::{BTreeMap, BTreeSet},
  future::Future,
};

use chrono::NaiveDate;
use futures::future::join_all;
use omada_core::{
  api::TargetApi,
  record::{Address, Engagement, ItUser, RemovalPolicy, TargetEntity},
};
use uuid::Uuid;

use crate::error::{Error, Result};

// ─── Planning ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan<E: TargetEntity> {
  pub to_remove: Vec<E>,
  pub to_add:    Vec<E::Comparable>,
}

impl<E: TargetEntity> Plan<E> {
  pub fn is_empty(&self) -> bool {
    self.to_remove.is_empty() && self.to_add.is_empty()
  }
}

/// Compute the operations that turn `actual` into `expected`.
///
/// Equal expected records collapse into one. When several live objects share
/// a comparable key, the first is kept and the rest are removed.
pub fn plan<E: TargetEntity>(
  actual: Vec<E>,
  expected: impl IntoIterator<Item = E::Comparable>,
) -> Plan<E> {
  let expected: BTreeSet<E::Comparable> = expected.into_iter().collect();

  let mut live: BTreeMap<E::Comparable, E> = BTreeMap::new();
  let mut to_remove = Vec::new();
  for entity in actual {
    let key = entity.comparable();
    if live.contains_key(&key) {
      to_remove.push(entity);
    } else {
      live.insert(key, entity);
    }
  }

  to_remove.extend(
    live
      .iter()
      .filter(|(key, _)| !expected.contains(key))
      .map(|(_, entity)| entity.clone()),
  );
  let to_add = expected
    .into_iter()
    .filter(|key| !live.contains_key(key))
    .collect();

  Plan { to_remove, to_add }
}

// ─── Applying ────────────────────────────────────────────────────────────────

/// An entity kind MO can create in batches.
pub trait Reconcilable: TargetEntity {
  fn create<'a, T: TargetApi>(
    target: &'a T,
    records: Vec<Self::Comparable>,
  ) -> impl Future<Output = Result<Vec<Uuid>, T::Error>> + Send + 'a;
}

impl Reconcilable for Engagement {
  fn create<'a, T: TargetApi>(
    target: &'a T,
    records: Vec<Self::Comparable>,
  ) -> impl Future<Output = Result<Vec<Uuid>, T::Error>> + Send + 'a {
    target.create_engagements(records)
  }
}

impl Reconcilable for Address {
  fn create<'a, T: TargetApi>(
    target: &'a T,
    records: Vec<Self::Comparable>,
  ) -> impl Future<Output = Result<Vec<Uuid>, T::Error>> + Send + 'a {
    target.create_addresses(records)
  }
}

impl Reconcilable for ItUser {
  fn create<'a, T: TargetApi>(
    target: &'a T,
    records: Vec<Self::Comparable>,
  ) -> impl Future<Output = Result<Vec<Uuid>, T::Error>> + Send + 'a {
    target.create_it_users(records)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome {
  pub removed: usize,
  pub created: usize,
}

/// Carry out `plan`.
///
/// Every removal is attempted concurrently before anything is created. If any
/// removal fails, the first failure is returned once all have settled and
/// nothing is created. Objects that have not started yet by `today` cannot be
/// end-dated and are deleted regardless of `policy`.
pub async fn apply<E, T>(
  target: &T,
  plan: Plan<E>,
  policy: RemovalPolicy,
  today: NaiveDate,
) -> Result<Outcome>
where
  E: Reconcilable,
  T: TargetApi,
{
  let removals = plan.to_remove.iter().map(|entity| {
    let uuid = entity.uuid();
    let not_started = entity.validity().is_some_and(|v| v.from >= today);
    async move {
      let result = match policy {
        RemovalPolicy::Terminate if !not_started => {
          target.terminate(E::KIND, uuid).await
        }
        _ => target.delete(E::KIND, uuid).await,
      };
      if let Err(e) = &result {
        tracing::error!(kind = %E::KIND, %uuid, error = %e, "removal failed");
      } else {
        tracing::debug!(kind = %E::KIND, %uuid, ?policy, "removed");
      }
      result
    }
  });
  join_all(removals)
    .await
    .into_iter()
    .collect::<Result<Vec<()>, T::Error>>()
    .map_err(Error::target_api)?;

  let removed = plan.to_remove.len();
  let created = if plan.to_add.is_empty() {
    0
  } else {
    let uuids = E::create(target, plan.to_add)
      .await
      .map_err(Error::target_api)?;
    tracing::debug!(kind = %E::KIND, created = uuids.len(), "created");
    uuids.len()
  };

  Ok(Outcome { removed, created })
}

/// Plan and apply one kind for one subject.
pub async fn reconcile<E, T>(
  target: &T,
  subject: &str,
  actual: Vec<E>,
  expected: impl IntoIterator<Item = E::Comparable>,
  policy: RemovalPolicy,
  today: NaiveDate,
) -> Result<Outcome>
where
  E: Reconcilable,
  T: TargetApi,
{
  let plan = plan(actual, expected);
  if plan.is_empty() {
    tracing::debug!(subject, kind = %E::KIND, "already in sync");
    return Ok(Outcome::default());
  }
  tracing::info!(
    subject,
    kind = %E::KIND,
    remove = plan.to_remove.len(),
    add = plan.to_add.len(),
    "reconciling"
  );
  apply(target, plan, policy, today).await
}

#[cfg(test)]
mod tests {
  use omada_core::{record::ComparableAddress, validity::Validity};

  use super::*;

  fn comparable(value: &str) -> ComparableAddress {
    ComparableAddress {
      value:        value.into(),
      address_type: Uuid::nil(),
      person:       Uuid::nil(),
      visibility:   None,
      engagement:   None,
      ituser:       None,
      validity:     Validity::open(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
    }
  }

  fn live(value: &str) -> Address {
    let c = comparable(value);
    let uuid = Uuid::new_v4();
    Address {
      uuid,
      user_key: uuid.to_string(),
      value: c.value,
      address_type: c.address_type,
      person: c.person,
      visibility: c.visibility,
      engagement: c.engagement,
      ituser: c.ituser,
      validity: c.validity,
    }
  }

  #[test]
  fn plan_is_set_difference() {
    let a = live("a");
    let b = live("b");
    let plan = plan(vec![a.clone(), b.clone()], [comparable("b"), comparable("c")]);
    assert_eq!(plan.to_remove, vec![a]);
    assert_eq!(plan.to_add, vec![comparable("c")]);
  }

  #[test]
  fn matching_sets_plan_nothing() {
    let plan = plan(vec![live("a"), live("b")], [comparable("a"), comparable("b")]);
    assert!(plan.is_empty());
  }

  #[test]
  fn equal_expected_records_collapse() {
    let plan = plan(Vec::<Address>::new(), [comparable("a"), comparable("a")]);
    assert_eq!(plan.to_add.len(), 1);
  }

  #[test]
  fn duplicate_live_objects_are_trimmed() {
    let first = live("a");
    let second = live("a");
    let plan = plan(vec![first, second.clone()], [comparable("a")]);
    assert_eq!(plan.to_remove, vec![second]);
    assert!(plan.to_add.is_empty());
  }

  #[test]
  fn applying_the_plan_yields_expected_set() {
    let actual = vec![live("a"), live("b"), live("b")];
    let expected = [comparable("b"), comparable("c")];
    let p = plan(actual.clone(), expected.clone());

    let removed: BTreeSet<Uuid> = p.to_remove.iter().map(|e| e.uuid).collect();
    let mut after: BTreeSet<ComparableAddress> = actual
      .iter()
      .filter(|e| !removed.contains(&e.uuid))
      .map(|e| e.comparable())
      .collect();
    after.extend(p.to_add);
    assert_eq!(after, BTreeSet::from(expected));
  }
}
