//! Snapshot differ: two full Omada populations → change events.
//!
//! Records are matched by their `UId`. A record counts as changed when any
//! field differs, not just the fields some mapping currently reads; fields
//! listed in [`DiffOptions::ignored_fields`] are the only exception.

use std::collections::{BTreeMap, BTreeSet};

use omada_core::{
  event::{EventKind, SourceEvent},
  source::{RawRecord, record_key},
};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiffOptions {
  /// Raw fields whose changes alone do not produce an event.
  #[serde(default)]
  pub ignored_fields: BTreeSet<String>,
}

/// Compute one event per changed record, ordered by key.
///
/// Records without a usable `UId` cannot be tracked and are skipped.
pub fn diff(
  old: &[RawRecord],
  new: &[RawRecord],
  options: &DiffOptions,
) -> Vec<SourceEvent> {
  let old = index(old);
  let new = index(new);

  let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
  keys
    .into_iter()
    .filter_map(|key| {
      let (kind, payload) = match (old.get(key), new.get(key)) {
        (None, Some(record)) => (EventKind::Create, *record),
        (Some(record), None) => (EventKind::Delete, *record),
        (Some(before), Some(after)) if !same(before, after, options) => {
          (EventKind::Update, *after)
        }
        _ => return None,
      };
      Some(SourceEvent {
        kind,
        key: key.clone(),
        payload: payload.clone(),
      })
    })
    .collect()
}

fn index(records: &[RawRecord]) -> BTreeMap<String, &RawRecord> {
  let mut indexed = BTreeMap::new();
  for record in records {
    match record_key(record) {
      Ok(key) => {
        if indexed.insert(key.clone(), record).is_some() {
          tracing::warn!(uid = %key, "duplicate UId in snapshot; keeping the last");
        }
      }
      Err(e) => tracing::warn!(error = %e, "skipping record without UId"),
    }
  }
  indexed
}

fn same(a: &RawRecord, b: &RawRecord, options: &DiffOptions) -> bool {
  if options.ignored_fields.is_empty() {
    return a == b;
  }
  let relevant = |record: &RawRecord| -> BTreeMap<String, serde_json::Value> {
    record
      .iter()
      .filter(|(k, _)| !options.ignored_fields.contains(*k))
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  };
  relevant(a) == relevant(b)
}

#[cfg(test)]
mod tests {
  use serde_json::{Value, json};

  use super::*;

  fn record(uid: &str, value: i64) -> RawRecord {
    match json!({ "UId": uid, "VALUE": value, "LASTLOGIN": "2024-01-01" }) {
      Value::Object(map) => map,
      _ => unreachable!(),
    }
  }

  fn kinds(events: &[SourceEvent]) -> Vec<(EventKind, &str)> {
    events.iter().map(|e| (e.kind, e.key.as_str())).collect()
  }

  #[test]
  fn classifies_create_update_delete() {
    let old = vec![record("a", 1), record("b", 2), record("c", 3)];
    let new = vec![record("a", 1), record("b", 3), record("d", 4)];

    let events = diff(&old, &new, &DiffOptions::default());
    assert_eq!(
      kinds(&events),
      vec![
        (EventKind::Update, "b"),
        (EventKind::Delete, "c"),
        (EventKind::Create, "d"),
      ]
    );
  }

  #[test]
  fn payloads_carry_the_relevant_record() {
    let old = vec![record("b", 2), record("c", 3)];
    let new = vec![record("b", 3)];

    let events = diff(&old, &new, &DiffOptions::default());
    assert_eq!(events[0].payload, record("b", 3));
    assert_eq!(events[1].payload, record("c", 3));
  }

  #[test]
  fn first_run_creates_everything() {
    let new = vec![record("a", 1), record("b", 2)];
    let events = diff(&[], &new, &DiffOptions::default());
    assert!(events.iter().all(|e| e.kind == EventKind::Create));
    assert_eq!(events.len(), 2);
  }

  #[test]
  fn unchanged_population_is_silent() {
    let records = vec![record("a", 1), record("b", 2)];
    assert!(diff(&records, &records, &DiffOptions::default()).is_empty());
  }

  #[test]
  fn any_field_change_is_an_update() {
    let old = vec![record("a", 1)];
    let mut changed = record("a", 1);
    changed.insert("LASTLOGIN".into(), json!("2024-02-01"));

    let events = diff(&old, &[changed.clone()], &DiffOptions::default());
    assert_eq!(kinds(&events), vec![(EventKind::Update, "a")]);

    let options = DiffOptions {
      ignored_fields: ["LASTLOGIN".to_owned()].into(),
    };
    assert!(diff(&old, &[changed], &options).is_empty());
  }

  #[test]
  fn uid_case_change_is_an_update_not_a_replacement() {
    let old = vec![record("ABC", 1)];
    let new = vec![record("abc", 1)];
    let events = diff(&old, &new, &DiffOptions::default());
    assert_eq!(kinds(&events), vec![(EventKind::Update, "abc")]);
  }

  #[test]
  fn records_without_uid_are_skipped() {
    let mut broken = record("x", 1);
    broken.remove("UId");
    let events = diff(&[], &[broken, record("a", 1)], &DiffOptions::default());
    assert_eq!(kinds(&events), vec![(EventKind::Create, "a")]);
  }
}
