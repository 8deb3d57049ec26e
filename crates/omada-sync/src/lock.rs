//! Per-subject mutual exclusion.
//!
//! Passes for the same subject read MO state, diff it and write the result.
//! Two such passes interleaving would each act on a stale read, so they are
//! serialised on the employee's UUID, or on the CPR number while the employee
//! is being created. Passes for different subjects do not wait on each other.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = HashMap<String, Arc<AsyncMutex<()>>>;

/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct SubjectLocks {
  slots: Arc<Mutex<Slots>>,
}

/// Held for the duration of one subject pass.
pub struct SubjectGuard {
  key:    String,
  slots:  Arc<Mutex<Slots>>,
  _guard: OwnedMutexGuard<()>,
}

impl SubjectLocks {
  pub fn new() -> Self { Self::default() }

  /// Wait until no other pass holds `key`, then take it.
  pub async fn lock(&self, key: &str) -> SubjectGuard {
    let slot = {
      let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
      slots.entry(key.to_owned()).or_default().clone()
    };
    let guard = slot.lock_owned().await;
    SubjectGuard {
      key:    key.to_owned(),
      slots:  self.slots.clone(),
      _guard: guard,
    }
  }

  /// Number of subjects currently locked or waited on.
  pub fn len(&self) -> usize {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Drop for SubjectGuard {
  fn drop(&mut self) {
    let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
    // One reference in the table, one held by our guard. Anything more is a
    // waiter that still needs the slot.
    if slots
      .get(&self.key)
      .is_some_and(|slot| Arc::strong_count(slot) <= 2)
    {
      slots.remove(&self.key);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
  };

  use super::*;

  #[tokio::test]
  async fn same_key_is_serialised() {
    let locks = SubjectLocks::new();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
      let (locks, active, peak) = (locks.clone(), active.clone(), peak.clone());
      tasks.spawn(async move {
        let _guard = locks.lock("0101901234").await;
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        active.fetch_sub(1, Ordering::SeqCst);
      });
    }
    while tasks.join_next().await.is_some() {}

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(locks.is_empty());
  }

  #[tokio::test]
  async fn different_keys_do_not_block() {
    let locks = SubjectLocks::new();
    let _a = locks.lock("a").await;
    let b = tokio::time::timeout(Duration::from_secs(1), locks.lock("b")).await;
    assert!(b.is_ok());
    assert_eq!(locks.len(), 2);
  }

  #[tokio::test]
  async fn released_keys_are_forgotten() {
    let locks = SubjectLocks::new();
    drop(locks.lock("a").await);
    assert!(locks.is_empty());
  }
}
