//! Fixed-interval polling with randomized backoff after failures.
//!
//! Cycles never overlap: the next one is only scheduled once the previous one
//! has returned. After a failure the wait is drawn uniformly from
//! `[backoff_min, backoff_max]`, so several deployments hitting the same
//! Omada instance do not retry in lockstep after a shared outage.

use std::time::Duration;

use rand_core::{OsRng, RngCore};
use serde::Deserialize;
use tokio::sync::watch;

use omada_core::api::SourceApi;

use crate::{
  Error,
  generator::{EventGenerator, EventSink},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Schedule {
  #[serde(default = "default_interval_secs")]
  pub interval_secs:    u64,
  #[serde(default = "default_backoff_min_secs")]
  pub backoff_min_secs: u64,
  #[serde(default = "default_backoff_max_secs")]
  pub backoff_max_secs: u64,
}

fn default_interval_secs() -> u64 { 30 * 60 }
fn default_backoff_min_secs() -> u64 { 30 }
fn default_backoff_max_secs() -> u64 { 180 }

impl Default for Schedule {
  fn default() -> Self {
    Self {
      interval_secs:    default_interval_secs(),
      backoff_min_secs: default_backoff_min_secs(),
      backoff_max_secs: default_backoff_max_secs(),
    }
  }
}

impl Schedule {
  pub fn interval(&self) -> Duration { Duration::from_secs(self.interval_secs) }

  /// A random wait within the configured backoff window.
  pub fn backoff(&self) -> Duration {
    let min = self.backoff_min_secs.min(self.backoff_max_secs);
    let max = self.backoff_min_secs.max(self.backoff_max_secs);
    let min_ms = min * 1000;
    let span_ms = (max - min) * 1000;
    let jitter = if span_ms == 0 {
      0
    } else {
      OsRng.next_u64() % (span_ms + 1)
    };
    Duration::from_millis(min_ms + jitter)
  }
}

/// Poll until `shutdown` flips to `true` (or its sender is dropped).
///
/// A cycle in flight when shutdown is requested is abandoned; the snapshot
/// store's write-then-rename keeps the baseline intact. Fatal errors stop the
/// loop and are returned.
pub async fn run<S, K>(
  generator: &EventGenerator<S, K>,
  schedule: Schedule,
  mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error>
where
  S: SourceApi,
  K: EventSink,
{
  loop {
    if *shutdown.borrow() {
      break;
    }

    let outcome = tokio::select! {
      outcome = generator.run_cycle() => outcome,
      _ = shutdown.changed() => break,
    };

    let wait = match outcome {
      Ok(report) => {
        tracing::info!(
          observed = report.observed,
          emitted = report.emitted,
          failed = report.failed,
          "cycle complete"
        );
        schedule.interval()
      }
      Err(e) if e.is_fatal() => {
        tracing::error!(error = %e, "fatal error in event generator");
        return Err(e);
      }
      Err(e) => {
        let wait = schedule.backoff();
        tracing::error!(error = %e, retry_in = ?wait, "cycle failed");
        wait
      }
    };

    tokio::select! {
      _ = tokio::time::sleep(wait) => {}
      _ = shutdown.changed() => break,
    }
  }
  tracing::info!("event generator stopped");
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  use omada_core::{event::SourceEvent, source::RawRecord};
  use tokio::sync::mpsc;

  use super::*;
  use crate::{differ::DiffOptions, snapshot::SnapshotStore};

  #[derive(Debug, thiserror::Error)]
  #[error("source down")]
  struct SourceDown;

  /// Fails every call and counts them.
  #[derive(Default)]
  struct FlakySource {
    calls: AtomicUsize,
  }

  impl SourceApi for FlakySource {
    type Error = SourceDown;

    async fn fetch_all(
      &self,
      _filter: Option<&str>,
    ) -> Result<Vec<RawRecord>, SourceDown> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Err(SourceDown)
    }
  }

  #[test]
  fn backoff_stays_within_window() {
    let schedule = Schedule {
      interval_secs:    60,
      backoff_min_secs: 30,
      backoff_max_secs: 180,
    };
    for _ in 0..100 {
      let wait = schedule.backoff();
      assert!(wait >= Duration::from_secs(30));
      assert!(wait <= Duration::from_secs(180));
    }
  }

  #[test]
  fn degenerate_backoff_window_is_fixed() {
    let schedule = Schedule {
      interval_secs:    60,
      backoff_min_secs: 5,
      backoff_max_secs: 5,
    };
    assert_eq!(schedule.backoff(), Duration::from_secs(5));
  }

  #[tokio::test]
  async fn failed_cycles_are_retried_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FlakySource::default());
    let (tx, _rx) = mpsc::channel::<SourceEvent>(8);
    let generator = EventGenerator::new(
      source.clone(),
      tx,
      SnapshotStore::new(dir.path().join("snapshot.json")).unwrap(),
      DiffOptions::default(),
    );
    let schedule = Schedule {
      interval_secs:    3600,
      backoff_min_secs: 0,
      backoff_max_secs: 0,
    };
    let (stop, shutdown) = watch::channel(false);

    let stopper = async {
      tokio::time::sleep(Duration::from_millis(200)).await;
      stop.send(true).unwrap();
    };
    let (result, ()) = tokio::join!(run(&generator, schedule, shutdown), stopper);

    assert!(result.is_ok());
    assert!(source.calls.load(Ordering::SeqCst) >= 2);
  }

  #[tokio::test]
  async fn fatal_errors_stop_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state");
    std::fs::create_dir(&state).unwrap();
    let source = Arc::new(FlakySource::default());
    let (tx, _rx) = mpsc::channel::<SourceEvent>(8);
    let generator = EventGenerator::new(
      source.clone(),
      tx,
      SnapshotStore::new(state.join("snapshot.json")).unwrap(),
      DiffOptions::default(),
    );
    std::fs::remove_dir(&state).unwrap();
    // Never signalled: only the error can end the loop.
    let (_stop, shutdown) = watch::channel(false);

    let result = tokio::time::timeout(
      Duration::from_secs(5),
      run(&generator, Schedule::default(), shutdown),
    )
    .await
    .expect("loop should end on its own");

    assert!(matches!(result, Err(Error::SnapshotDirectory(_))));
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn shutdown_before_start_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FlakySource::default());
    let (tx, _rx) = mpsc::channel::<SourceEvent>(8);
    let generator = EventGenerator::new(
      source.clone(),
      tx,
      SnapshotStore::new(dir.path().join("snapshot.json")).unwrap(),
      DiffOptions::default(),
    );
    let (_stop, shutdown) = watch::channel(true);

    run(&generator, Schedule::default(), shutdown).await.unwrap();
    assert_eq!(source.calls.load(Ordering::SeqCst), 0);
  }
}
