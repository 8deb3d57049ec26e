//! One polling cycle: fetch, diff against the baseline, emit, persist.

use std::{future::Future, sync::Arc};

use omada_core::{api::SourceApi, event::SourceEvent};
use tokio::sync::mpsc;

use crate::{
  Error, Result,
  differ::{DiffOptions, diff},
  snapshot::SnapshotStore,
};

/// Where generated events go.
pub trait EventSink: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn emit(
    &self,
    event: SourceEvent,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

impl EventSink for mpsc::Sender<SourceEvent> {
  type Error = mpsc::error::SendError<SourceEvent>;

  async fn emit(&self, event: SourceEvent) -> Result<(), Self::Error> {
    self.send(event).await
  }
}

/// Counts from one completed cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
  pub observed: usize,
  pub emitted:  usize,
  pub failed:   usize,
}

pub struct EventGenerator<S, K> {
  source:  Arc<S>,
  sink:    K,
  store:   SnapshotStore,
  options: DiffOptions,
}

impl<S, K> EventGenerator<S, K>
where
  S: SourceApi,
  K: EventSink,
{
  pub fn new(
    source: Arc<S>,
    sink: K,
    store: SnapshotStore,
    options: DiffOptions,
  ) -> Self {
    Self { source, sink, store, options }
  }

  /// Run one cycle.
  ///
  /// If loading the baseline or fetching from the source fails, nothing is
  /// emitted and the baseline is left alone. Once the diff is computed the new
  /// snapshot is persisted even if some events could not be emitted.
  pub async fn run_cycle(&self) -> Result<CycleReport> {
    let previous = self.store.load().await?;
    let current = self
      .source
      .fetch_all(None)
      .await
      .map_err(|e| Error::Source(Box::new(e)))?;

    let events = diff(&previous, &current, &self.options);
    tracing::info!(
      previous = previous.len(),
      current = current.len(),
      changes = events.len(),
      "polled omada"
    );

    let mut report = CycleReport {
      observed: current.len(),
      ..CycleReport::default()
    };
    for event in events {
      let (kind, key) = (event.kind, event.key.clone());
      match self.sink.emit(event).await {
        Ok(()) => {
          tracing::debug!(event = %kind, uid = %key, "emitted");
          report.emitted += 1;
        }
        Err(e) => {
          tracing::error!(event = %kind, uid = %key, error = %e, "failed to emit event");
          report.failed += 1;
        }
      }
    }

    self.store.save(&current).await?;
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use omada_core::{event::EventKind, source::RawRecord};
  use serde_json::{Value, json};

  use super::*;

  #[derive(Debug, thiserror::Error)]
  #[error("source down")]
  struct SourceDown;

  /// Serves whatever population is currently set, or fails when it is `None`.
  #[derive(Default)]
  struct FakeSource {
    records: Mutex<Option<Vec<RawRecord>>>,
  }

  impl FakeSource {
    fn set(&self, records: Option<Vec<RawRecord>>) {
      *self.records.lock().unwrap() = records;
    }
  }

  impl SourceApi for FakeSource {
    type Error = SourceDown;

    async fn fetch_all(
      &self,
      _filter: Option<&str>,
    ) -> Result<Vec<RawRecord>, SourceDown> {
      self.records.lock().unwrap().clone().ok_or(SourceDown)
    }
  }

  #[derive(Debug, thiserror::Error)]
  #[error("sink rejected {0}")]
  struct Rejected(String);

  /// Records events; rejects those whose key is listed in `reject`.
  #[derive(Default)]
  struct RecordingSink {
    events: Mutex<Vec<SourceEvent>>,
    reject: Vec<String>,
  }

  impl EventSink for RecordingSink {
    type Error = Rejected;

    async fn emit(&self, event: SourceEvent) -> Result<(), Rejected> {
      if self.reject.contains(&event.key) {
        return Err(Rejected(event.key));
      }
      self.events.lock().unwrap().push(event);
      Ok(())
    }
  }

  fn record(uid: &str, value: i64) -> RawRecord {
    match json!({ "UId": uid, "VALUE": value }) {
      Value::Object(map) => map,
      _ => unreachable!(),
    }
  }

  fn generator(
    dir: &tempfile::TempDir,
    sink: RecordingSink,
  ) -> (Arc<FakeSource>, EventGenerator<FakeSource, RecordingSink>) {
    let source = Arc::new(FakeSource::default());
    let store = SnapshotStore::new(dir.path().join("snapshot.json")).unwrap();
    let generator =
      EventGenerator::new(source.clone(), sink, store, DiffOptions::default());
    (source, generator)
  }

  fn drain(sink: &RecordingSink) -> Vec<(EventKind, String)> {
    sink
      .events
      .lock()
      .unwrap()
      .drain(..)
      .map(|e| (e.kind, e.key))
      .collect()
  }

  #[tokio::test]
  async fn consecutive_cycles_emit_only_changes() {
    let dir = tempfile::tempdir().unwrap();
    let (source, generator) = generator(&dir, RecordingSink::default());

    source.set(Some(vec![record("a", 1), record("b", 2), record("c", 3)]));
    let report = generator.run_cycle().await.unwrap();
    assert_eq!(report.emitted, 3);
    drain(&generator.sink);

    source.set(Some(vec![record("a", 1), record("b", 3), record("d", 4)]));
    generator.run_cycle().await.unwrap();
    assert_eq!(
      drain(&generator.sink),
      vec![
        (EventKind::Update, "b".to_owned()),
        (EventKind::Delete, "c".to_owned()),
        (EventKind::Create, "d".to_owned()),
      ]
    );

    generator.run_cycle().await.unwrap();
    assert!(drain(&generator.sink).is_empty());
  }

  #[tokio::test]
  async fn failed_fetch_keeps_the_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let (source, generator) = generator(&dir, RecordingSink::default());

    source.set(Some(vec![record("a", 1)]));
    generator.run_cycle().await.unwrap();
    drain(&generator.sink);

    source.set(None);
    assert!(generator.run_cycle().await.is_err());

    source.set(Some(vec![record("a", 2)]));
    generator.run_cycle().await.unwrap();
    assert_eq!(
      drain(&generator.sink),
      vec![(EventKind::Update, "a".to_owned())]
    );
  }

  #[tokio::test]
  async fn emission_failures_still_advance_the_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let sink = RecordingSink {
      reject: vec!["b".to_owned()],
      ..RecordingSink::default()
    };
    let (source, generator) = generator(&dir, sink);

    source.set(Some(vec![record("a", 1), record("b", 1)]));
    let report = generator.run_cycle().await.unwrap();
    assert_eq!((report.emitted, report.failed), (1, 1));

    drain(&generator.sink);
    generator.run_cycle().await.unwrap();
    assert!(drain(&generator.sink).is_empty());
  }

  #[tokio::test]
  async fn channel_sink_delivers_events() {
    let (tx, mut rx) = mpsc::channel(8);
    let event = SourceEvent {
      kind:    EventKind::Create,
      key:     "a".into(),
      payload: record("a", 1),
    };
    tx.emit(event.clone()).await.unwrap();
    assert_eq!(rx.recv().await, Some(event));
  }
}
