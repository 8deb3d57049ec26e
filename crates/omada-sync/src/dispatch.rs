//! Fan events out to subject passes.

use std::sync::Arc;

use omada_core::{
  api::{SourceApi, TargetApi},
  event::SourceEvent,
};
use tokio::{
  sync::{mpsc, watch},
  task::{JoinError, JoinSet},
};

use crate::{
  error::{Error, Result},
  handler::{PassReport, SyncHandler},
};

type Finished = (SourceEvent, Result<Option<PassReport>>);

/// Handle events from `events` until the channel closes, one task per event.
///
/// Pass failures are logged and the event is dropped; the subject is retried
/// on its next event. A fatal error raises `shutdown` and is returned once
/// in-flight passes have finished.
pub async fn dispatch<S, T>(
  handler: SyncHandler<S, T>,
  mut events: mpsc::Receiver<SourceEvent>,
  shutdown: Arc<watch::Sender<bool>>,
) -> Result<()>
where
  S: SourceApi + 'static,
  T: TargetApi + 'static,
{
  let handler = Arc::new(handler);
  let mut tasks = JoinSet::new();
  let mut fatal = None;

  loop {
    tokio::select! {
      event = events.recv(), if fatal.is_none() => {
        let Some(event) = event else { break };
        let handler = handler.clone();
        tasks.spawn(async move {
          let outcome = handler.handle(&event).await;
          (event, outcome)
        });
      }
      Some(joined) = tasks.join_next() => {
        if let Some(e) = settle(joined) {
          let _ = shutdown.send(true);
          fatal = Some(e);
        }
      }
      else => break,
    }
  }

  while let Some(joined) = tasks.join_next().await {
    if let Some(e) = settle(joined)
      && fatal.is_none()
    {
      let _ = shutdown.send(true);
      fatal = Some(e);
    }
  }

  match fatal {
    Some(e) => Err(e),
    None => Ok(()),
  }
}

/// Log the result of a finished pass, returning it if it was fatal.
fn settle(joined: Result<Finished, JoinError>) -> Option<Error> {
  let (event, outcome) = match joined {
    Ok(done) => done,
    Err(e) => {
      tracing::error!(error = %e, "subject pass panicked");
      return None;
    }
  };
  match outcome {
    Ok(_) => None,
    Err(e) if e.is_fatal() => {
      tracing::error!(
        event = %event.kind,
        uid = %event.key,
        error = %e,
        "fatal error, shutting down"
      );
      Some(e)
    }
    Err(e) => {
      tracing::error!(
        event = %event.kind,
        uid = %event.key,
        error = %e,
        "subject pass failed"
      );
      None
    }
  }
}
