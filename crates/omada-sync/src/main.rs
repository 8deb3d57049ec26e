//! omada-sync binary.
//!
//! Polls Omada on a schedule and reconciles every changed user into MO until
//! interrupted. With `--once`, runs a single poll cycle, waits for the
//! resulting passes and exits.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use omada_client::{MoClient, OmadaClient};
use omada_events::{EventGenerator, SnapshotStore, scheduler};
use omada_sync::{Settings, SyncHandler, dispatch::dispatch};
use tokio::sync::{mpsc, watch};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Omada to MO synchronisation")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Run one poll cycle and exit.
  #[arg(long)]
  once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = Settings::load(&cli.config)
    .with_context(|| format!("failed to load settings from {:?}", cli.config))?;

  let omada = Arc::new(
    OmadaClient::new(settings.omada.clone()).context("failed to build Omada client")?,
  );
  let mo =
    Arc::new(MoClient::new(settings.mo.clone()).context("failed to build MO client")?);
  let store = SnapshotStore::new(&settings.events.snapshot_path)
    .context("invalid snapshot location")?;

  let (events_tx, events_rx) = mpsc::channel(settings.events.channel_capacity);
  let generator = EventGenerator::new(
    omada.clone(),
    events_tx,
    store,
    settings.events.diff.clone(),
  );
  let handler = SyncHandler::new(omada, mo, Arc::new(settings.customer.clone()));

  let (stop, shutdown) = watch::channel(false);
  let stop = Arc::new(stop);
  let dispatcher = tokio::spawn(dispatch(handler, events_rx, stop.clone()));

  tracing::info!(customer = %settings.customer.name, once = cli.once, "starting");
  if cli.once {
    let report = generator.run_cycle().await.context("poll cycle failed")?;
    tracing::info!(
      observed = report.observed,
      emitted = report.emitted,
      failed = report.failed,
      "cycle complete"
    );
  } else {
    tokio::spawn({
      let stop = stop.clone();
      async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          tracing::info!("interrupted, shutting down");
          let _ = stop.send(true);
        }
      }
    });
    scheduler::run(&generator, settings.events.schedule, shutdown)
      .await
      .context("event generator failed")?;
  }

  // Closes the event channel so the dispatcher drains and returns.
  drop(generator);
  dispatcher
    .await
    .context("dispatcher panicked")?
    .context("dispatcher stopped")?;
  Ok(())
}
