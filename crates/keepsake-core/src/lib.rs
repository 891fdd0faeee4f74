//! Reminder scheduling for personal
//! dates: birthdays, anniversaries and
//! one-off moments.
//!
//! [`planner::plan`] turns events and
//! settings into alert directives;
//! [`sync::sync`] installs them into a
//! [`delivery::DeliveryCapability`] with a
//! clear-then-fill pass.

pub mod calendar;
pub mod cli;
pub mod commands;
pub mod config;
pub mod content;
pub mod datastore;
pub mod delivery;
pub mod event;
pub mod identifier;
pub mod planner;
pub mod quiet;
pub mod render;
pub mod settings;
pub mod spool;
pub mod sync;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

pub use delivery::{
  DeliveryCapability,
  DeliveryError,
  MemoryDelivery,
  PendingAlert
};
pub use event::{
  CategoryKind,
  Event,
  EventId
};
pub use planner::{
  SchedulingDirective,
  plan
};
pub use quiet::{
  QuietWindow,
  TimeOfDay
};
pub use settings::{
  ReminderOffset,
  ReminderSettings
};
pub use sync::{
  Rescheduler,
  SyncReport,
  sync
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args);
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting keepsake"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.keepsakerc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let tz = calendar::resolve_timezone(
    cfg
      .get("calendar.timezone")
      .as_deref(),
    &data_dir
  );
  debug!(timezone = %tz.name(), "resolved local calendar");

  let store =
    datastore::DataStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?;

  let renderer =
    render::Renderer::new(&cfg, tz)?;
  let inv = cli::Invocation::parse(
    &cfg, cli.rest
  )?;

  commands::dispatch(
    &store, &cfg, &renderer, tz, inv
  )?;

  info!("done");
  Ok(())
}
