use std::io;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, instrument, warn};

use crate::calendar::parse_event_date;
use crate::cli::Invocation;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::delivery::{DeliveryCapability, MemoryDelivery};
use crate::event::{CategoryKind, Event};
use crate::planner::plan;
use crate::quiet::QuietWindow;
use crate::render::Renderer;
use crate::settings::{ReminderSettings, format_offsets, parse_offsets};
use crate::spool::SpoolDelivery;
use crate::sync::{Rescheduler, SyncReport, sync};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add", "list", "delete", "plan", "sync", "pending", "clear", "settings", "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv), fields(command = %inv.command))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    tz: Tz,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();
    debug!(args = ?inv.args, "dispatching command");

    match inv.command.as_str() {
        "add" => cmd_add(store, cfg, renderer, tz, &inv.args, now),
        "list" => cmd_list(store, renderer, now),
        "delete" => cmd_delete(store, cfg, renderer, tz, &inv.args, now),
        "plan" => cmd_plan(store, cfg, renderer, tz, now),
        "sync" => cmd_sync(store, cfg, renderer, tz, now),
        "pending" => cmd_pending(store, cfg, renderer),
        "clear" => cmd_clear(store, cfg),
        "settings" => cmd_settings(store, cfg, renderer, tz, &inv.args, now),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// Settings in force: `settings.json` when present, otherwise the rc keys.
pub fn effective_settings(store: &DataStore, cfg: &Config) -> anyhow::Result<ReminderSettings> {
    let seeded = ReminderSettings::from_config(cfg)?;
    store.load_settings(seeded)
}

/// `delivery.max_pending`; 0 lifts the cap entirely.
fn pending_limit(cfg: &Config) -> anyhow::Result<Option<usize>> {
    Ok(match cfg.get_usize("delivery.max_pending")? {
        Some(0) => None,
        Some(limit) => Some(limit),
        None => Some(SpoolDelivery::DEFAULT_CAPACITY),
    })
}

pub fn open_spool(store: &DataStore, cfg: &Config) -> anyhow::Result<SpoolDelivery> {
    SpoolDelivery::open(&store.alerts_path, pending_limit(cfg)?)
        .with_context(|| format!("failed to open {}", store.alerts_path.display()))
}

/// Full plan + sync of every stored event into the alert spool.
#[instrument(skip(store, cfg))]
pub fn reschedule_all(
    store: &DataStore,
    cfg: &Config,
    tz: Tz,
    now: DateTime<Utc>,
) -> anyhow::Result<SyncReport> {
    let events = store.load_events()?;
    let settings = effective_settings(store, cfg)?;
    let rescheduler = Rescheduler::new(open_spool(store, cfg)?, tz);
    let report = rescheduler.reschedule(&events, &settings, now);
    if !report.is_clean() {
        warn!(
            cleared = report.cleared,
            failed = report.failed.len(),
            "reschedule finished with problems"
        );
    }
    Ok(report)
}

fn reschedule_and_report(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    tz: Tz,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let report = reschedule_all(store, cfg, tz, now)?;
    renderer.write_sync_report(io::stdout().lock(), &report)
}

/// Builds an event from `add` arguments: a date, then label words mixed
/// with `person:` `rel:` `cat:` `notes:` attributes and an optional `once`.
pub(crate) fn parse_add_args(
    args: &[String],
    tz: &Tz,
    now: DateTime<Utc>,
) -> anyhow::Result<Event> {
    let (date_raw, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("add requires a date and a label"))?;
    let date = parse_event_date(date_raw, tz)?;

    let mut label_words: Vec<&str> = Vec::new();
    let mut recurring = true;
    let mut person_name = None;
    let mut relationship = None;
    let mut category = CategoryKind::Other;
    let mut notes = None;

    for token in rest {
        if token.eq_ignore_ascii_case("once") {
            recurring = false;
        } else if let Some(value) = token.strip_prefix("person:") {
            person_name = non_empty(value);
        } else if let Some(value) = token.strip_prefix("rel:") {
            relationship = non_empty(value);
        } else if let Some(value) = token
            .strip_prefix("cat:")
            .or_else(|| token.strip_prefix("category:"))
        {
            category = value.parse()?;
        } else if let Some(value) = token.strip_prefix("notes:") {
            notes = non_empty(value);
        } else {
            label_words.push(token);
        }
    }

    let label = label_words.join(" ");
    if label.trim().is_empty() {
        return Err(anyhow!("add requires a label"));
    }

    let mut event = Event::new(label, date, recurring, now).with_category(category);
    event.person_name = person_name;
    event.relationship = relationship;
    event.notes = notes;
    Ok(event)
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[instrument(skip(store, cfg, renderer, args, now))]
fn cmd_add(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    tz: Tz,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command add");

    let event = parse_add_args(args, &tz, now)?;
    if !event.recurring && event.date < now {
        warn!(event = %event.id, "one-off event is already in the past");
        println!("Note: that date has passed; no reminders will fire for it.");
    }

    let short = event.short_id();
    let label = event.label.clone();
    store.add_event(store.load_events()?, event)?;
    println!("Added event {short} '{label}'.");

    reschedule_and_report(store, cfg, renderer, tz, now)
}

fn cmd_list(store: &DataStore, renderer: &Renderer, now: DateTime<Utc>) -> anyhow::Result<()> {
    let events = store.load_events()?;
    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }
    renderer.write_events(io::stdout().lock(), &events, now)
}

#[instrument(skip(store, cfg, renderer, args, now))]
fn cmd_delete(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    tz: Tz,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command delete");

    let [prefix] = args else {
        return Err(anyhow!("delete takes exactly one event id"));
    };
    let events = store.load_events()?;
    let id = store.find_event(&events, prefix)?.id;
    let removed = store.remove_event(id)?;
    println!("Deleted event {} '{}'.", removed.short_id(), removed.label);

    reschedule_and_report(store, cfg, renderer, tz, now)
}

fn cmd_plan(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    tz: Tz,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let events = store.load_events()?;
    let settings = effective_settings(store, cfg)?;
    let directives = plan(&events, &settings, now, &tz);
    if directives.is_empty() {
        println!("Nothing to schedule.");
        return Ok(());
    }
    renderer.write_directives(io::stdout().lock(), &directives)?;

    let mut dry_run = MemoryDelivery::new();
    if let Some(limit) = pending_limit(cfg)? {
        dry_run = dry_run.with_capacity(limit);
    }
    let report = sync(&directives, &mut dry_run, now);
    if !report.failed.is_empty() {
        println!(
            "{} reminder(s) would not fit under delivery.max_pending.",
            report.failed.len()
        );
    }
    Ok(())
}

#[instrument(skip(store, cfg, renderer, now))]
fn cmd_sync(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    tz: Tz,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command sync");
    reschedule_and_report(store, cfg, renderer, tz, now)
}

fn cmd_pending(store: &DataStore, cfg: &Config, renderer: &Renderer) -> anyhow::Result<()> {
    let alerts = open_spool(store, cfg)?.pending()?;
    if alerts.is_empty() {
        println!("No pending reminders.");
        return Ok(());
    }
    let events = store.load_events()?;
    renderer.write_pending(io::stdout().lock(), &alerts, &events)
}

#[instrument(skip(store, cfg))]
fn cmd_clear(store: &DataStore, cfg: &Config) -> anyhow::Result<()> {
    info!("command clear");
    let mut spool = open_spool(store, cfg)?;
    let count = spool.pending()?.len();
    spool.clear_all()?;
    println!("Cleared {count} pending reminder(s).");
    Ok(())
}

#[instrument(skip(store, cfg, renderer, args, now))]
fn cmd_settings(
    store: &DataStore,
    cfg: &Config,
    renderer: &Renderer,
    tz: Tz,
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let mut settings = effective_settings(store, cfg)?;

    let Some((action, rest)) = args.split_first() else {
        return renderer.write_settings(io::stdout().lock(), &settings);
    };
    let value = rest.join(" ");

    match action.to_ascii_lowercase().as_str() {
        "enable" | "on" => settings.enabled = true,
        "disable" | "off" => settings.enabled = false,
        "offsets" => {
            settings.offsets = parse_offsets(&value)?;
        }
        "quiet" => {
            settings.quiet_hours = match value.trim().to_ascii_lowercase().as_str() {
                "" => return Err(anyhow!("quiet takes HH:MM-HH:MM, on or off")),
                "on" => Some(
                    ReminderSettings::from_config(cfg)?
                        .quiet_hours
                        .unwrap_or(QuietWindow::OVERNIGHT),
                ),
                "off" => None,
                _ => Some(value.trim().parse::<QuietWindow>()?),
            };
        }
        other => return Err(anyhow!("unknown settings action: {other}")),
    }

    info!(
        enabled = settings.enabled,
        offsets = %format_offsets(&settings.offsets),
        "updating reminder settings"
    );
    store.save_settings(&settings)?;
    renderer.write_settings(io::stdout().lock(), &settings)?;

    reschedule_and_report(store, cfg, renderer, tz, now)
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Usage: keepsake [-v|-q] [--rc KEY=VALUE] [--keepsakerc PATH] [--data DIR] <command>\n\
         \n\
         Commands:\n  \
           add <date> <label...> [person:NAME] [rel:TEXT] [cat:KIND] [notes:TEXT] [once]\n  \
           list                       events and their next occurrence\n  \
           delete <id>                remove an event\n  \
           plan                       show the reminders that would be scheduled\n  \
           sync                       rebuild the pending reminder schedule\n  \
           pending                    show scheduled reminders\n  \
           clear                      drop every scheduled reminder\n  \
           settings [enable|disable|offsets LIST|quiet HH:MM-HH:MM|on|off]\n  \
           help, version\n\
         \n\
         Categories: {}",
        CategoryKind::ALL
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}
