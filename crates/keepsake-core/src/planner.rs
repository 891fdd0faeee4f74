use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{debug, info, instrument, trace, warn};

use crate::calendar::{next_occurrence, subtract_days};
use crate::content;
use crate::event::{Event, EventId};
use crate::identifier::make_identifier;
use crate::quiet;
use crate::settings::{ReminderOffset, ReminderSettings};

/// One alert the synchronizer should register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulingDirective {
    pub identifier: String,
    pub event_id: EventId,
    pub offset: ReminderOffset,
    pub fire_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

/// Expands every live event into one directive per configured offset.
///
/// Pure: the result depends only on the arguments. Events without a future
/// occurrence, and lead times whose (quiet-adjusted) instant is not after
/// `now`, produce nothing. Output is ordered by fire time, then identifier.
#[instrument(
    skip(events, settings, tz),
    fields(events = events.len(), offsets = settings.offsets.len())
)]
pub fn plan(
    events: &[Event],
    settings: &ReminderSettings,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Vec<SchedulingDirective> {
    if !settings.enabled {
        debug!("reminders disabled; planning nothing");
        return vec![];
    }

    let mut directives = Vec::with_capacity(events.len() * settings.offsets.len());
    let mut elapsed = 0_usize;
    let mut skipped_events = 0_usize;

    for event in events {
        let Some(occurrence) = next_occurrence(event, now, tz) else {
            trace!(event = %event.id, "no future occurrence");
            skipped_events += 1;
            continue;
        };

        for &offset in &settings.offsets {
            let Some(candidate) = subtract_days(occurrence, offset.days(), tz) else {
                debug!(event = %event.id, offset = %offset, "lead time not representable");
                continue;
            };
            let fire_at = quiet::adjust(candidate, settings.quiet_hours.as_ref(), tz);

            if fire_at <= now {
                trace!(
                    event = %event.id,
                    offset = %offset,
                    fire_at = %fire_at,
                    "lead time already elapsed"
                );
                elapsed += 1;
                continue;
            }

            let text = match content::render(event, offset) {
                Ok(text) => text,
                Err(err) => {
                    warn!(event = %event.id, offset = %offset, error = %err, "alert text failed to render");
                    continue;
                }
            };
            directives.push(SchedulingDirective {
                identifier: make_identifier(&event.id, offset),
                event_id: event.id,
                offset,
                fire_at,
                title: text.title,
                body: text.body,
            });
        }
    }

    directives.sort_by(|a, b| {
        a.fire_at
            .cmp(&b.fire_at)
            .then_with(|| a.identifier.cmp(&b.identifier))
    });

    info!(
        planned = directives.len(),
        elapsed, skipped_events, "planned reminders"
    );
    directives
}
