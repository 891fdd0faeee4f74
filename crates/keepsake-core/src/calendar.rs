use std::fs;
use std::path::Path;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Datelike,
  Days,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::event::Event;

/// Per-data-directory calendar file.
pub const CALENDAR_FILE: &str =
  "calendar.toml";
const TIMEZONE_ENV_VAR: &str =
  "KEEPSAKE_TIMEZONE";

/// Local wall-clock hour a yearly
/// occurrence fires at.
pub const ANCHOR_HOUR: u32 = 9;
pub const ANCHOR_MINUTE: u32 = 0;

#[derive(Debug, Deserialize)]
struct CalendarFile {
  timezone: String
}

/// Resolves the zone used as the local
/// calendar: env var, then the rc value,
/// then `calendar.toml` in the data
/// directory, then UTC. Unparseable
/// sources are logged and passed over.
pub fn resolve_timezone(
  configured: Option<&str>,
  data_dir: &Path
) -> Tz {
  let from_env = std::env::var(
    TIMEZONE_ENV_VAR
  )
  .ok()
  .and_then(|raw| {
    parse_timezone(&raw, TIMEZONE_ENV_VAR)
  });

  from_env
    .or_else(|| {
      configured.and_then(|raw| {
        parse_timezone(
          raw,
          "calendar.timezone"
        )
      })
    })
    .or_else(|| {
      read_calendar_file(
        &data_dir.join(CALENDAR_FILE)
      )
    })
    .unwrap_or_else(|| {
      tracing::debug!(
        "no timezone configured; using \
         UTC as the local calendar"
      );
      chrono_tz::UTC
    })
}

fn read_calendar_file(
  path: &Path
) -> Option<Tz> {
  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err)
      if err.kind()
        == std::io::ErrorKind::NotFound =>
    {
      return None;
    }
    | Err(err) => {
      tracing::warn!(
        file = %path.display(),
        error = %err,
        "failed reading calendar file"
      );
      return None;
    }
  };

  match toml::from_str::<CalendarFile>(
    &raw
  ) {
    | Ok(file) => parse_timezone(
      &file.timezone,
      CALENDAR_FILE
    ),
    | Err(err) => {
      tracing::warn!(
        file = %path.display(),
        error = %err,
        "failed parsing calendar file"
      );
      None
    }
  }
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured local timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::warn!(
        source,
        timezone = %trimmed,
        error = %err,
        "ignoring unknown timezone id"
      );
      None
    }
  }
}

/// Maps a local wall-clock time to an
/// instant. Fall-back ambiguity picks the
/// earlier instant; a spring-forward gap
/// moves the time forward by an hour.
pub fn local_to_utc(
  local_naive: NaiveDateTime,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Some(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::trace!(
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Some(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => {
      let shifted = local_naive
        .checked_add_signed(
          Duration::hours(1)
        )?;
      tracing::debug!(
        local = %local_naive,
        shifted = %shifted,
        "local datetime falls in a gap; shifting forward"
      );
      tz.from_local_datetime(&shifted)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
    }
  }
}

/// Next instant an event is due, on or
/// after `now`.
///
/// Recurring events use the local
/// month/day of `event.date` at
/// [`ANCHOR_HOUR`], rolling into the
/// following year once this year's
/// instance is earlier than `now`. One-off
/// events return their own instant until
/// it has passed.
#[tracing::instrument(
  level = "trace",
  skip(event, tz),
  fields(event = %event.id, recurring = event.recurring)
)]
pub fn next_occurrence(
  event: &Event,
  now: DateTime<Utc>,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  if !event.recurring {
    return (event.date >= now)
      .then_some(event.date);
  }

  let anchor =
    event.date.with_timezone(tz);
  let month = anchor.month();
  let day = anchor.day();
  let year =
    now.with_timezone(tz).year();

  let this_year = yearly_candidate(
    year, month, day, tz
  )?;
  if this_year >= now {
    return Some(this_year);
  }

  yearly_candidate(
    year.checked_add(1)?,
    month,
    day,
    tz
  )
}

fn yearly_candidate(
  year: i32,
  month: u32,
  day: u32,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  let date =
    anniversary_date(year, month, day)?;
  let time = NaiveTime::from_hms_opt(
    ANCHOR_HOUR,
    ANCHOR_MINUTE,
    0
  )?;
  local_to_utc(date.and_time(time), tz)
}

/// Calendar date of a yearly anniversary.
/// Feb 29 lands on Feb 28 in common years.
pub fn anniversary_date(
  year: i32,
  month: u32,
  day: u32
) -> Option<NaiveDate> {
  NaiveDate::from_ymd_opt(
    year, month, day
  )
  .or_else(|| {
    if month == 2 && day == 29 {
      NaiveDate::from_ymd_opt(
        year, 2, 28
      )
    } else {
      None
    }
  })
}

/// Moves `instant` back by whole local
/// calendar days, keeping its wall-clock
/// time.
pub fn subtract_days(
  instant: DateTime<Utc>,
  days: u32,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  let local = instant.with_timezone(tz);
  let date = local
    .date_naive()
    .checked_sub_days(Days::new(
      u64::from(days)
    ))?;
  local_to_utc(
    date.and_time(local.time()),
    tz
  )
}

#[must_use]
pub fn format_local(
  dt: DateTime<Utc>,
  tz: &Tz
) -> String {
  dt.with_timezone(tz)
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

#[tracing::instrument(skip(tz))]
pub fn parse_event_date(
  input: &str,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    let anchored = date
      .and_hms_opt(
        ANCHOR_HOUR,
        ANCHOR_MINUTE,
        0
      )
      .ok_or_else(|| {
        anyhow!(
          "failed to anchor date \
           {token}"
        )
      })?;
    return local_to_utc(anchored, tz)
      .ok_or_else(|| {
        anyhow!(
          "date does not exist in \
           the local calendar: \
           {token}"
        )
      });
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return local_to_utc(ndt, tz)
        .ok_or_else(|| {
          anyhow!(
            "local datetime does not \
             exist: {token}"
          )
        });
    }
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  Err(anyhow!(
    "unrecognized date: {input} \
     (expected YYYY-MM-DD, \
     YYYY-MM-DDTHH:MM, YYYY-MM-DD \
     HH:MM or RFC3339)"
  ))
}

pub mod stamp_serde {
  use chrono::{
    DateTime,
    NaiveDateTime,
    Utc
  };
  use serde::{
    Deserialize,
    Deserializer,
    Serializer
  };

  const STAMP_FORMAT: &str =
    "%Y%m%dT%H%M%SZ";

  pub fn serialize<S>(
    dt: &DateTime<Utc>,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.serialize_str(
      &dt.format(STAMP_FORMAT).to_string()
    )
  }

  pub fn deserialize<'de, D>(
    deserializer: D
  ) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    NaiveDateTime::parse_from_str(
      &raw,
      STAMP_FORMAT
    )
    .map(|ndt| {
      DateTime::<Utc>::from_naive_utc_and_offset(
        ndt, Utc
      )
    })
    .map_err(serde::de::Error::custom)
  }
}
