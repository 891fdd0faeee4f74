use std::collections::HashMap;
use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::calendar::{format_local, next_occurrence};
use crate::config::Config;
use crate::delivery::PendingAlert;
use crate::event::{Event, EventId};
use crate::identifier::split_identifier;
use crate::planner::SchedulingDirective;
use crate::settings::{ReminderSettings, format_offsets};
use crate::sync::SyncReport;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config, tz: Tz) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => io::stdout().is_terminal(),
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color, tz })
    }

    pub fn plain(tz: Tz) -> Self {
        Self { color: false, tz }
    }

    #[tracing::instrument(skip(self, out, events, now), fields(events = events.len()))]
    pub fn write_events<W: Write>(
        &self,
        out: W,
        events: &[Event],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let headers = ["ID", "Next", "Repeats", "Category", "Label", "Person"];

        let mut rows: Vec<(Option<DateTime<Utc>>, Vec<String>)> = events
            .iter()
            .map(|event| {
                let next = next_occurrence(event, now, &self.tz);
                let when = match next {
                    Some(at) => format_local(at, &self.tz),
                    None => self.paint(&format_local(event.date, &self.tz), "90"),
                };
                let person = match (&event.person_name, &event.relationship) {
                    (Some(name), Some(rel)) => format!("{name} ({rel})"),
                    (Some(name), None) => name.clone(),
                    (None, Some(rel)) => format!("({rel})"),
                    (None, None) => String::new(),
                };
                let row = vec![
                    self.paint(&event.short_id(), "33"),
                    when,
                    if event.recurring { "yearly" } else { "once" }.to_string(),
                    event.category.to_string(),
                    event.label.clone(),
                    person,
                ];
                (next, row)
            })
            .collect();

        // Upcoming first, then events that will not come round again.
        rows.sort_by_key(|(next, _)| (next.is_none(), *next));

        write_table(out, &headers, rows.into_iter().map(|(_, row)| row).collect())
    }

    #[tracing::instrument(skip(self, out, directives), fields(directives = directives.len()))]
    pub fn write_directives<W: Write>(
        &self,
        out: W,
        directives: &[SchedulingDirective],
    ) -> anyhow::Result<()> {
        let headers = ["Fires", "Lead", "Title", "Body"];
        let rows = directives
            .iter()
            .map(|d| {
                vec![
                    self.paint(&format_local(d.fire_at, &self.tz), "36"),
                    d.offset.code(),
                    d.title.clone(),
                    d.body.clone(),
                ]
            })
            .collect();
        write_table(out, &headers, rows)
    }

    /// Pending alerts, with each alert traced back to its event where the
    /// event still exists.
    pub fn write_pending<W: Write>(
        &self,
        out: W,
        alerts: &[PendingAlert],
        events: &[Event],
    ) -> anyhow::Result<()> {
        let by_id: HashMap<EventId, &Event> = events.iter().map(|e| (e.id, e)).collect();

        let headers = ["Fires", "Event", "Lead", "Title"];
        let rows = alerts
            .iter()
            .map(|alert| {
                let (event, lead) = match split_identifier(&alert.identifier) {
                    Some((id, offset)) => {
                        let event = by_id
                            .get(&id)
                            .map(|e| e.short_id())
                            .unwrap_or_else(|| self.paint("gone", "31"));
                        (event, offset.code())
                    }
                    None => (self.paint("?", "31"), "-".to_string()),
                };
                vec![
                    self.paint(&format_local(alert.fire_at, &self.tz), "36"),
                    event,
                    lead,
                    alert.title.clone(),
                ]
            })
            .collect();
        write_table(out, &headers, rows)
    }

    pub fn write_settings<W: Write>(
        &self,
        mut out: W,
        settings: &ReminderSettings,
    ) -> anyhow::Result<()> {
        let state = |on: bool| if on { "on" } else { "off" };
        writeln!(out, "reminders  {}", state(settings.enabled))?;
        writeln!(out, "offsets    {}", format_offsets(&settings.offsets))?;
        match &settings.quiet_hours {
            Some(window) => writeln!(out, "quiet      {window}")?,
            None => writeln!(out, "quiet      off")?,
        }
        writeln!(out, "timezone   {}", self.tz.name())?;
        Ok(())
    }

    pub fn write_sync_report<W: Write>(
        &self,
        mut out: W,
        report: &SyncReport,
    ) -> anyhow::Result<()> {
        write!(out, "Scheduled {} reminder(s)", report.scheduled)?;
        if report.skipped_elapsed > 0 {
            write!(out, ", skipped {} already due", report.skipped_elapsed)?;
        }
        writeln!(out, ".")?;

        if !report.cleared {
            writeln!(
                out,
                "{}",
                self.paint("warning: previous reminders could not be cleared", "33")
            )?;
        }
        for (identifier, reason) in &report.failed {
            writeln!(out, "{} {identifier}: {reason}", self.paint("failed", "31"))?;
        }
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: &[&str],
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|h| UnicodeWidthStr::width(*h))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let last = headers.len().saturating_sub(1);
    let pad_line = |writer: &mut W, cells: &[String]| -> io::Result<()> {
        for (idx, (cell, width)) in cells.iter().zip(&widths).enumerate() {
            if idx == last {
                write!(writer, "{cell}")?;
            } else {
                let visible = UnicodeWidthStr::width(strip_ansi(cell).as_str());
                write!(writer, "{cell}{} ", " ".repeat(width.saturating_sub(visible)))?;
            }
        }
        writeln!(writer)
    };

    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    pad_line(&mut writer, &header_cells)?;
    let rules: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    pad_line(&mut writer, &rules)?;

    for row in &rows {
        pad_line(&mut writer, row)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
