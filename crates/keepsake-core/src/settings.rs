use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::quiet::QuietWindow;

/// Lead time before an occurrence, in whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReminderOffset {
    days: u32,
}

impl ReminderOffset {
    pub const DAY_OF: Self = Self { days: 0 };
    pub const ONE_DAY: Self = Self { days: 1 };
    pub const SEVEN_DAYS: Self = Self { days: 7 };

    pub const MAX_DAYS: u32 = 365;

    pub fn days_before(days: u32) -> Option<Self> {
        (days <= Self::MAX_DAYS).then_some(Self { days })
    }

    pub fn days(self) -> u32 {
        self.days
    }

    /// Stable token used in alert identifiers, e.g. `7d`.
    pub fn code(self) -> String {
        format!("{}d", self.days)
    }

    pub fn display_name(self) -> String {
        match self.days {
            0 => "Day of".to_string(),
            1 => "1 day before".to_string(),
            n => format!("{n} days before"),
        }
    }

    /// How the occurrence is described when the alert fires.
    pub fn relative_phrase(self) -> String {
        match self.days {
            0 => "today".to_string(),
            1 => "tomorrow".to_string(),
            n => format!("in {n} days"),
        }
    }
}

impl fmt::Display for ReminderOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d", self.days)
    }
}

impl FromStr for ReminderOffset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_suffix('d')
            .or_else(|| trimmed.strip_suffix('D'))
            .unwrap_or(trimmed);
        let days: u32 = digits
            .parse()
            .with_context(|| format!("invalid reminder offset: {s} (expected e.g. 7d)"))?;
        Self::days_before(days).ok_or_else(|| {
            anyhow!(
                "reminder offset too large: {s} (max {}d)",
                Self::MAX_DAYS
            )
        })
    }
}

impl TryFrom<String> for ReminderOffset {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReminderOffset> for String {
    fn from(value: ReminderOffset) -> Self {
        value.code()
    }
}

/// Parses a comma separated offset list such as `7d,1d,0d`.
///
/// Duplicates collapse; an empty list is allowed.
pub fn parse_offsets(raw: &str) -> anyhow::Result<BTreeSet<ReminderOffset>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

pub fn format_offsets(offsets: &BTreeSet<ReminderOffset>) -> String {
    if offsets.is_empty() {
        return "none".to_string();
    }
    offsets
        .iter()
        .rev()
        .map(|offset| offset.code())
        .collect::<Vec<_>>()
        .join(",")
}

/// User reminder preferences consumed by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSettings {
    pub enabled: bool,

    #[serde(default)]
    pub offsets: BTreeSet<ReminderOffset>,

    /// `None` means quiet hours are off.
    #[serde(default)]
    pub quiet_hours: Option<QuietWindow>,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            offsets: BTreeSet::from([
                ReminderOffset::SEVEN_DAYS,
                ReminderOffset::ONE_DAY,
                ReminderOffset::DAY_OF,
            ]),
            quiet_hours: Some(QuietWindow::OVERNIGHT),
        }
    }
}

impl ReminderSettings {
    pub fn quiet_hours_enabled(&self) -> bool {
        self.quiet_hours.is_some()
    }

    /// Builds settings from rc keys, falling back to factory defaults for
    /// anything unset.
    #[tracing::instrument(skip(cfg))]
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let enabled = cfg.get_bool("reminders.enabled").unwrap_or(defaults.enabled);

        let offsets = match cfg.get("reminders.offsets") {
            Some(raw) => parse_offsets(&raw).context("invalid reminders.offsets")?,
            None => defaults.offsets,
        };

        let quiet_enabled = cfg
            .get_bool("quiet.enabled")
            .unwrap_or(defaults.quiet_hours.is_some());
        let quiet_hours = if quiet_enabled {
            let fallback = QuietWindow::OVERNIGHT;
            let start = match cfg.get("quiet.start") {
                Some(raw) => raw.parse().context("invalid quiet.start")?,
                None => fallback.start,
            };
            let end = match cfg.get("quiet.end") {
                Some(raw) => raw.parse().context("invalid quiet.end")?,
                None => fallback.end,
            };
            Some(QuietWindow::new(start, end))
        } else {
            None
        };

        let settings = Self {
            enabled,
            offsets,
            quiet_hours,
        };
        debug!(?settings, "reminder settings from config");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{ReminderOffset, ReminderSettings, format_offsets, parse_offsets};
    use crate::config::Config;

    #[test]
    fn offsets_parse_and_collapse_duplicates() {
        let offsets = parse_offsets("7d, 1d,0d,7").expect("parse offsets");
        assert_eq!(
            offsets,
            BTreeSet::from([
                ReminderOffset::DAY_OF,
                ReminderOffset::ONE_DAY,
                ReminderOffset::SEVEN_DAYS
            ])
        );
        assert_eq!(format_offsets(&offsets), "7d,1d,0d");
        assert!(parse_offsets("").expect("empty is legal").is_empty());
        assert!(parse_offsets("soon").is_err());
        assert!(parse_offsets("400d").is_err());
    }

    #[test]
    fn offset_text() {
        assert_eq!(ReminderOffset::DAY_OF.relative_phrase(), "today");
        assert_eq!(ReminderOffset::ONE_DAY.relative_phrase(), "tomorrow");
        assert_eq!(ReminderOffset::SEVEN_DAYS.relative_phrase(), "in 7 days");
        assert_eq!(ReminderOffset::SEVEN_DAYS.display_name(), "7 days before");
        assert_eq!(ReminderOffset::DAY_OF.code(), "0d");
    }

    #[test]
    fn defaults_match_factory_settings() {
        let settings = ReminderSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.offsets.len(), 3);
        let quiet = settings.quiet_hours.expect("quiet hours on");
        assert_eq!(quiet.to_string(), "22:00-08:00");
    }

    #[test]
    fn config_keys_override_defaults() {
        let mut cfg = Config::defaults();
        cfg.apply_overrides([
            ("reminders.offsets".to_string(), "1d".to_string()),
            ("quiet.start".to_string(), "23:00".to_string()),
            ("quiet.end".to_string(), "6:30am".to_string()),
        ]);
        let settings = ReminderSettings::from_config(&cfg).expect("settings");
        assert_eq!(settings.offsets, BTreeSet::from([ReminderOffset::ONE_DAY]));
        assert_eq!(
            settings.quiet_hours.expect("quiet on").to_string(),
            "23:00-06:30"
        );

        cfg.apply_overrides([("quiet.enabled".to_string(), "off".to_string())]);
        let settings = ReminderSettings::from_config(&cfg).expect("settings");
        assert!(!settings.quiet_hours_enabled());
    }

    #[test]
    fn settings_serialize_offsets_as_codes() {
        let json = serde_json::to_string(&ReminderSettings::default()).expect("serialize");
        assert!(json.contains("\"0d\""));
        assert!(json.contains("\"22:00\""));
        let back: ReminderSettings = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, ReminderSettings::default());
    }
}
