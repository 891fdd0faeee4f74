use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::stamp_serde;

pub type EventId = Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CategoryKind {
    Birthday,
    Anniversary,
    Milestone,
    Memorial,
    JustBecause,
    #[default]
    #[serde(other)]
    Other,
}

impl CategoryKind {
    pub const ALL: [CategoryKind; 6] = [
        CategoryKind::Birthday,
        CategoryKind::Anniversary,
        CategoryKind::Milestone,
        CategoryKind::Memorial,
        CategoryKind::JustBecause,
        CategoryKind::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Birthday => "birthday",
            Self::Anniversary => "anniversary",
            Self::Milestone => "milestone",
            Self::Memorial => "memorial",
            Self::JustBecause => "justBecause",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for CategoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown category: {wanted} (expected birthday, anniversary, milestone, memorial, justBecause or other)"
                )
            })
    }
}

/// A personal date to be reminded of.
///
/// For recurring events only the local month/day of `date` matters; one-off
/// events fire at `date` itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,

    #[serde(with = "stamp_serde")]
    pub date: DateTime<Utc>,

    pub recurring: bool,

    pub label: String,

    #[serde(default)]
    pub person_name: Option<String>,

    #[serde(default)]
    pub relationship: Option<String>,

    #[serde(default)]
    pub category: CategoryKind,

    #[serde(default)]
    pub notes: Option<String>,

    #[serde(with = "stamp_serde")]
    pub created: DateTime<Utc>,
}

impl Event {
    pub fn new(
        label: impl Into<String>,
        date: DateTime<Utc>,
        recurring: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            date,
            recurring,
            label: label.into(),
            person_name: None,
            relationship: None,
            category: CategoryKind::Other,
            notes: None,
            created: now,
        }
    }

    pub fn with_person(mut self, name: impl Into<String>, relationship: impl Into<String>) -> Self {
        self.person_name = Some(name.into());
        self.relationship = Some(relationship.into());
        self
    }

    pub fn with_category(mut self, category: CategoryKind) -> Self {
        self.category = category;
        self
    }

    /// Person's name when one is attached, otherwise the event label.
    pub fn display_name(&self) -> &str {
        self.person_name.as_deref().unwrap_or(self.label.as_str())
    }

    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{CategoryKind, Event};

    #[test]
    fn unknown_category_reads_back_as_other() {
        let kind: CategoryKind =
            serde_json::from_str("\"graduation\"").expect("unknown maps to other");
        assert_eq!(kind, CategoryKind::Other);

        let kind: CategoryKind = serde_json::from_str("\"justBecause\"").expect("known kind");
        assert_eq!(kind, CategoryKind::JustBecause);
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!(
            "Birthday".parse::<CategoryKind>().expect("parse"),
            CategoryKind::Birthday
        );
        assert!("party".parse::<CategoryKind>().is_err());
    }

    #[test]
    fn event_roundtrips_through_json() {
        let now = Utc
            .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .single()
            .expect("valid now");
        let event = Event::new("Ada's birthday", now, true, now)
            .with_person("Ada", "sister")
            .with_category(CategoryKind::Birthday);

        let line = serde_json::to_string(&event).expect("serialize");
        assert!(line.contains("\"date\":\"20250101T000000Z\""));
        let back: Event = serde_json::from_str(&line).expect("deserialize");
        assert_eq!(back, event);
        assert_eq!(back.display_name(), "Ada");
        assert_eq!(back.short_id().len(), 8);
    }
}
