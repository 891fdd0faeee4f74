use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::calendar::local_to_utc;

/// Wall-clock time at minute resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn hour(self) -> u32 {
        u32::from(self.hour)
    }

    pub fn minute(self) -> u32 {
        u32::from(self.minute)
    }

    /// Truncates seconds.
    pub fn of(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    pub fn to_naive(self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour(), self.minute(), 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clock_re = Regex::new(r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$")
            .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;
        let captures = clock_re
            .captures(s.trim())
            .ok_or_else(|| anyhow!("invalid time of day: {s} (expected HH:MM or H:MMam/pm)"))?;

        let raw_hour: u32 = captures["hour"].parse()?;
        let minute: u32 = captures["minute"].parse()?;

        let hour = match captures.name("ampm").map(|m| m.as_str().to_ascii_lowercase()) {
            Some(ampm) => {
                if raw_hour == 0 || raw_hour > 12 {
                    return Err(anyhow!("invalid 12-hour clock time: {s}"));
                }
                match (ampm.as_str(), raw_hour) {
                    ("am", 12) => 0,
                    ("am", h) => h,
                    ("pm", 12) => 12,
                    (_, h) => h + 12,
                }
            }
            None => raw_hour,
        };

        Self::new(hour, minute).ok_or_else(|| anyhow!("time of day out of range: {s}"))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Do-not-disturb window `[start, end)`.
///
/// When `start >= end` the window wraps past midnight; `start == end` covers
/// the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Outside,
    SameDay,
    NextDay,
}

impl QuietWindow {
    /// 22:00 to 08:00, the factory setting.
    pub const OVERNIGHT: Self = Self {
        start: TimeOfDay { hour: 22, minute: 0 },
        end: TimeOfDay { hour: 8, minute: 0 },
    };

    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, t: TimeOfDay) -> bool {
        self.placement(t) != Placement::Outside
    }

    fn placement(&self, t: TimeOfDay) -> Placement {
        if !self.wraps_midnight() {
            if self.start <= t && t < self.end {
                Placement::SameDay
            } else {
                Placement::Outside
            }
        } else if t >= self.start {
            Placement::NextDay
        } else if t < self.end {
            Placement::SameDay
        } else {
            Placement::Outside
        }
    }

    /// Retimes `candidate` to the window's end when its local time of day
    /// falls inside the window; anything outside is returned unchanged.
    pub fn adjust(&self, candidate: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
        let local = candidate.with_timezone(tz);
        let day = local.date_naive();
        let target_day = match self.placement(TimeOfDay::of(local.time())) {
            Placement::Outside => return candidate,
            Placement::SameDay => day,
            Placement::NextDay => match day.succ_opt() {
                Some(next) => next,
                None => return candidate,
            },
        };

        // A repeated fall-back hour can map the window end before `candidate`.
        let adjusted = local_to_utc(target_day.and_time(self.end.to_naive()), tz)
            .map_or(candidate, |end| end.max(candidate));
        tracing::trace!(
            candidate = %candidate,
            adjusted = %adjusted,
            window = %self,
            "moved alert out of quiet hours"
        );
        adjusted
    }
}

impl fmt::Display for QuietWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for QuietWindow {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| anyhow!("expected START-END quiet window, got: {s}"))?;
        Ok(Self::new(start.parse()?, end.parse()?))
    }
}

/// Applies `window` when quiet hours are on; identity otherwise.
pub fn adjust(candidate: DateTime<Utc>, window: Option<&QuietWindow>, tz: &Tz) -> DateTime<Utc> {
    match window {
        Some(window) => window.adjust(candidate, tz),
        None => candidate,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::{QuietWindow, TimeOfDay, adjust};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .expect("valid instant")
    }

    fn window(raw: &str) -> QuietWindow {
        raw.parse().expect("valid window")
    }

    #[test]
    fn repeated_fall_back_hour_never_moves_backwards() {
        // 02:00-03:00 happens twice in Berlin on 2025-10-26.
        let quiet = window("22:00-02:30");
        let tz = chrono_tz::Europe::Berlin;

        // 02:10 CEST, first pass: the window ends at 02:30 CEST.
        assert_eq!(
            quiet.adjust(at(2025, 10, 26, 0, 10), &tz),
            at(2025, 10, 26, 0, 30)
        );
        // 02:10 CET, second pass: 02:30 resolves to the earlier CEST
        // instant, which has already gone by.
        let second_pass = at(2025, 10, 26, 1, 10);
        assert_eq!(quiet.adjust(second_pass, &tz), second_pass);
    }

    #[test]
    fn overnight_window_moves_late_evening_to_next_morning() {
        let quiet = window("22:00-08:00");
        let tz = chrono_tz::UTC;

        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 23, 30), &tz),
            at(2025, 3, 9, 8, 0)
        );
        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 22, 30), &tz),
            at(2025, 3, 9, 8, 0)
        );
        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 3, 0), &tz),
            at(2025, 3, 8, 8, 0)
        );
        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 12, 0), &tz),
            at(2025, 3, 8, 12, 0)
        );
        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 9, 0), &tz),
            at(2025, 3, 8, 9, 0)
        );
    }

    #[test]
    fn window_edges_are_half_open() {
        let quiet = window("22:00-08:00");
        let tz = chrono_tz::UTC;
        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 22, 0), &tz),
            at(2025, 3, 9, 8, 0)
        );
        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 8, 0), &tz),
            at(2025, 3, 8, 8, 0)
        );
    }

    #[test]
    fn daytime_window_moves_to_end_same_day() {
        let quiet = window("13:00-15:30");
        let tz = chrono_tz::UTC;
        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 14, 10), &tz),
            at(2025, 3, 8, 15, 30)
        );
        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 15, 30), &tz),
            at(2025, 3, 8, 15, 30)
        );
        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 12, 59), &tz),
            at(2025, 3, 8, 12, 59)
        );
    }

    #[test]
    fn equal_bounds_cover_the_whole_day() {
        let quiet = window("09:00-09:00");
        let tz = chrono_tz::UTC;
        assert!(quiet.wraps_midnight());
        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 9, 0), &tz),
            at(2025, 3, 9, 9, 0)
        );
        assert_eq!(
            quiet.adjust(at(2025, 3, 8, 6, 0), &tz),
            at(2025, 3, 8, 9, 0)
        );
    }

    #[test]
    fn adjustment_uses_local_time_of_day() {
        let tz = chrono_tz::Europe::Berlin;
        let quiet = window("22:00-08:00");
        // 22:30 UTC is 23:30 in Berlin in winter.
        let adjusted = quiet.adjust(at(2025, 1, 10, 22, 30), &tz);
        assert_eq!(adjusted, at(2025, 1, 11, 7, 0));
    }

    #[test]
    fn disabled_quiet_hours_are_identity() {
        let candidate = at(2025, 3, 8, 23, 30);
        assert_eq!(adjust(candidate, None, &chrono_tz::UTC), candidate);
    }

    #[test]
    fn parses_clock_formats() {
        assert_eq!(
            "7:05pm".parse::<TimeOfDay>().expect("pm"),
            TimeOfDay::new(19, 5).expect("valid")
        );
        assert_eq!(
            "12:00am".parse::<TimeOfDay>().expect("midnight"),
            TimeOfDay::new(0, 0).expect("valid")
        );
        assert_eq!(
            "08:00".parse::<TimeOfDay>().expect("24h").to_string(),
            "08:00"
        );
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("13:00pm".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
    }
}
