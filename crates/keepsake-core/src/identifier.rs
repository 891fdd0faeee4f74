use uuid::Uuid;

use crate::event::EventId;
use crate::settings::ReminderOffset;

/// Alert identifier for one `(event, offset)` pair.
///
/// The same pair always yields the same identifier, so a delivery layer that
/// overwrites on identifier keeps re-planning idempotent.
pub fn make_identifier(event_id: &EventId, offset: ReminderOffset) -> String {
    format!("{}-{}", event_id.hyphenated(), offset.code())
}

/// Inverse of [`make_identifier`].
pub fn split_identifier(identifier: &str) -> Option<(EventId, ReminderOffset)> {
    let (event, code) = identifier.rsplit_once('-')?;
    if !code.ends_with('d') {
        return None;
    }
    let event_id = Uuid::parse_str(event).ok()?;
    let offset = code.parse().ok()?;
    Some((event_id, offset))
}
