use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single event parsed from a `BEGIN`/`END` block.
///
/// Fields that were not present in the block keep their default value. The
/// `duration` is never read from the feed: it is derived from `DTSTART` and
/// `DTEND` when both parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    pub summary: String,
    pub description: String,
    pub speaker: String,
    pub location: String,
    pub category: String,
    pub url: String,

    /// Unset if the block had no `DTSTART` line or it failed to parse.
    pub start: Option<DateTime<Utc>>,

    /// Length of the event in minutes. May be negative if the end came before
    /// the start.
    pub duration: f64,
}
