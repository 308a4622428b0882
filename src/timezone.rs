use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use thiserror::Error;

/// Format of `DTSTART`/`DTEND` values: local time, no separators, no offset.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown time zone {name:?} (declared as {declared:?})")]
pub struct UnknownTimezone {
    pub declared: String,
    pub name: String,
}

/// Resolves `TZID` declarations against the IANA database bundled with
/// `chrono-tz`, and interprets timestamps in the block's current zone.
#[derive(Debug, Clone)]
pub struct TimezoneResolver {
    timestamp: Regex,
}

impl Default for TimezoneResolver {
    fn default() -> Self {
        TimezoneResolver::new()
    }
}

impl TimezoneResolver {
    pub fn new() -> TimezoneResolver {
        TimezoneResolver {
            timestamp: Regex::new(r"^[0-9]{8}T[0-9]{6}$").expect("valid timestamp regex"),
        }
    }

    /// Feeds write zone names with `-` where the database uses `/`, e.g.
    /// `Europe-Brussels`.
    pub fn normalize(declared: &str) -> String {
        declared.trim().replace('-', "/")
    }

    pub fn resolve(&self, declared: &str) -> Result<Tz, UnknownTimezone> {
        let name = TimezoneResolver::normalize(declared);

        name.parse::<Tz>().map_err(|_| UnknownTimezone {
            declared: declared.to_string(),
            name,
        })
    }

    /// Parse a basic `YYYYMMDDTHHMMSS` timestamp in `tz`, or UTC if no zone
    /// has been declared.
    ///
    /// Returns `None` for anything that doesn't match the pattern exactly.
    /// Ambiguous local times resolve to the earlier instant. Local times
    /// skipped by a DST transition are read with the offset in force before
    /// it, so they land just after the jump (02:30 in a 02:00 to 03:00 gap
    /// becomes 03:30).
    pub fn parse_timestamp(&self, value: &str, tz: Option<&Tz>) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if !self.timestamp.is_match(value) {
            return None;
        }

        let naive = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).ok()?;

        let tz = match tz {
            Some(tz) => tz,
            None => return Some(Utc.from_utc_datetime(&naive)),
        };

        match tz.from_local_datetime(&naive) {
            LocalResult::Single(local) => Some(local.with_timezone(&Utc)),
            LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
            LocalResult::None => {
                let before = tz
                    .offset_from_local_datetime(&(naive - Duration::hours(1)))
                    .earliest()?
                    .fix();
                let utc = naive - Duration::seconds(i64::from(before.local_minus_utc()));
                Some(Utc.from_utc_datetime(&utc))
            }
        }
    }
}
