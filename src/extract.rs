//! Per-field rules for turning a line's value into event data.
//!
//! Every rule is forgiving: a value that can't be used leaves the field as it
//! was, it never fails the event.

use chrono_tz::Tz;
use tracing::warn;

use crate::{event::Event, line::ContentLine, timezone::TimezoneResolver};

pub const PARAGRAPH_OPEN: &str = "<p>";
pub const PARAGRAPH_CLOSE: &str = "</p>";

/// Tail the feed appends to the common name of attendees without an address.
pub const NO_MAIL_SUFFIX: &str = "\":invalid:nomail";

/// Stored as is, significant whitespace included.
pub fn summary(event: &mut Event, value: &str) {
    event.summary = value.to_string();
}

pub fn description(event: &mut Event, value: &str) {
    if let Some(text) = strip_paragraph(value) {
        event.description = text.to_string();
    }
}

/// Trim and drop a single wrapping `<p>`...`</p>`. Returns `None` if nothing
/// is left.
pub fn strip_paragraph(value: &str) -> Option<&str> {
    let mut text = value.trim();

    if let Some(rest) = text.strip_prefix(PARAGRAPH_OPEN) {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix(PARAGRAPH_CLOSE) {
        text = rest;
    }

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn location(event: &mut Event, value: &str) {
    event.location = value.trim().to_string();
}

pub fn category(event: &mut Event, value: &str) {
    event.category = value.trim().to_string();
}

pub fn url(event: &mut Event, value: &str) {
    event.url = value.trim().to_string();
}

pub fn uid(event: &mut Event, value: &str) {
    event.uid = value.trim().to_string();
}

/// Resolve a `TZID` value. Failures are logged and yield `None`, so later
/// timestamps in the block fall back to UTC.
pub fn timezone(resolver: &TimezoneResolver, value: &str) -> Option<Tz> {
    match resolver.resolve(value) {
        Ok(tz) => Some(tz),
        Err(err) => {
            warn!("error loading location: {}", err);
            None
        }
    }
}

pub fn start(event: &mut Event, value: &str, resolver: &TimezoneResolver, tz: Option<&Tz>) {
    if let Some(start) = resolver.parse_timestamp(value, tz) {
        event.start = Some(start);
    }
}

/// The end time isn't stored, it only feeds the duration, and only if the
/// start was seen first.
pub fn end(event: &mut Event, value: &str, resolver: &TimezoneResolver, tz: Option<&Tz>) {
    let end = match resolver.parse_timestamp(value, tz) {
        Some(end) => end,
        None => return,
    };

    if let Some(start) = event.start {
        event.duration = (end - start).num_milliseconds() as f64 / 60_000.0;
    }
}

pub fn speaker(event: &mut Event, line: &ContentLine<'_>) {
    if let Some(name) = common_name(line) {
        event.speaker = name;
    }
}

/// Pull the `CN` parameter out of an `ATTENDEE` line.
///
/// The line is split on `;` as a whole, so for the last parameter the "value"
/// runs on to the end of the line. The no-mail tail is removed (taking the
/// closing quote with it), then a leading quote. A closing quote is not
/// otherwise removed. If several `CN` segments exist the last one wins.
pub fn common_name(line: &ContentLine<'_>) -> Option<String> {
    let mut found = None;

    for segment in line.segments() {
        if !segment.starts_with("CN") {
            continue;
        }

        let equal = match segment.find('=') {
            Some(equal) if equal > 0 => equal,
            _ => continue,
        };

        let mut cn = segment[equal + 1..].trim();
        if let Some(rest) = cn.strip_suffix(NO_MAIL_SUFFIX) {
            cn = rest;
        }
        if let Some(rest) = cn.strip_prefix('"') {
            cn = rest;
        }

        found = Some(cn.to_string());
    }

    found
}
