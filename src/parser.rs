use std::io;

use chrono_tz::Tz;
use tracing::debug;

use crate::{
    error::FeedError,
    event::Event,
    extract,
    line::{ContentLine, Keyword, RawLines},
    timezone::TimezoneResolver,
};

#[derive(Debug)]
enum State {
    OutsideBlock,
    InsideBlock {
        event: Event,
        /// Last `TZID` resolved in this block.
        tz: Option<Tz>,
    },
}

/// The two-state block machine. Feed it lines in order with
/// [`BlockParser::push_line`]; it hands back an [`Event`] every time a block
/// closes.
#[derive(Debug)]
pub struct BlockParser {
    state: State,
    resolver: TimezoneResolver,
}

impl Default for BlockParser {
    fn default() -> Self {
        BlockParser::new()
    }
}

impl BlockParser {
    pub fn new() -> BlockParser {
        BlockParser::with_resolver(TimezoneResolver::new())
    }

    pub fn with_resolver(resolver: TimezoneResolver) -> BlockParser {
        BlockParser {
            state: State::OutsideBlock,
            resolver,
        }
    }

    pub fn in_block(&self) -> bool {
        matches!(self.state, State::InsideBlock { .. })
    }

    /// Process one line, returning the finished event if it closed a block.
    pub fn push_line(&mut self, line: &str) -> Option<Event> {
        let line = ContentLine::new(line);
        let keyword = line.keyword()?;

        match keyword {
            Keyword::Begin => {
                if self.in_block() {
                    debug!("{} inside an open block, starting over", line.raw());
                }

                self.state = State::InsideBlock {
                    event: Event::default(),
                    tz: None,
                };
                None
            }
            Keyword::End => match std::mem::replace(&mut self.state, State::OutsideBlock) {
                State::InsideBlock { event, .. } => Some(event),
                State::OutsideBlock => None,
            },
            keyword => {
                if let State::InsideBlock { event, tz } = &mut self.state {
                    apply(&self.resolver, event, tz, keyword, &line);
                }
                None
            }
        }
    }

    /// Signal end of input. Returns whether an unterminated block was thrown
    /// away.
    pub fn finish(self) -> bool {
        match self.state {
            State::InsideBlock { event, .. } => {
                debug!(uid = %event.uid, "discarding unterminated block");
                true
            }
            State::OutsideBlock => false,
        }
    }
}

fn apply(
    resolver: &TimezoneResolver,
    event: &mut Event,
    tz: &mut Option<Tz>,
    keyword: Keyword,
    line: &ContentLine<'_>,
) {
    if keyword.is_ignored() {
        return;
    }

    if keyword == Keyword::Attendee {
        extract::speaker(event, line);
        return;
    }

    let value = match line.value() {
        Some(value) => value,
        None => return,
    };

    match keyword {
        Keyword::Summary => extract::summary(event, value),
        Keyword::Description => extract::description(event, value),
        Keyword::Location => extract::location(event, value),
        Keyword::Categories => extract::category(event, value),
        Keyword::Url => extract::url(event, value),
        Keyword::Uid => extract::uid(event, value),
        Keyword::TimeZoneID => *tz = extract::timezone(resolver, value),
        Keyword::DtStart => extract::start(event, value, resolver, tz.as_ref()),
        Keyword::DtEnd => extract::end(event, value, resolver, tz.as_ref()),
        Keyword::Begin
        | Keyword::End
        | Keyword::Status
        | Keyword::Class
        | Keyword::Method
        | Keyword::Attendee => {}
    }
}

/// Lazily parse events out of a sequence of lines.
///
/// A read error is yielded once, after which the iterator is exhausted. An
/// unterminated final block is dropped; check
/// [`Events::discarded_partial_block`] once iteration is over.
pub struct Events<I> {
    lines: I,
    parser: Option<BlockParser>,
    discarded_partial_block: bool,
}

impl<I> Events<I> {
    pub fn new(lines: I) -> Events<I> {
        Events {
            lines,
            parser: Some(BlockParser::new()),
            discarded_partial_block: false,
        }
    }

    /// Whether the input ended, or failed, inside a block that was then
    /// dropped.
    pub fn discarded_partial_block(&self) -> bool {
        self.discarded_partial_block
    }
}

impl<I, S> Iterator for Events<I>
where
    I: Iterator<Item = io::Result<S>>,
    S: AsRef<str>,
{
    type Item = Result<Event, FeedError>;

    fn next(&mut self) -> Option<Self::Item> {
        let parser = self.parser.as_mut()?;

        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    if let Some(event) = parser.push_line(line.as_ref()) {
                        return Some(Ok(event));
                    }
                }
                Some(Err(err)) => {
                    if let Some(parser) = self.parser.take() {
                        self.discarded_partial_block = parser.finish();
                    }
                    return Some(Err(err.into()));
                }
                None => {
                    if let Some(parser) = self.parser.take() {
                        self.discarded_partial_block = parser.finish();
                    }
                    return None;
                }
            }
        }
    }
}

/// Parse events from anything that can be read line by line. Bytes that
/// aren't UTF-8 are replaced rather than failing the feed.
pub fn parse_lines<R: io::BufRead>(reader: R) -> Events<RawLines<R>> {
    Events::new(RawLines::new(reader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn parse(feed: &str) -> Vec<Event> {
        parse_lines(feed.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn empty_block() {
        let events = parse("BEGIN:VEVENT\nEND:VEVENT\n");
        assert_eq!(events, vec![Event::default()]);
    }

    #[test]
    fn full_block() {
        let events = parse(
            r#"BEGIN:VEVENT
METHOD:PUBLISH
UID:9025@FOSDEM20@fosdem.org
TZID:Europe-Brussels
DTSTART:20200201T093000
DTEND:20200201T095000
SUMMARY:Welcome to FOSDEM 2020
DESCRIPTION:<p>FOSDEM welcome and opening talk.</p>
CLASS:PUBLIC
STATUS:CONFIRMED
CATEGORIES:Keynotes
URL:https://fosdem.org/2020/schedule/event/keynote_welcome/
LOCATION:Janson
ATTENDEE;ROLE=REQ-PARTICIPANT;CUTYPE=INDIVIDUAL;CN="FOSDEM Staff":invalid:nomail
END:VEVENT
"#,
        );

        assert_eq!(
            events,
            vec![Event {
                uid: "9025@FOSDEM20@fosdem.org".to_string(),
                summary: "Welcome to FOSDEM 2020".to_string(),
                description: "FOSDEM welcome and opening talk.".to_string(),
                speaker: "FOSDEM Staff".to_string(),
                location: "Janson".to_string(),
                category: "Keynotes".to_string(),
                url: "https://fosdem.org/2020/schedule/event/keynote_welcome/".to_string(),
                start: Some(utc("2020-02-01T08:30:00Z")),
                duration: 20.0,
            }]
        );
    }

    #[test]
    fn crlf_lines() {
        let events = parse("BEGIN:VEVENT\r\nUID:abc\r\nEND:VEVENT\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid, "abc");
    }

    #[test]
    fn lines_outside_blocks_are_ignored() {
        let events = parse(
            "SUMMARY:stray\nEND:VEVENT\nBEGIN:VEVENT\nUID:a\nEND:VEVENT\nUID:b\nEND:VCALENDAR\n",
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid, "a");
        assert_eq!(events[0].summary, "");
    }

    #[test]
    fn calendar_wrapper() {
        let events = parse(
            "BEGIN:VCALENDAR\nVERSION:2.0\nMETHOD:PUBLISH\nBEGIN:VEVENT\nUID:a\nEND:VEVENT\nBEGIN:VEVENT\nUID:b\nEND:VEVENT\nEND:VCALENDAR\n",
        );
        let uids: Vec<_> = events.iter().map(|e| e.uid.as_str()).collect();
        assert_eq!(uids, vec!["a", "b"]);
    }

    #[test]
    fn begin_restarts_block() {
        let events = parse("BEGIN:VEVENT\nUID:a\nSUMMARY:A\nBEGIN:VEVENT\nUID:b\nEND:VEVENT\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid, "b");
        assert_eq!(events[0].summary, "");
    }

    #[test]
    fn unknown_keywords_are_ignored() {
        let events = parse(
            "BEGIN:VEVENT\nX-CUSTOM:whatever\nDTSTAMP:20200101T000000\nUID:a\nEND:VEVENT\n",
        );
        assert_eq!(events[0].uid, "a");
        assert_eq!(events[0].start, None);
    }

    #[test]
    fn missing_delimiter_skips_field() {
        let events = parse("BEGIN:VEVENT\nSUMMARY\nUID:a\nEND:VEVENT\n");
        assert_eq!(events[0].summary, "");
        assert_eq!(events[0].uid, "a");
    }

    #[test]
    fn timezone_defaults_to_utc() {
        let events = parse("BEGIN:VEVENT\nDTSTART:20200201T093000\nEND:VEVENT\n");
        assert_eq!(events[0].start, Some(utc("2020-02-01T09:30:00Z")));
    }

    #[test]
    fn timezone_is_block_scoped() {
        let events = parse(
            r#"BEGIN:VEVENT
TZID:Europe-Brussels
DTSTART:20200201T093000
END:VEVENT
BEGIN:VEVENT
DTSTART:20200201T093000
END:VEVENT
"#,
        );
        assert_eq!(events[0].start, Some(utc("2020-02-01T08:30:00Z")));
        assert_eq!(events[1].start, Some(utc("2020-02-01T09:30:00Z")));
    }

    #[test]
    fn timezone_only_applies_to_later_timestamps() {
        let events = parse(
            "BEGIN:VEVENT\nDTSTART:20200201T093000\nTZID:Europe-Brussels\nDTEND:20200201T103000\nEND:VEVENT\n",
        );
        assert_eq!(events[0].start, Some(utc("2020-02-01T09:30:00Z")));
        assert_eq!(events[0].duration, 0.0);
    }

    #[test]
    fn unresolvable_timezone_falls_back_to_utc() {
        let events = parse(
            "BEGIN:VEVENT\nTZID:Europe-Brussels\nTZID:Nowhere-Special\nDTSTART:20200201T093000\nUID:a\nEND:VEVENT\n",
        );
        assert_eq!(events[0].start, Some(utc("2020-02-01T09:30:00Z")));
        assert_eq!(events[0].uid, "a");
    }

    #[test]
    fn parameterized_timestamps_match() {
        let events = parse(
            "BEGIN:VEVENT\nDTSTART;VALUE=DATE-TIME:20200201T093000\nDTEND;VALUE=DATE-TIME:20200201T110000\nEND:VEVENT\n",
        );
        assert_eq!(events[0].start, Some(utc("2020-02-01T09:30:00Z")));
        assert_eq!(events[0].duration, 90.0);
    }

    #[test]
    fn negative_duration() {
        let events = parse(
            "BEGIN:VEVENT\nTZID:Europe-Brussels\nDTSTART:20200201T110000\nDTEND:20200201T093000\nEND:VEVENT\n",
        );
        assert_eq!(events[0].duration, -90.0);
    }

    #[test]
    fn start_in_dst_gap_shifts_forward() {
        let events = parse(
            "BEGIN:VEVENT\nTZID:Europe-Brussels\nDTSTART:20200329T023000\nDTEND:20200329T040000\nEND:VEVENT\n",
        );
        assert_eq!(events[0].start, Some(utc("2020-03-29T01:30:00Z")));
        assert_eq!(events[0].duration, 30.0);
    }

    #[test]
    fn malformed_start_keeps_other_fields() {
        let events = parse(
            "BEGIN:VEVENT\nDTSTART:2020-02-01 09:30\nDTEND:20200201T110000\nSUMMARY:Talk\nLOCATION:K.1.105\nEND:VEVENT\n",
        );
        assert_eq!(events[0].start, None);
        assert_eq!(events[0].duration, 0.0);
        assert_eq!(events[0].summary, "Talk");
        assert_eq!(events[0].location, "K.1.105");
    }

    #[test]
    fn unterminated_block_is_dropped() {
        let events = parse("BEGIN:VEVENT\nUID:a\nEND:VEVENT\nBEGIN:VEVENT\nUID:b\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].uid, "a");
    }

    #[test]
    fn invalid_utf8_only_affects_its_field() {
        let feed: &[u8] =
            b"BEGIN:VEVENT\nUID:a\nDESCRIPTION:caf\xe9\nEND:VEVENT\nBEGIN:VEVENT\nUID:b\nEND:VEVENT\n";
        let events = parse_lines(feed).collect::<Result<Vec<_>, _>>().unwrap();

        let uids: Vec<_> = events.iter().map(|e| e.uid.as_str()).collect();
        assert_eq!(uids, vec!["a", "b"]);
        assert_eq!(events[0].description, "caf\u{fffd}");
    }

    #[test]
    fn iterator_reports_discarded_block() {
        let mut events = parse_lines("BEGIN:VEVENT\nUID:a\nEND:VEVENT\nBEGIN:VEVENT\n".as_bytes());
        assert!(events.next().is_some());
        assert!(!events.discarded_partial_block());
        assert!(events.next().is_none());
        assert!(events.discarded_partial_block());

        let mut events = parse_lines("BEGIN:VEVENT\nEND:VEVENT\n".as_bytes());
        assert!(events.by_ref().all(|e| e.is_ok()));
        assert!(!events.discarded_partial_block());
    }

    #[test]
    fn finish_reports_discarded_block() {
        let mut parser = BlockParser::new();
        assert!(parser.push_line("BEGIN:VEVENT").is_none());
        assert!(parser.in_block());
        assert!(parser.finish());

        let mut parser = BlockParser::new();
        parser.push_line("BEGIN:VEVENT");
        assert!(parser.push_line("END:VEVENT").is_some());
        assert!(!parser.in_block());
        assert!(!parser.finish());
    }

    #[test]
    fn read_error_ends_iteration() {
        let lines = vec![
            Ok("BEGIN:VEVENT".to_string()),
            Ok("UID:a".to_string()),
            Ok("END:VEVENT".to_string()),
            Ok("BEGIN:VEVENT".to_string()),
            Err(io::Error::new(io::ErrorKind::Other, "connection reset")),
            Ok("END:VEVENT".to_string()),
        ];

        let mut events = Events::new(lines.into_iter());

        assert_eq!(events.next().unwrap().unwrap().uid, "a");
        assert!(matches!(events.next(), Some(Err(FeedError::Read(_)))));
        assert!(events.discarded_partial_block());
        assert!(events.next().is_none());
    }

    #[test]
    fn parsing_is_repeatable() {
        let feed = "BEGIN:VEVENT\nUID:a\nTZID:Europe-Brussels\nDTSTART:20200201T093000\nDTEND:20200201T100000\nEND:VEVENT\n";
        assert_eq!(parse(feed), parse(feed));
    }
}
