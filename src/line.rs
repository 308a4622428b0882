use std::io::{self, BufRead};

/// Turn one raw line into text: drop the `\n` or `\r\n` ending and replace
/// bytes that aren't UTF-8 with U+FFFD.
pub fn decode_line(buf: &[u8]) -> String {
    let mut end = buf.len();
    if end > 0 && buf[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && buf[end - 1] == b'\r' {
        end -= 1;
    }

    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Lines of a reader, decoded with [`decode_line`]. Only real I/O failures
/// are errors.
pub struct RawLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> RawLines<R> {
    pub fn new(reader: R) -> RawLines<R> {
        RawLines {
            reader,
            buf: Vec::new(),
        }
    }
}

impl<R: BufRead> Iterator for RawLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => Some(Ok(decode_line(&self.buf))),
            Err(err) => Some(Err(err)),
        }
    }
}

/// The keywords the block parser acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Begin,
    End,
    Summary,
    Description,
    Location,
    /// Recognized, never extracted.
    Status,
    /// Recognized, never extracted.
    Class,
    TimeZoneID,
    Categories,
    Url,
    /// Recognized, never extracted.
    Method,
    Uid,
    DtStart,
    DtEnd,
    Attendee,
}

/// Keyword prefixes, tried in order. The first prefix that the line's name
/// starts with wins.
const KEYWORDS: &[(&str, Keyword)] = &[
    ("BEGIN", Keyword::Begin),
    ("END", Keyword::End),
    ("SUMMARY", Keyword::Summary),
    ("DESCRIPTION", Keyword::Description),
    ("LOCATION", Keyword::Location),
    ("STATUS", Keyword::Status),
    ("CLASS", Keyword::Class),
    ("TZID", Keyword::TimeZoneID),
    ("CATEGORIES", Keyword::Categories),
    ("URL", Keyword::Url),
    ("METHOD", Keyword::Method),
    ("UID", Keyword::Uid),
    ("DTSTART", Keyword::DtStart),
    ("DTEND", Keyword::DtEnd),
    ("ATTENDEE", Keyword::Attendee),
];

impl Keyword {
    /// Match a property name against the known keyword prefixes.
    pub fn classify(name: &str) -> Option<Keyword> {
        KEYWORDS
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix))
            .map(|&(_, keyword)| keyword)
    }

    /// Keywords that are known about but deliberately carry no data into the
    /// event.
    pub fn is_ignored(self) -> bool {
        matches!(self, Keyword::Status | Keyword::Class | Keyword::Method)
    }
}

/// A single physical line of the feed, split lazily into its name and value.
///
/// Lines look like `NAME[;PARAM=VALUE...]:VALUE`. No unfolding or unescaping
/// is done.
#[derive(Debug, Clone, Copy)]
pub struct ContentLine<'a> {
    raw: &'a str,
    name: &'a str,
}

impl<'a> ContentLine<'a> {
    pub fn new(raw: &'a str) -> ContentLine<'a> {
        let name = match raw.find(|c: char| c == ';' || c == ':') {
            Some(idx) => &raw[..idx],
            None => raw,
        };

        ContentLine { raw, name }
    }

    pub fn raw(&self) -> &'a str {
        self.raw
    }

    /// The part of the line before any parameter or value delimiter.
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn keyword(&self) -> Option<Keyword> {
        Keyword::classify(self.name)
    }

    /// Everything after the first `:`, untrimmed.
    ///
    /// Returns `None` if the line has no `:` or the line starts with one.
    pub fn value(&self) -> Option<&'a str> {
        match self.raw.find(':') {
            Some(colon) if colon > 0 => Some(&self.raw[colon + 1..]),
            _ => None,
        }
    }

    /// The whole line split on `;`, including the name and the value.
    pub fn segments(&self) -> std::str::Split<'a, char> {
        self.raw.split(';')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_strips_line_endings() {
        assert_eq!(decode_line(b"UID:a\n"), "UID:a");
        assert_eq!(decode_line(b"UID:a\r\n"), "UID:a");
        assert_eq!(decode_line(b"UID:a"), "UID:a");
        assert_eq!(decode_line(b"\n"), "");
    }

    #[test]
    fn decode_replaces_invalid_utf8() {
        assert_eq!(decode_line(b"DESCRIPTION:caf\xe9\n"), "DESCRIPTION:caf\u{fffd}");
    }

    #[test]
    fn raw_lines_survive_bad_bytes() {
        let feed: &[u8] = b"UID:a\r\nSUMMARY:\xff\xfe\nUID:b";
        let lines = RawLines::new(feed)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(lines, vec!["UID:a", "SUMMARY:\u{fffd}\u{fffd}", "UID:b"]);
    }

    #[test]
    fn classify_plain_keywords() {
        assert_eq!(Keyword::classify("BEGIN"), Some(Keyword::Begin));
        assert_eq!(Keyword::classify("END"), Some(Keyword::End));
        assert_eq!(Keyword::classify("UID"), Some(Keyword::Uid));
        assert_eq!(Keyword::classify("TZID"), Some(Keyword::TimeZoneID));
        assert_eq!(Keyword::classify("ATTENDEE"), Some(Keyword::Attendee));
    }

    #[test]
    fn classify_is_a_prefix_match() {
        assert_eq!(Keyword::classify("URLS"), Some(Keyword::Url));
        assert_eq!(Keyword::classify("DTSTAMP"), None);
        assert_eq!(Keyword::classify("X-WR-CALNAME"), None);
        assert_eq!(Keyword::classify("summary"), None);
    }

    #[test]
    fn ignored_keywords() {
        for name in &["STATUS", "CLASS", "METHOD"] {
            let keyword = Keyword::classify(name).unwrap();
            assert!(keyword.is_ignored(), "{}", name);
        }

        assert!(!Keyword::Summary.is_ignored());
    }

    #[test]
    fn name_stops_at_parameters() {
        let line = ContentLine::new("DTSTART;TZID=Europe/Brussels:20200201T100000");
        assert_eq!(line.name(), "DTSTART");
        assert_eq!(line.keyword(), Some(Keyword::DtStart));
        assert_eq!(line.value(), Some("20200201T100000"));
    }

    #[test]
    fn value_is_everything_after_first_colon() {
        let line = ContentLine::new("URL:https://fosdem.org/2020/schedule/");
        assert_eq!(line.name(), "URL");
        assert_eq!(line.value(), Some("https://fosdem.org/2020/schedule/"));

        let line = ContentLine::new("SUMMARY: padded ");
        assert_eq!(line.value(), Some(" padded "));
    }

    #[test]
    fn missing_value() {
        let line = ContentLine::new("SUMMARY");
        assert_eq!(line.name(), "SUMMARY");
        assert_eq!(line.value(), None);

        let line = ContentLine::new(":orphan");
        assert_eq!(line.name(), "");
        assert_eq!(line.value(), None);
    }

    #[test]
    fn segments_cover_the_whole_line() {
        let line = ContentLine::new("ATTENDEE;ROLE=REQ-PARTICIPANT;CN=Jane:invalid:nomail");
        let segments: Vec<_> = line.segments().collect();
        assert_eq!(
            segments,
            vec!["ATTENDEE", "ROLE=REQ-PARTICIPANT", "CN=Jane:invalid:nomail"]
        );
    }
}
