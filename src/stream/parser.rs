//! Tag-delimited file unit parsing over a growing buffer.
//!
//! Recognised blocks:
//! - `<file path="...">content</file>` yields `FileComplete`
//! - `<thinking>...</thinking>` yields `Thinking`
//! - `<package>`, `<packages>`, `<dependency>`, `<dependencies>` are skipped
//!
//! Text outside any block is narration.

use regex::Regex;
use sandforge_common::{FileKind, StreamEvent, normalize_path};
use std::collections::HashSet;
use std::ops::Range;
use std::sync::LazyLock;

static FILE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<file\s+path="([^"]+)">(.*?)</file>"#).unwrap());

static OPEN_TAG_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(?:(file)\s+path="([^"]*)"|(thinking|packages|package|dependencies|dependency))>"#)
        .unwrap()
});

/// A completed file extracted from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUnit {
    pub path: String,
    pub content: String,
    pub kind: FileKind,
}

impl FileUnit {
    fn new(path: &str, content: &str) -> Self {
        Self {
            path: path.to_string(),
            content: content.trim().to_string(),
            kind: FileKind::from_path(path),
        }
    }

    fn to_event(&self) -> StreamEvent {
        StreamEvent::FileComplete {
            path: self.path.clone(),
            content: self.content.clone(),
            kind: self.kind,
        }
    }
}

/// Incremental parser. Feed chunks with [`push`](Self::push), end with
/// [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: String,
    /// Paths already reported; a path completes at most once
    processed: HashSet<String>,
    units: Vec<FileUnit>,
    /// Prose before this byte offset has been classified
    cursor: usize,
}

/// Result of scanning the unclassified tail of the buffer.
struct TailScan {
    events: Vec<(usize, StreamEvent)>,
    cursor: usize,
    /// Open file block with no close tag, only reported at end of stream
    unterminated: Option<(usize, String, String)>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return the events it confirmed, in buffer order.
    pub fn push(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        self.scan(false)
    }

    /// Flush everything still pending at end of stream.
    ///
    /// Trailing prose becomes narration and an unterminated file block is
    /// reported with whatever content it accumulated.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        self.scan(true)
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn units(&self) -> &[FileUnit] {
        &self.units
    }

    pub fn into_units(self) -> Vec<FileUnit> {
        self.units
    }

    fn scan(&mut self, at_end: bool) -> Vec<StreamEvent> {
        let mut events = self.scan_files();

        let tail = scan_tail(&self.buffer, self.cursor, at_end);
        self.cursor = tail.cursor;
        events.extend(tail.events);

        if let Some((pos, path, content)) = tail.unterminated
            && self.processed.insert(path.clone())
        {
            let unit = FileUnit::new(&path, &content);
            events.push((pos, unit.to_event()));
            self.units.push(unit);
        }

        events.sort_by_key(|(pos, _)| *pos);
        events.into_iter().map(|(_, event)| event).collect()
    }

    /// Re-scan the whole buffer for closed file blocks not reported yet.
    /// File tags quoted inside thinking or package blocks are not files.
    fn scan_files(&mut self) -> Vec<(usize, StreamEvent)> {
        let quoted = other_block_spans(&self.buffer);
        let mut events = Vec::new();
        for cap in FILE_REGEX.captures_iter(&self.buffer) {
            let (Some(whole), Some(path), Some(body)) = (cap.get(0), cap.get(1), cap.get(2)) else {
                continue;
            };
            if quoted.iter().any(|span| span.contains(&whole.start())) {
                continue;
            }
            let path = normalize_path(path.as_str());
            if path.is_empty() || !self.processed.insert(path.clone()) {
                continue;
            }
            let unit = FileUnit::new(&path, body.as_str());
            events.push((whole.start(), unit.to_event()));
            self.units.push(unit);
        }
        events
    }
}

/// Byte ranges of non-file blocks, walking tags the way the tail scan does.
/// A block still open runs to the end of the buffer.
fn other_block_spans(buffer: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut cursor = 0;

    while let Some(cap) = OPEN_TAG_REGEX.captures(&buffer[cursor..]) {
        let Some(whole) = cap.get(0) else { break };
        let open_start = cursor + whole.start();
        let body_start = cursor + whole.end();
        let is_file = cap.get(1).is_some();
        let close = if is_file {
            "</file>".to_string()
        } else {
            format!("</{}>", cap.get(3).map(|m| m.as_str()).unwrap_or(""))
        };

        match buffer[body_start..].find(&close) {
            Some(offset) => {
                let end = body_start + offset + close.len();
                if !is_file {
                    spans.push(open_start..end);
                }
                cursor = end;
            }
            None => {
                if !is_file {
                    spans.push(open_start..buffer.len());
                }
                break;
            }
        }
    }
    spans
}

fn scan_tail(buffer: &str, mut cursor: usize, at_end: bool) -> TailScan {
    let mut events = Vec::new();
    let mut unterminated = None;

    loop {
        let rest = &buffer[cursor..];
        let Some(cap) = OPEN_TAG_REGEX.captures(rest) else {
            if at_end {
                push_narration(&mut events, cursor, rest);
                cursor = buffer.len();
            }
            break;
        };
        let Some(whole) = cap.get(0) else { break };

        let open_start = cursor + whole.start();
        let body_start = cursor + whole.end();
        push_narration(&mut events, cursor, &rest[..whole.start()]);

        let tag = if cap.get(1).is_some() {
            "file"
        } else {
            cap.get(3).map(|m| m.as_str()).unwrap_or("")
        };
        let close = format!("</{}>", tag);

        match buffer[body_start..].find(&close) {
            Some(offset) => {
                if tag == "thinking" {
                    push_thinking(&mut events, open_start, &buffer[body_start..body_start + offset]);
                }
                // Closed file blocks are reported by the whole-buffer scan
                cursor = body_start + offset + close.len();
            }
            None if at_end => {
                let body = strip_partial_close(&buffer[body_start..], &close);
                match tag {
                    "thinking" => push_thinking(&mut events, open_start, body),
                    "file" => {
                        let path = cap.get(2).map(|m| normalize_path(m.as_str())).unwrap_or_default();
                        if !path.is_empty() {
                            unterminated = Some((open_start, path, body.to_string()));
                        }
                    }
                    _ => {}
                }
                cursor = buffer.len();
                break;
            }
            None => {
                cursor = open_start;
                break;
            }
        }
    }

    TailScan {
        events,
        cursor,
        unterminated,
    }
}

fn push_narration(events: &mut Vec<(usize, StreamEvent)>, pos: usize, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        events.push((
            pos,
            StreamEvent::Narration {
                text: text.to_string(),
            },
        ));
    }
}

fn push_thinking(events: &mut Vec<(usize, StreamEvent)>, pos: usize, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        events.push((
            pos,
            StreamEvent::Thinking {
                text: text.to_string(),
            },
        ));
    }
}

/// Drop a dangling prefix of `close` (`</fi`) from the end of `body`.
fn strip_partial_close<'a>(body: &'a str, close: &str) -> &'a str {
    for len in (1..close.len()).rev() {
        if body.ends_with(&close[..len]) {
            return &body[..body.len() - len];
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_events(events: &[StreamEvent]) -> Vec<(String, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::FileComplete { path, content, .. } => {
                    Some((path.clone(), content.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_file_completes_once_across_chunks() {
        let mut parser = StreamParser::new();
        let mut all = Vec::new();
        for chunk in [
            "Here you go. <file path=\"src/App.jsx\">",
            "export default function App() {\n  return <div><h1>Hi</h1></div>;\n}",
            "\n</file>",
            " and more text <file path=\"src/App.jsx\">again</file>",
        ] {
            all.extend(parser.push(chunk));
        }
        all.extend(parser.finish());

        let files = file_events(&all);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "src/App.jsx");
        assert!(files[0].1.starts_with("export default function App()"));
        assert!(files[0].1.ends_with('}'));
    }

    #[test]
    fn test_unterminated_file_flushed_on_finish() {
        let mut parser = StreamParser::new();
        let mut all = parser.push(
            "<file path=\"src/Header.jsx\">const x=1;</file><file path=\"src/Footer.jsx\">",
        );
        assert_eq!(file_events(&all).len(), 1);

        all.extend(parser.finish());
        let files = file_events(&all);
        assert_eq!(
            files,
            vec![
                ("src/Header.jsx".to_string(), "const x=1;".to_string()),
                ("src/Footer.jsx".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_partial_close_tag_stripped() {
        let mut parser = StreamParser::new();
        parser.push("<file path=\"a.css\">body {}\n</fi");
        let events = parser.finish();
        assert_eq!(file_events(&events), vec![("a.css".to_string(), "body {}".to_string())]);
    }

    #[test]
    fn test_thinking_and_narration() {
        let mut parser = StreamParser::new();
        let mut events = parser.push("<thinking>plan the layout</thinking>I'll add a header.");
        // Trailing prose is not confirmed until a tag or the end arrives
        assert_eq!(
            events,
            vec![StreamEvent::Thinking {
                text: "plan the layout".into()
            }]
        );

        events = parser.push("<file path=\"src/Header.jsx\">h</file>Done!");
        assert_eq!(
            events[0],
            StreamEvent::Narration {
                text: "I'll add a header.".into()
            }
        );
        assert!(matches!(events[1], StreamEvent::FileComplete { .. }));

        events = parser.finish();
        assert_eq!(
            events,
            vec![StreamEvent::Narration {
                text: "Done!".into()
            }]
        );
    }

    #[test]
    fn test_file_tag_inside_thinking_is_not_a_file() {
        let mut parser = StreamParser::new();
        let mut events = parser
            .push("<thinking>I could write <file path=\"src/X.jsx\">draft</file> later</thinking>ok");
        events.extend(parser.finish());

        assert!(file_events(&events).is_empty());
        assert!(parser.units().is_empty());
        assert!(matches!(&events[0], StreamEvent::Thinking { text } if text.contains("draft")));
        assert_eq!(
            events[1],
            StreamEvent::Narration {
                text: "ok".into()
            }
        );
    }

    #[test]
    fn test_file_tag_in_open_thinking_waits_for_close() {
        let mut parser = StreamParser::new();
        let events = parser.push("<thinking>maybe <file path=\"a.js\">x</file>");
        assert!(file_events(&events).is_empty());

        let events = parser.push(" no</thinking><file path=\"a.js\">real</file>");
        assert_eq!(file_events(&events), vec![("a.js".to_string(), "real".to_string())]);
    }

    #[test]
    fn test_package_tags_are_silent() {
        let mut parser = StreamParser::new();
        let mut events = parser.push("<packages>axios, clsx</packages><package>zod</package>");
        events.extend(parser.finish());
        assert!(events.is_empty());
        assert!(parser.buffer().contains("<packages>"));
    }

    #[test]
    fn test_nested_angle_brackets_in_body() {
        let mut parser = StreamParser::new();
        parser.push("<file path=\"./src/List.jsx\"><ul>{items.map(i => <li key={i}>{i}</li>)}</ul></file>");
        let units = parser.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].path, "src/List.jsx");
        assert_eq!(units[0].kind, FileKind::Component);
        assert!(units[0].content.ends_with("</ul>"));
    }

    #[test]
    fn test_split_open_tag() {
        let mut parser = StreamParser::new();
        assert!(parser.push("Intro <fi").is_empty());
        let events = parser.push("le path=\"x.js\">1</file>");
        assert_eq!(
            events,
            vec![
                StreamEvent::Narration {
                    text: "Intro".into()
                },
                StreamEvent::FileComplete {
                    path: "x.js".into(),
                    content: "1".into(),
                    kind: FileKind::Script,
                },
            ]
        );
    }
}
