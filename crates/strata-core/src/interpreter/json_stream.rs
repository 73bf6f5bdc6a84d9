//! Incremental JSON tokenizer.
//!
//! Reads through a fixed-size buffer and yields one event at a time along
//! with the path of the value it belongs to. Memory use depends on nesting
//! depth and the longest string kept, never on document size. Strings longer
//! than the token cap are consumed in full but only their prefix is kept.

use std::io::{self, Read};
use thiserror::Error;

const BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_MAX_TOKEN_BYTES: usize = 64 * 1024;
const MAX_DEPTH: usize = 512;

/// One step of a JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonEvent {
    StartObject,
    EndObject,
    StartArray,
    EndArray,
    Key(String),
    String(String),
    /// Raw number text, validated but not converted.
    Number(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    pub fn is_key(&self, name: &str) -> bool {
        matches!(self, PathSegment::Key(k) if k == name)
    }

    pub fn is_index(&self) -> bool {
        matches!(self, PathSegment::Index(_))
    }
}

#[derive(Debug, Error)]
pub enum JsonStreamError {
    #[error("I/O error at byte {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("{message} at byte {offset}")]
    Syntax { offset: u64, message: String },
}

impl JsonStreamError {
    pub fn offset(&self) -> u64 {
        match self {
            Self::Io { offset, .. } | Self::Syntax { offset, .. } => *offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array { next_index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    ArrayValueOrEnd,
    ArrayCommaOrEnd,
    ObjectKeyOrEnd,
    ObjectKey,
    Colon,
    ObjectCommaOrEnd,
    Done,
}

/// Pull-based JSON event reader.
///
/// ```ignore
/// let mut events = JsonEvents::new(reader);
/// while let Some(event) = events.next_event()? {
///     if events.path() == [PathSegment::Key("nbformat".into())] { ... }
/// }
/// ```
pub struct JsonEvents<R> {
    reader: R,
    buf: Box<[u8]>,
    pos: usize,
    len: usize,
    eof: bool,
    offset: u64,
    containers: Vec<Container>,
    path: Vec<PathSegment>,
    expect: Expect,
    pending_pop: bool,
    max_token_bytes: usize,
    truncated_tokens: u64,
}

impl<R: Read> JsonEvents<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![0u8; BUFFER_SIZE].into_boxed_slice(),
            pos: 0,
            len: 0,
            eof: false,
            offset: 0,
            containers: Vec::new(),
            path: Vec::new(),
            expect: Expect::Value,
            pending_pop: false,
            max_token_bytes: DEFAULT_MAX_TOKEN_BYTES,
            truncated_tokens: 0,
        }
    }

    /// Keep at most `bytes` of any string or key.
    pub fn with_max_token_bytes(mut self, bytes: usize) -> Self {
        self.max_token_bytes = bytes.max(1);
        self
    }

    /// Path of the value the last event belongs to. A `Key` event already
    /// carries the path of the value that follows it; a container end carries
    /// the container's own path.
    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Strings whose tail was dropped by the token cap.
    pub fn truncated_tokens(&self) -> u64 {
        self.truncated_tokens
    }

    /// Next event, or `None` once a complete document has been read.
    pub fn next_event(&mut self) -> Result<Option<JsonEvent>, JsonStreamError> {
        if self.pending_pop {
            self.path.pop();
            self.pending_pop = false;
        }

        loop {
            self.skip_whitespace()?;
            let Some(b) = self.peek()? else {
                if self.expect == Expect::Done {
                    return Ok(None);
                }
                return Err(self.syntax("unexpected end of input"));
            };

            match self.expect {
                Expect::Done => return Err(self.syntax("trailing characters after document")),
                Expect::ArrayValueOrEnd if b == b']' => {
                    self.bump();
                    return Ok(Some(self.end_container(JsonEvent::EndArray)));
                }
                Expect::Value | Expect::ArrayValueOrEnd => {
                    if let Some(Container::Array { next_index }) = self.containers.last_mut() {
                        let index = *next_index;
                        *next_index += 1;
                        self.path.push(PathSegment::Index(index));
                    }
                    return self.begin_value(b).map(Some);
                }
                Expect::ObjectKeyOrEnd if b == b'}' => {
                    self.bump();
                    return Ok(Some(self.end_container(JsonEvent::EndObject)));
                }
                Expect::ObjectKeyOrEnd | Expect::ObjectKey => {
                    if b != b'"' {
                        return Err(self.syntax("expected object key"));
                    }
                    let key = self.read_string()?;
                    self.expect = Expect::Colon;
                    self.path.push(PathSegment::Key(key.clone()));
                    return Ok(Some(JsonEvent::Key(key)));
                }
                Expect::Colon => {
                    if b != b':' {
                        return Err(self.syntax("expected ':'"));
                    }
                    self.bump();
                    self.expect = Expect::Value;
                }
                Expect::ObjectCommaOrEnd => match b {
                    b',' => {
                        self.bump();
                        self.expect = Expect::ObjectKey;
                    }
                    b'}' => {
                        self.bump();
                        return Ok(Some(self.end_container(JsonEvent::EndObject)));
                    }
                    _ => return Err(self.syntax("expected ',' or '}'")),
                },
                Expect::ArrayCommaOrEnd => match b {
                    b',' => {
                        self.bump();
                        self.expect = Expect::Value;
                    }
                    b']' => {
                        self.bump();
                        return Ok(Some(self.end_container(JsonEvent::EndArray)));
                    }
                    _ => return Err(self.syntax("expected ',' or ']'")),
                },
            }
        }
    }

    fn begin_value(&mut self, b: u8) -> Result<JsonEvent, JsonStreamError> {
        match b {
            b'{' | b'[' => {
                if self.containers.len() >= MAX_DEPTH {
                    return Err(self.syntax("nesting too deep"));
                }
                self.bump();
                if b == b'{' {
                    self.containers.push(Container::Object);
                    self.expect = Expect::ObjectKeyOrEnd;
                    Ok(JsonEvent::StartObject)
                } else {
                    self.containers.push(Container::Array { next_index: 0 });
                    self.expect = Expect::ArrayValueOrEnd;
                    Ok(JsonEvent::StartArray)
                }
            }
            b'"' => {
                let s = self.read_string()?;
                self.value_done();
                Ok(JsonEvent::String(s))
            }
            b't' => {
                self.read_literal(b"true")?;
                self.value_done();
                Ok(JsonEvent::Bool(true))
            }
            b'f' => {
                self.read_literal(b"false")?;
                self.value_done();
                Ok(JsonEvent::Bool(false))
            }
            b'n' => {
                self.read_literal(b"null")?;
                self.value_done();
                Ok(JsonEvent::Null)
            }
            b'-' | b'0'..=b'9' => {
                let n = self.read_number()?;
                self.value_done();
                Ok(JsonEvent::Number(n))
            }
            _ => Err(self.syntax(&format!("unexpected character '{}'", b as char))),
        }
    }

    fn end_container(&mut self, event: JsonEvent) -> JsonEvent {
        self.containers.pop();
        self.value_done();
        event
    }

    /// A value finished; the segment that addressed it is popped on the next
    /// call so the caller still sees it alongside this event.
    fn value_done(&mut self) {
        self.expect = match self.containers.last() {
            None => Expect::Done,
            Some(Container::Object) => Expect::ObjectCommaOrEnd,
            Some(Container::Array { .. }) => Expect::ArrayCommaOrEnd,
        };
        self.pending_pop = !self.containers.is_empty();
    }

    fn syntax(&self, message: &str) -> JsonStreamError {
        JsonStreamError::Syntax {
            offset: self.offset,
            message: message.to_string(),
        }
    }

    fn peek(&mut self) -> Result<Option<u8>, JsonStreamError> {
        if self.pos == self.len {
            if self.eof {
                return Ok(None);
            }
            self.fill()?;
            if self.len == 0 {
                return Ok(None);
            }
        }
        Ok(Some(self.buf[self.pos]))
    }

    fn fill(&mut self) -> Result<(), JsonStreamError> {
        self.pos = 0;
        self.len = 0;
        loop {
            match self.reader.read(&mut self.buf) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.len = n;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(JsonStreamError::Io {
                        offset: self.offset,
                        source: e,
                    })
                }
            }
        }
    }

    fn bump(&mut self) {
        self.pos += 1;
        self.offset += 1;
    }

    fn next_byte(&mut self) -> Result<u8, JsonStreamError> {
        match self.peek()? {
            Some(b) => {
                self.bump();
                Ok(b)
            }
            None => Err(self.syntax("unexpected end of input")),
        }
    }

    fn skip_whitespace(&mut self) -> Result<(), JsonStreamError> {
        while let Some(b) = self.peek()? {
            if matches!(b, b' ' | b'\t' | b'\n' | b'\r') {
                self.bump();
            } else {
                break;
            }
        }
        Ok(())
    }

    fn read_literal(&mut self, literal: &[u8]) -> Result<(), JsonStreamError> {
        for &expected in literal {
            if self.next_byte()? != expected {
                return Err(self.syntax("invalid literal"));
            }
        }
        Ok(())
    }

    fn read_number(&mut self) -> Result<String, JsonStreamError> {
        let start = self.offset;
        let mut text = String::new();
        while let Some(b) = self.peek()? {
            if matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') {
                if text.len() >= 64 {
                    return Err(self.syntax("number too long"));
                }
                text.push(b as char);
                self.bump();
            } else {
                break;
            }
        }
        if text.parse::<f64>().is_err() || text.ends_with('.') || text.starts_with("-.") {
            return Err(JsonStreamError::Syntax {
                offset: start,
                message: format!("invalid number '{}'", text),
            });
        }
        Ok(text)
    }

    /// Reads a string starting at the opening quote.
    fn read_string(&mut self) -> Result<String, JsonStreamError> {
        self.bump();
        let mut out: Vec<u8> = Vec::new();
        let mut truncated = false;

        loop {
            let b = self.next_byte()?;
            let decoded: Option<char> = match b {
                b'"' => break,
                b'\\' => Some(self.read_escape()?),
                0x00..=0x1f => return Err(self.syntax("control character in string")),
                _ => {
                    if out.len() < self.max_token_bytes {
                        out.push(b);
                    } else {
                        truncated = true;
                    }
                    None
                }
            };
            if let Some(c) = decoded {
                let mut tmp = [0u8; 4];
                let encoded = c.encode_utf8(&mut tmp).as_bytes();
                if out.len() + encoded.len() <= self.max_token_bytes {
                    out.extend_from_slice(encoded);
                } else {
                    truncated = true;
                }
            }
        }

        if truncated {
            self.truncated_tokens += 1;
        }
        Ok(match String::from_utf8(out) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    fn read_escape(&mut self) -> Result<char, JsonStreamError> {
        let c = match self.next_byte()? {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{8}',
            b'f' => '\u{c}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => {
                let high = self.read_hex4()?;
                if (0xD800..0xDC00).contains(&high) {
                    if self.next_byte()? != b'\\' || self.next_byte()? != b'u' {
                        return Err(self.syntax("unpaired surrogate"));
                    }
                    let low = self.read_hex4()?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(self.syntax("invalid low surrogate"));
                    }
                    let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
                } else {
                    char::from_u32(high).unwrap_or(char::REPLACEMENT_CHARACTER)
                }
            }
            _ => return Err(self.syntax("invalid escape")),
        };
        Ok(c)
    }

    fn read_hex4(&mut self) -> Result<u32, JsonStreamError> {
        let mut value = 0u32;
        for _ in 0..4 {
            let b = self.next_byte()?;
            let digit = (b as char)
                .to_digit(16)
                .ok_or_else(|| self.syntax("invalid unicode escape"))?;
            value = value * 16 + digit;
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(input: &str) -> Vec<(Vec<PathSegment>, JsonEvent)> {
        let mut events = JsonEvents::new(input.as_bytes());
        let mut out = Vec::new();
        while let Some(event) = events.next_event().unwrap() {
            out.push((events.path().to_vec(), event));
        }
        out
    }

    fn key(k: &str) -> PathSegment {
        PathSegment::Key(k.to_string())
    }

    #[test]
    fn test_scalar_document() {
        let events = collect(" 42 ");
        assert_eq!(events, vec![(vec![], JsonEvent::Number("42".into()))]);
    }

    #[test]
    fn test_paths_track_nesting() {
        let events = collect(r#"{"a": [1, {"b": "x"}], "c": null}"#);
        let expected = vec![
            (vec![], JsonEvent::StartObject),
            (vec![key("a")], JsonEvent::Key("a".into())),
            (vec![key("a")], JsonEvent::StartArray),
            (vec![key("a"), PathSegment::Index(0)], JsonEvent::Number("1".into())),
            (vec![key("a"), PathSegment::Index(1)], JsonEvent::StartObject),
            (
                vec![key("a"), PathSegment::Index(1), key("b")],
                JsonEvent::Key("b".into()),
            ),
            (
                vec![key("a"), PathSegment::Index(1), key("b")],
                JsonEvent::String("x".into()),
            ),
            (vec![key("a"), PathSegment::Index(1)], JsonEvent::EndObject),
            (vec![key("a")], JsonEvent::EndArray),
            (vec![key("c")], JsonEvent::Key("c".into())),
            (vec![key("c")], JsonEvent::Null),
            (vec![], JsonEvent::EndObject),
        ];
        assert_eq!(events, expected);
    }

    #[test]
    fn test_empty_containers() {
        let events = collect(r#"{"a": [], "b": {}}"#);
        let kinds: Vec<_> = events.into_iter().map(|(_, e)| e).collect();
        assert_eq!(
            kinds,
            vec![
                JsonEvent::StartObject,
                JsonEvent::Key("a".into()),
                JsonEvent::StartArray,
                JsonEvent::EndArray,
                JsonEvent::Key("b".into()),
                JsonEvent::StartObject,
                JsonEvent::EndObject,
                JsonEvent::EndObject,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let events = collect(r#"["a\nb", "\u00e9\ud83d\ude00", "q\"q"]"#);
        assert_eq!(events[1].1, JsonEvent::String("a\nb".into()));
        assert_eq!(events[2].1, JsonEvent::String("\u{e9}\u{1F600}".into()));
        assert_eq!(events[3].1, JsonEvent::String("q\"q".into()));
    }

    #[test]
    fn test_long_strings_are_capped() {
        let long = "x".repeat(100);
        let doc = format!(r#"["{}", true]"#, long);
        let mut events = JsonEvents::new(doc.as_bytes()).with_max_token_bytes(10);
        events.next_event().unwrap();
        assert_eq!(
            events.next_event().unwrap(),
            Some(JsonEvent::String("x".repeat(10)))
        );
        assert_eq!(events.next_event().unwrap(), Some(JsonEvent::Bool(true)));
        assert_eq!(events.truncated_tokens(), 1);
    }

    #[test]
    fn test_values_span_buffer_boundaries() {
        let body = "y".repeat(BUFFER_SIZE * 2 + 17);
        let doc = format!(r#"{{"k": "{}", "n": 1.5e3}}"#, body);
        let events = collect(&doc);
        assert_eq!(events[2].1, JsonEvent::String(body));
        assert_eq!(events[4].1, JsonEvent::Number("1.5e3".into()));
    }

    #[test]
    fn test_syntax_error_reports_offset() {
        let mut events = JsonEvents::new(r#"{"a" 1}"#.as_bytes());
        events.next_event().unwrap();
        events.next_event().unwrap();
        let err = events.next_event().unwrap_err();
        assert_eq!(err.offset(), 5);
    }

    #[test]
    fn test_truncated_document_is_an_error() {
        let mut events = JsonEvents::new(r#"{"a": [1, 2"#.as_bytes());
        let mut result = Ok(None);
        for _ in 0..10 {
            result = events.next_event();
            if result.is_err() {
                break;
            }
        }
        assert!(result.is_err());
    }

    #[test]
    fn test_trailing_garbage_is_an_error() {
        let mut events = JsonEvents::new("{} x".as_bytes());
        events.next_event().unwrap();
        events.next_event().unwrap();
        assert!(events.next_event().is_err());
    }

    #[test]
    fn test_trailing_comma_is_an_error() {
        let mut events = JsonEvents::new("[1,]".as_bytes());
        events.next_event().unwrap();
        events.next_event().unwrap();
        assert!(events.next_event().is_err());
    }
}
