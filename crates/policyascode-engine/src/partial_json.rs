//! Partial JSON reconciliation
//!
//! Turns a growing, possibly truncated JSON buffer into the most complete value
//! derivable from it. Anything left open at the tail of the buffer is treated
//! as implicitly closed:
//!
//! | tail of buffer          | reconciled as                       |
//! |-------------------------|-------------------------------------|
//! | `{"a": "hel`            | `{"a": "hel"}`                      |
//! | `{"a": 1, "b`           | `{"a": 1}` (dangling key dropped)   |
//! | `[1, 2.`                | `[1, 2]`                            |
//! | `[tr`                   | `[true]`                            |
//! | `"x\u00`                | `"x"` (partial escape dropped)      |
//!
//! Malformed input yields `None` rather than an error: a bad tick simply means
//! "no new data". Nesting deeper than [`MAX_DEPTH`] counts as malformed.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Deepest container nesting accepted, in line with serde_json's recursion limit.
pub const MAX_DEPTH: usize = 128;

/// Parse `text` as a possibly-truncated JSON document.
///
/// Returns `None` for an empty buffer, a buffer that holds no value yet
/// (e.g. just `-`), or one that is not JSON at all.
pub fn parse(text: &str) -> Option<Value> {
    let mut parser = Parser::new(text);
    parser.skip_ws();
    if parser.at_end() {
        return None;
    }
    parser.value().ok().flatten()
}

/// Decode the array stored under `key` into typed items.
///
/// A `null` value, a non-object, or a missing key all mean "no items yet".
/// Items that do not (yet) deserialize are skipped.
pub fn items_under<T: DeserializeOwned>(value: &Value, key: &str) -> Vec<T> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Accumulating reconciler: feed it deltas, read back the current value.
#[derive(Debug, Default, Clone)]
pub struct Reconciler {
    buffer: String,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and reconcile the whole buffer.
    pub fn push(&mut self, delta: &str) -> Option<Value> {
        self.buffer.push_str(delta);
        self.value()
    }

    pub fn value(&self) -> Option<Value> {
        parse(&self.buffer)
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

// ============================================================================
// Lenient recursive-descent parser
// ============================================================================

struct Malformed;

type Parsed<T> = Result<T, Malformed>;

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
    /// Set once the end of input is hit inside a value; every enclosing
    /// container returns what it has collected so far.
    truncated: bool,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            depth: 0,
            truncated: false,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn value(&mut self) -> Parsed<Option<Value>> {
        self.skip_ws();
        match self.peek() {
            None => {
                self.truncated = true;
                Ok(None)
            }
            Some(b'{') => self.nested(Self::object).map(Some),
            Some(b'[') => self.nested(Self::array).map(Some),
            Some(b'"') => self.string().map(|s| Some(Value::String(s))),
            Some(b't') => self.literal("true", Value::Bool(true)),
            Some(b'f') => self.literal("false", Value::Bool(false)),
            Some(b'n') => self.literal("null", Value::Null),
            Some(b'-' | b'0'..=b'9') => self.number(),
            Some(_) => Err(Malformed),
        }
    }

    fn nested(&mut self, container: fn(&mut Self) -> Parsed<Value>) -> Parsed<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(Malformed);
        }
        self.depth += 1;
        let value = container(self);
        self.depth -= 1;
        value
    }

    fn object(&mut self) -> Parsed<Value> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => {
                    self.truncated = true;
                    return Ok(Value::Object(map));
                }
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Value::Object(map));
                }
                Some(b'"') => {}
                Some(_) => return Err(Malformed),
            }

            let key = self.string()?;
            if self.truncated {
                return Ok(Value::Object(map));
            }

            self.skip_ws();
            match self.peek() {
                None => {
                    self.truncated = true;
                    return Ok(Value::Object(map));
                }
                Some(b':') => self.pos += 1,
                Some(_) => return Err(Malformed),
            }

            if let Some(value) = self.value()? {
                map.insert(key, value);
            }
            if self.truncated {
                return Ok(Value::Object(map));
            }

            self.skip_ws();
            match self.peek() {
                None => {
                    self.truncated = true;
                    return Ok(Value::Object(map));
                }
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Value::Object(map));
                }
                Some(_) => return Err(Malformed),
            }
        }
    }

    fn array(&mut self) -> Parsed<Value> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => {
                    self.truncated = true;
                    return Ok(Value::Array(items));
                }
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                Some(_) => {}
            }

            if let Some(value) = self.value()? {
                items.push(value);
            }
            if self.truncated {
                return Ok(Value::Array(items));
            }

            self.skip_ws();
            match self.peek() {
                None => {
                    self.truncated = true;
                    return Ok(Value::Array(items));
                }
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                Some(_) => return Err(Malformed),
            }
        }
    }

    /// Parses a string starting at the opening quote. On truncation returns
    /// the prefix decoded so far.
    fn string(&mut self) -> Parsed<String> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let run_start = self.pos;
            while let Some(b) = self.peek() {
                if b == b'"' || b == b'\\' {
                    break;
                }
                self.pos += 1;
            }
            out.push_str(&self.src[run_start..self.pos]);

            match self.peek() {
                None => {
                    self.truncated = true;
                    return Ok(out);
                }
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(_) => {
                    self.pos += 1;
                    match self.escape()? {
                        Some(c) => out.push(c),
                        None => {
                            self.truncated = true;
                            return Ok(out);
                        }
                    }
                }
            }
        }
    }

    /// Decodes one escape after the backslash; `None` when it is cut off.
    fn escape(&mut self) -> Parsed<Option<char>> {
        let Some(b) = self.peek() else {
            return Ok(None);
        };
        self.pos += 1;
        let c = match b {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{0008}',
            b'f' => '\u{000C}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => {
                let Some(high) = self.hex4()? else {
                    return Ok(None);
                };
                if !(0xD800..0xDC00).contains(&high) {
                    return Ok(Some(char::from_u32(high).unwrap_or('\u{FFFD}')));
                }
                // High surrogate: a low surrogate escape must follow.
                let rest = &self.bytes[self.pos..];
                if rest.len() < 2 {
                    if rest.is_empty() || rest[0] == b'\\' {
                        return Ok(None);
                    }
                    return Ok(Some('\u{FFFD}'));
                }
                if rest[0] != b'\\' || rest[1] != b'u' {
                    return Ok(Some('\u{FFFD}'));
                }
                self.pos += 2;
                let Some(low) = self.hex4()? else {
                    return Ok(None);
                };
                if !(0xDC00..0xE000).contains(&low) {
                    return Ok(Some('\u{FFFD}'));
                }
                let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                char::from_u32(code).unwrap_or('\u{FFFD}')
            }
            _ => return Err(Malformed),
        };
        Ok(Some(c))
    }

    fn hex4(&mut self) -> Parsed<Option<u32>> {
        let rest = &self.bytes[self.pos..];
        let available = rest.len().min(4);
        if !rest[..available].iter().all(u8::is_ascii_hexdigit) {
            return Err(Malformed);
        }
        if available < 4 {
            self.pos = self.bytes.len();
            return Ok(None);
        }
        let digits = &self.src[self.pos..self.pos + 4];
        self.pos += 4;
        u32::from_str_radix(digits, 16)
            .map(Some)
            .map_err(|_| Malformed)
    }

    fn literal(&mut self, word: &str, value: Value) -> Parsed<Option<Value>> {
        let rest = &self.bytes[self.pos..];
        let n = rest.len().min(word.len());
        if rest[..n] != word.as_bytes()[..n] {
            return Err(Malformed);
        }
        self.pos += n;
        if n < word.len() {
            self.truncated = true;
        }
        Ok(Some(value))
    }

    fn number(&mut self) -> Parsed<Option<Value>> {
        let start = self.pos;
        while matches!(
            self.peek(),
            Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        ) {
            self.pos += 1;
        }
        let mut text = &self.src[start..self.pos];
        if self.at_end() {
            // The number may still be growing; keep its longest valid prefix.
            self.truncated = true;
            text = text.trim_end_matches(|c: char| matches!(c, '-' | '+' | '.' | 'e' | 'E'));
            if text.is_empty() {
                return Ok(None);
            }
        }
        serde_json::from_str::<Value>(text)
            .map(Some)
            .map_err(|_| Malformed)
    }
}
