// Incremental inspection of a partially received tool payload.
//
// Only the common `{"name": "...", "arguments": {...}}` key order can be
// announced before the payload closes. Any other shape is reported as
// `Unsupported` and the caller waits for the complete payload instead.

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HeaderSniff {
    /// The payload so far is a prefix of the streamable shape.
    NeedMore,
    /// The payload cannot be announced early.
    Unsupported,
    /// `name` is known; the arguments object starts at `arguments_start`.
    Header {
        name: String,
        arguments_start: usize,
    },
}

pub(crate) fn sniff_tool_header(payload: &str) -> HeaderSniff {
    match sniff_inner(payload) {
        Ok((name, arguments_start)) => HeaderSniff::Header {
            name,
            arguments_start,
        },
        Err(outcome) => outcome,
    }
}

fn sniff_inner(payload: &str) -> Result<(String, usize), HeaderSniff> {
    let bytes = payload.as_bytes();
    let mut i = skip_ws(bytes, 0);
    i = expect_byte(bytes, i, b'{')?;

    let (key, next) = string_at(payload, skip_ws(bytes, i))?;
    if key != "name" {
        return Err(HeaderSniff::Unsupported);
    }
    i = expect_byte(bytes, skip_ws(bytes, next), b':')?;

    let (name, next) = string_at(payload, skip_ws(bytes, i))?;
    if name.trim().is_empty() {
        return Err(HeaderSniff::Unsupported);
    }
    i = expect_byte(bytes, skip_ws(bytes, next), b',')?;

    let (key, next) = string_at(payload, skip_ws(bytes, i))?;
    if key != "arguments" {
        return Err(HeaderSniff::Unsupported);
    }
    i = expect_byte(bytes, skip_ws(bytes, next), b':')?;

    i = skip_ws(bytes, i);
    match bytes.get(i) {
        None => Err(HeaderSniff::NeedMore),
        Some(b'{') => Ok((name, i)),
        Some(_) => Err(HeaderSniff::Unsupported),
    }
}

#[inline]
fn skip_ws(bytes: &[u8], mut i: usize) -> usize {
    while let Some(b' ' | b'\n' | b'\r' | b'\t') = bytes.get(i) {
        i += 1;
    }
    i
}

#[inline]
fn expect_byte(bytes: &[u8], i: usize, want: u8) -> Result<usize, HeaderSniff> {
    match bytes.get(i) {
        None => Err(HeaderSniff::NeedMore),
        Some(&b) if b == want => Ok(i + 1),
        Some(_) => Err(HeaderSniff::Unsupported),
    }
}

/// Decode the JSON string starting at `start`, returning it and the index
/// just past its closing quote.
fn string_at(payload: &str, start: usize) -> Result<(String, usize), HeaderSniff> {
    let bytes = payload.as_bytes();
    match bytes.get(start) {
        None => return Err(HeaderSniff::NeedMore),
        Some(b'"') => {}
        Some(_) => return Err(HeaderSniff::Unsupported),
    }
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                let end = i + 1;
                let decoded = serde_json::from_str::<String>(&payload[start..end])
                    .map_err(|_| HeaderSniff::Unsupported)?;
                return Ok((decoded, end));
            }
            b'\\' => i += 2,
            0x00..=0x1F => return Err(HeaderSniff::Unsupported),
            _ => i += 1,
        }
    }
    Err(HeaderSniff::NeedMore)
}

/// Tracks the extent of a JSON object whose bytes arrive in pieces.
#[derive(Debug, Default, Clone)]
pub(crate) struct ObjectScanner {
    depth: usize,
    in_string: bool,
    escaped: bool,
    complete: bool,
}

impl ObjectScanner {
    /// Consume bytes starting at the object's opening brace. Returns how many
    /// bytes of `bytes` belong to the object; stops after its closing brace.
    pub(crate) fn advance(&mut self, bytes: &[u8]) -> usize {
        if self.complete {
            return 0;
        }
        for (i, &b) in bytes.iter().enumerate() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match b {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        self.complete = true;
                        return i + 1;
                    }
                }
                _ => {}
            }
        }
        bytes.len()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete
    }
}
