/// The two tag kinds recognized in model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Reasoning,
    ToolCall,
}

/// Static delimiters for one tag kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagDefinition {
    pub kind: TagKind,
    pub open: &'static str,
    pub close: &'static str,
}

pub const REASONING: TagDefinition = TagDefinition {
    kind: TagKind::Reasoning,
    open: "<think>",
    close: "</think>",
};

pub const TOOL_CALL: TagDefinition = TagDefinition {
    kind: TagKind::ToolCall,
    open: "<tool_call>",
    close: "</tool_call>",
};

/// All definitions, in matching order.
pub const ALL_TAGS: [TagDefinition; 2] = [REASONING, TOOL_CALL];

const fn max_usize(a: usize, b: usize) -> usize {
    if a > b {
        a
    } else {
        b
    }
}

/// Length of the longest delimiter. The extractor never holds back more than
/// `MAX_DELIMITER_LEN - 1` bytes of undecided text.
pub const MAX_DELIMITER_LEN: usize = max_usize(
    max_usize(REASONING.open.len(), REASONING.close.len()),
    max_usize(TOOL_CALL.open.len(), TOOL_CALL.close.len()),
);

impl TagKind {
    #[must_use]
    pub const fn definition(self) -> &'static TagDefinition {
        match self {
            TagKind::Reasoning => &REASONING,
            TagKind::ToolCall => &TOOL_CALL,
        }
    }
}

impl TagDefinition {
    /// Rebuild the original tagged region around `payload`.
    #[must_use]
    pub fn wrap(&self, payload: &str) -> String {
        let mut out = String::with_capacity(self.open.len() + payload.len() + self.close.len());
        out.push_str(self.open);
        out.push_str(payload);
        out.push_str(self.close);
        out
    }
}

/// Outcome of matching open delimiters at a `<`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpenMatch {
    /// A complete open delimiter starts here.
    Full(&'static TagDefinition),
    /// The remaining input is a proper prefix of at least one open delimiter.
    Partial,
    None,
}

#[inline]
pub(crate) fn match_open_at(bytes: &[u8]) -> OpenMatch {
    if bytes.first().copied() != Some(b'<') {
        return OpenMatch::None;
    }
    let mut partial = false;
    for tag in &ALL_TAGS {
        let open = tag.open.as_bytes();
        if bytes.starts_with(open) {
            return OpenMatch::Full(tag.kind.definition());
        }
        if bytes.len() < open.len() && open.starts_with(bytes) {
            partial = true;
        }
    }
    if partial {
        OpenMatch::Partial
    } else {
        OpenMatch::None
    }
}

/// Length of the longest suffix of `haystack` that is a proper prefix of `delimiter`.
#[inline]
pub(crate) fn partial_suffix_len(haystack: &[u8], delimiter: &[u8]) -> usize {
    let max = delimiter.len().saturating_sub(1).min(haystack.len());
    (1..=max)
        .rev()
        .find(|&len| haystack.ends_with(&delimiter[..len]))
        .unwrap_or(0)
}
