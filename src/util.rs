use std::time::{SystemTime, UNIX_EPOCH};

const HEX: &[u8; 16] = b"0123456789abcdef";
const CALL_ID_HEX_LEN: usize = 24;

#[inline]
pub(crate) fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}

/// Fresh tool-call id: `call_` followed by 24 random hex digits.
#[inline]
pub(crate) fn next_call_id() -> String {
    let mut out = String::with_capacity(5 + CALL_ID_HEX_LEN);
    out.push_str("call_");
    push_hex_nibbles(&mut out, fastrand::u128(..), CALL_ID_HEX_LEN);
    out
}

#[inline]
pub(crate) fn format_request_seq_hex(prefix: &str, request_seq: u64) -> String {
    let mut out = String::with_capacity(prefix.len() + 16);
    out.push_str(prefix);
    push_hex_nibbles(&mut out, u128::from(request_seq), 16);
    out
}

/// Longest prefix of `text` that fits in `max_bytes` without splitting a char.
#[inline]
pub(crate) fn truncate_on_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn push_hex_nibbles(out: &mut String, value: u128, digits: usize) {
    for shift in (0..digits).rev() {
        let nibble = usize::try_from((value >> (shift * 4)) & 0x0f).unwrap_or(0);
        out.push(char::from(HEX[nibble]));
    }
}
