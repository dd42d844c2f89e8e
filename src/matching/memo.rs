//! Payer comments as explorers report them: sometimes plain text, sometimes
//! the base64 of the comment cell (TON comments start with a zero op-code).

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;

fn looks_base64(s: &str) -> bool {
    s.len() >= 4
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'-' | b'_' | b'='))
}

fn printable(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| !c.is_control() || c == '\n' || c == '\t')
}

/// Decoded text of an encoded memo, or `None` if `raw` does not decode to
/// printable UTF-8.
pub fn decode_memo(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if !looks_base64(raw) {
        return None;
    }
    [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .iter()
        .filter_map(|engine| engine.decode(raw).ok())
        .find_map(|bytes| {
            let start = bytes.iter().position(|b| *b != 0)?;
            let text = String::from_utf8(bytes[start..].to_vec()).ok()?;
            printable(&text).then_some(text)
        })
}

/// True if the memo carries `reference`, read as plain text first and then
/// decoded.
pub fn memo_contains(raw: &str, reference: &str) -> bool {
    let reference = reference.trim();
    if reference.is_empty() {
        return false;
    }
    raw.contains(reference) || decode_memo(raw).is_some_and(|d| d.contains(reference))
}
