//! Offset helpers. Every offset and length in this crate counts UTF-16 code
//! units, the unit clients measure their text in. Strings stay UTF-8; these
//! helpers translate at the edges.
//!
//! An offset that lands inside a surrogate pair rounds down to the start of
//! that character, since a UTF-8 string cannot hold half of one.

pub fn unit_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Byte index of the character starting at UTF-16 `offset`, clamped to the
/// end of `text`.
pub fn byte_index(text: &str, offset: usize) -> usize {
    let mut units = 0;
    for (idx, ch) in text.char_indices() {
        let next = units + ch.len_utf16();
        if next > offset {
            return idx;
        }
        units = next;
    }
    text.len()
}

/// `text[start..end]` in code units. Both bounds clamp to the text length and
/// an inverted range yields the empty string.
pub fn unit_slice(text: &str, start: usize, end: usize) -> &str {
    let from = byte_index(text, start);
    let to = byte_index(text, end);
    if from >= to {
        return "";
    }
    &text[from..to]
}

/// `text[..start] + replacement + text[end..]` with clamped bounds.
pub fn splice(text: &str, start: usize, end: usize, replacement: &str) -> String {
    let from = byte_index(text, start);
    let to = byte_index(text, end).max(from);
    let mut out = String::with_capacity(text.len() - (to - from) + replacement.len());
    out.push_str(&text[..from]);
    out.push_str(replacement);
    out.push_str(&text[to..]);
    out
}

/// Code-unit offset of the first literal occurrence of `needle`.
pub fn find_units(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .find(needle)
        .map(|byte| unit_len(&haystack[..byte]))
}

/// Collapses whitespace runs to one space and trims both ends.
///
/// Lossy: strings differing only in whitespace layout compare equal.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
