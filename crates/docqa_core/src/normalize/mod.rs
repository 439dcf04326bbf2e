/// Canonical text form used for chunk offsets.
///
/// Line endings become `\n`, trailing whitespace is trimmed from every line and
/// from the end of the text. All chunk and citation offsets index into this form
/// (by Unicode scalar value, not byte).
pub fn normalize_text(s: &str) -> String {
    let unified = s.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    for (i, line) in unified.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    out
}

pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Slice by character offsets `[start, end)`; out-of-range bounds are clamped.
pub fn char_slice(s: &str, start: usize, end: usize) -> &str {
    if start >= end {
        return "";
    }
    let mut indices = s.char_indices().map(|(i, _)| i).chain(std::iter::once(s.len()));
    let begin = indices.nth(start).unwrap_or(s.len());
    let stop = indices.nth(end - start - 1).unwrap_or(s.len());
    &s[begin..stop]
}

/// First `max_chars` characters of the trimmed text, with `...` when cut.
pub fn snippet_first_chars(text: &str, max_chars: usize) -> String {
    let t = text.trim();
    if char_len(t) <= max_chars {
        return t.to_string();
    }
    let mut s = char_slice(t, 0, max_chars).to_string();
    s.push_str("...");
    s
}
