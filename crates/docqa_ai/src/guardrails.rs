//! Citation markers in generated text.
//!
//! The generation collaborator is asked to tag claims with `[[chunk:<sequence>]]`.
//! Its output is untrusted: every marker is parsed here and checked against the
//! retrieval set by the answerer before anything reaches the caller.

const OPEN: &str = "[[chunk:";
const CLOSE: &str = "]]";

pub fn reference_token(sequence: u32) -> String {
    format!("{OPEN}{sequence}{CLOSE}")
}

/// One marker found in generated text. Offsets are byte offsets into that text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceToken {
    pub raw: String,
    /// `None` when the marker body is not a chunk sequence number.
    pub sequence: Option<u32>,
    pub start: usize,
    pub end: usize,
}

pub fn parse_references(text: &str) -> Vec<ReferenceToken> {
    let mut out = Vec::new();
    let mut from = 0usize;
    while let Some(pos) = text[from..].find(OPEN) {
        let start = from + pos;
        let body_start = start + OPEN.len();
        let Some(close) = text[body_start..].find(CLOSE) else {
            break;
        };
        let body = &text[body_start..body_start + close];
        if body.contains('[') {
            // Unterminated marker followed by another one; resume at the inner opener.
            from = body_start;
            continue;
        }
        let end = body_start + close + CLOSE.len();
        out.push(ReferenceToken {
            raw: text[start..end].to_string(),
            sequence: body.trim().parse::<u32>().ok(),
            start,
            end,
        });
        from = end;
    }
    out
}

/// Remove the markers for which `keep` is false, with the space before each.
pub fn strip_references<F>(text: &str, keep: F) -> String
where
    F: Fn(&ReferenceToken) -> bool,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0usize;
    for token in parse_references(text) {
        if keep(&token) {
            continue;
        }
        out.push_str(&text[last..token.start]);
        let next = text[token.end..].chars().next();
        if out.ends_with(' ') && next.map_or(true, |c| c.is_whitespace() || c.is_ascii_punctuation()) {
            out.pop();
        }
        last = token.end;
    }
    out.push_str(&text[last..]);
    out
}

/// A claim-sized piece of an answer and the sequence numbers cited for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub references: Vec<u32>,
}

/// Split an answer into sentences (per line), attaching markers that trail a
/// sentence terminator to that sentence.
pub fn split_segments(text: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    for line in text.lines() {
        for (start, end) in sentence_ranges(line) {
            push_segment(&mut out, &line[start..end]);
        }
    }
    out
}

/// Remove sentences that carry markers but none accepted by `keep`.
///
/// Returns the remaining text (markers untouched) and the removed sentences.
/// Sentences without any marker are left alone.
pub fn drop_unsupported_sentences<F>(text: &str, keep: F) -> (String, Vec<String>)
where
    F: Fn(&ReferenceToken) -> bool,
{
    let mut lines = Vec::new();
    let mut dropped = Vec::new();
    for line in text.lines() {
        let mut kept = String::with_capacity(line.len());
        let mut removed_any = false;
        for (start, end) in sentence_ranges(line) {
            let sentence = &line[start..end];
            let tokens = parse_references(sentence);
            if !tokens.is_empty() && !tokens.iter().any(|t| keep(t)) && is_substantive(sentence) {
                dropped.push(sentence.trim().to_string());
                removed_any = true;
                continue;
            }
            kept.push_str(sentence);
        }
        if removed_any {
            let kept = kept.trim();
            if !kept.is_empty() {
                lines.push(kept.to_string());
            }
        } else {
            lines.push(line.to_string());
        }
    }
    (lines.join("\n"), dropped)
}

/// Byte ranges of the sentences in one line. Ranges are contiguous and cover
/// the whole line; leading whitespace belongs to the following sentence.
fn sentence_ranges(line: &str) -> Vec<(usize, usize)> {
    let tokens = parse_references(line);
    let in_token = |i: usize| tokens.iter().any(|t| i >= t.start && i < t.end);

    let mut out = Vec::new();
    let mut seg_start = 0usize;
    let mut iter = line.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        if !matches!(c, '.' | '!' | '?') || in_token(i) {
            continue;
        }
        let after = i + c.len_utf8();
        let at_break = iter.peek().map_or(true, |&(_, n)| n.is_whitespace());
        if !at_break {
            continue;
        }
        let end = extend_over_markers(line, after);
        out.push((seg_start, end));
        seg_start = end;
        while iter.peek().is_some_and(|&(j, _)| j < end) {
            iter.next();
        }
    }
    if seg_start < line.len() {
        out.push((seg_start, line.len()));
    }
    out
}

/// Skip whitespace-separated markers (and punctuation closing them) after `pos`.
fn extend_over_markers(line: &str, pos: usize) -> usize {
    let mut end = pos;
    loop {
        let rest = &line[end..];
        let trimmed = rest.trim_start();
        if !trimmed.starts_with(OPEN) {
            return end;
        }
        let skipped = rest.len() - trimmed.len();
        match trimmed.find(CLOSE) {
            Some(close) => {
                end += skipped + close + CLOSE.len();
                let tail = &line[end..];
                let punct = tail.len() - tail.trim_start_matches(&['.', '!', '?', ',', ';'][..]).len();
                end += punct;
            }
            None => return end,
        }
    }
}

fn push_segment(out: &mut Vec<Segment>, raw: &str) {
    let text = raw.trim();
    if text.is_empty() {
        return;
    }
    let mut references: Vec<u32> = parse_references(text)
        .into_iter()
        .filter_map(|t| t.sequence)
        .collect();
    references.sort_unstable();
    references.dedup();
    out.push(Segment {
        text: text.to_string(),
        references,
    });
}

const NON_ANSWERS: [&str; 8] = [
    "insufficient evidence",
    "insufficient information",
    "insufficient information in the document",
    "not enough information",
    "unknown",
    "i don't know",
    "i do not know",
    "the document does not say",
];

/// Whether the text (markers removed) asserts anything beyond declining to answer.
pub fn is_substantive(text: &str) -> bool {
    let stripped = strip_references(text, |_| false);
    let lowered = stripped.to_lowercase().replace('_', " ");
    if lowered.contains("insufficient evidence") {
        return false;
    }
    let normalized = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '\'')
        .collect::<String>();
    let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    !normalized.is_empty() && !NON_ANSWERS.contains(&normalized.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_valid_and_malformed_markers() {
        let text = "A [[chunk:1]] b [[chunk: 22 ]] c [[chunk:abc]] d [[chunk:3";
        let refs = parse_references(text);
        let seqs: Vec<Option<u32>> = refs.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![Some(1), Some(22), None]);
        assert_eq!(&text[refs[0].start..refs[0].end], "[[chunk:1]]");
    }

    #[test]
    fn nested_opener_resumes_at_inner_marker() {
        let refs = parse_references("x [[chunk:[[chunk:5]] y");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].sequence, Some(5));
    }

    #[test]
    fn strips_rejected_markers_only() {
        let text = "Grass is green [[chunk:0]] [[chunk:9]]. Sky [[chunk:9]] is blue.";
        let out = strip_references(text, |t| t.sequence == Some(0));
        assert_eq!(out, "Grass is green [[chunk:0]]. Sky is blue.");
    }

    #[test]
    fn segments_keep_trailing_markers() {
        let text = "Grass is green. [[chunk:0]] The sky is blue [[chunk:1]].\nPi is 3.14 here!";
        let segs = split_segments(text);
        assert_eq!(
            segs,
            vec![
                Segment {
                    text: "Grass is green. [[chunk:0]]".to_string(),
                    references: vec![0],
                },
                Segment {
                    text: "The sky is blue [[chunk:1]].".to_string(),
                    references: vec![1],
                },
                Segment {
                    text: "Pi is 3.14 here!".to_string(),
                    references: vec![],
                },
            ]
        );
    }

    #[test]
    fn drops_sentences_whose_markers_were_all_rejected() {
        let text = "Grass is green [[chunk:0]]. Paris is the capital of France [[chunk:9]].\n\
                    Both hold [[chunk:0]] [[chunk:9]]. No marker here.\n\
                    Only invented [[chunk:7]].";
        let (kept, dropped) = drop_unsupported_sentences(text, |t| t.sequence == Some(0));
        assert_eq!(
            kept,
            "Grass is green [[chunk:0]].\nBoth hold [[chunk:0]] [[chunk:9]]. No marker here."
        );
        assert_eq!(
            dropped,
            vec![
                "Paris is the capital of France [[chunk:9]].".to_string(),
                "Only invented [[chunk:7]].".to_string(),
            ]
        );

        let untouched = "Sky [[chunk:0]] is blue.\n  - indented [[chunk:0]]";
        let (kept, dropped) = drop_unsupported_sentences(untouched, |t| t.sequence == Some(0));
        assert_eq!(kept, untouched);
        assert!(dropped.is_empty());
    }

    #[test]
    fn substantive_ignores_refusals_and_bare_markers() {
        assert!(is_substantive("Grass is green [[chunk:0]]."));
        assert!(!is_substantive("INSUFFICIENT_EVIDENCE"));
        assert!(!is_substantive("Unknown."));
        assert!(!is_substantive("[[chunk:3]]"));
        assert!(!is_substantive("  "));
    }
}
