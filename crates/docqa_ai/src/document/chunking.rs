//! Sliding-window chunking with boundary snapping.
//!
//! The window advances by `target_size - overlap`. Each window edge moves to the
//! nearest sentence, paragraph or page boundary within `boundary_window`
//! characters; with no boundary in range the hard character position is used, so
//! the function is total. Offsets are character (Unicode scalar) offsets into the
//! normalized text.

use docqa_core::config::ChunkingConfig;
use docqa_core::error::AppError;

use super::model::ChunkDraft;
use crate::extract::PageSpan;

const SENTENCE_END: [char; 3] = ['.', '!', '?'];
const CLOSERS: [char; 7] = ['"', '\'', ')', ']', '\u{201d}', '\u{2019}', '\u{bb}'];

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, AppError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn chunk_text(&self, text: &str) -> Vec<ChunkDraft> {
        self.chunk(text, &[])
    }

    pub fn chunk(&self, text: &str, pages: &[PageSpan]) -> Vec<ChunkDraft> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        if n == 0 {
            return Vec::new();
        }

        let cfg = &self.config;
        let boundaries = boundaries(&chars, pages);
        let mut out = Vec::new();
        let mut start = 0usize;

        loop {
            let mut end = if n - start <= cfg.target_size {
                n
            } else {
                let hard_end = start + cfg.target_size;
                snap(&boundaries, hard_end, cfg.boundary_window, start + cfg.overlap, n)
                    .unwrap_or(hard_end)
            };
            if n - end < cfg.min_chunk_size {
                end = n;
            }

            out.push(ChunkDraft {
                sequence: out.len() as u32,
                start,
                end,
                page_number: page_for(pages, start),
                text: chars[start..end].iter().collect(),
            });
            if end == n {
                break;
            }

            start = if cfg.overlap == 0 {
                end
            } else {
                let back = end - cfg.overlap;
                snap(&boundaries, back, cfg.boundary_window, start, end).unwrap_or(back)
            };
        }

        out
    }
}

/// Positions where a chunk may start or end, ascending and unique.
fn boundaries(chars: &[char], pages: &[PageSpan]) -> Vec<usize> {
    let n = chars.len();
    let skip_ws = |mut j: usize| {
        while j < n && chars[j].is_whitespace() {
            j += 1;
        }
        j
    };

    let mut out = Vec::new();
    for i in 0..n {
        let c = chars[i];
        if SENTENCE_END.contains(&c) {
            let mut j = i + 1;
            while j < n && CLOSERS.contains(&chars[j]) {
                j += 1;
            }
            if j == n {
                out.push(n);
            } else if chars[j].is_whitespace() {
                out.push(skip_ws(j));
            }
        } else if c == '\n' && i + 1 < n && chars[i + 1] == '\n' {
            out.push(skip_ws(i));
        }
    }
    out.extend(pages.iter().map(|p| p.start).filter(|&s| s > 0 && s < n));
    out.sort_unstable();
    out.dedup();
    out
}

/// Nearest boundary to `target` within `window`, restricted to `(lo_excl, hi_incl]`.
/// Ties go to the earlier boundary.
fn snap(
    boundaries: &[usize],
    target: usize,
    window: usize,
    lo_excl: usize,
    hi_incl: usize,
) -> Option<usize> {
    let lo = target.saturating_sub(window).max(lo_excl + 1);
    let hi = target.saturating_add(window).min(hi_incl);
    if lo > hi {
        return None;
    }
    let from = boundaries.partition_point(|&b| b < lo);
    boundaries[from..]
        .iter()
        .copied()
        .take_while(|&b| b <= hi)
        .min_by_key(|&b| (b.abs_diff(target), b))
}

fn page_for(pages: &[PageSpan], offset: usize) -> Option<u32> {
    pages
        .iter()
        .take_while(|p| p.start <= offset)
        .last()
        .map(|p| p.page_number)
}
