//! Paragraph-boundary text chunker with position tracking.
//!
//! Splits document content into [`ChunkSpan`]s that respect a configurable
//! size limit. Splitting prefers paragraph boundaries (`\n\s*\n`) and falls
//! back to sentence boundaries inside oversize paragraphs, sliding an
//! overlapping window. Each span records half-open byte offsets into the
//! original content, so callers can expand windows for excerpt display.
//!
//! The algorithm is deterministic and pure: the same content and parameters
//! always produce the same spans.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::ChunkSpan;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

const SENTENCE_BOUNDARIES: [&str; 6] = [".\n", ". ", "!\n", "! ", "?\n", "? "];

fn paragraph_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").unwrap())
}

/// Largest `i <= at` that is a char boundary of `s`.
fn floor_char_boundary(s: &str, mut at: usize) -> usize {
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}

/// Find the best sentence boundary within `(start, end]` of `text`.
///
/// Separator kinds are tried in a fixed order; the rightmost occurrence of
/// the first kind that appears strictly after `start` wins. Falls back to
/// `end` (hard cut) when no separator is in range.
fn find_sentence_boundary(text: &str, start: usize, end: usize) -> usize {
    let window = &text[start..end];
    for sep in SENTENCE_BOUNDARIES {
        if let Some(rel) = window.rfind(sep) {
            if rel > 0 {
                return start + rel + sep.len();
            }
        }
    }
    end
}

/// Half-open byte ranges of the non-separator paragraphs of `content`.
fn paragraph_positions(content: &str) -> Vec<(usize, usize)> {
    let mut positions = Vec::new();
    let mut last_end = 0;

    for m in paragraph_separator().find_iter(content) {
        if m.start() > last_end {
            positions.push((last_end, m.start()));
        }
        last_end = m.end();
    }
    if last_end < content.len() {
        positions.push((last_end, content.len()));
    }
    if positions.is_empty() && !content.trim().is_empty() {
        positions.push((0, content.len()));
    }
    positions
}

/// Split `content` into chunks of at most `chunk_size` bytes, overlapping
/// oversize-paragraph windows by `chunk_overlap` bytes.
///
/// Whitespace-only content yields no chunks. Overlap values that would stall
/// the window are clamped so progress is strictly positive.
pub fn split_chunks(content: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<ChunkSpan> {
    fn flush(buf: &mut String, start: usize, end: usize, out: &mut Vec<ChunkSpan>) {
        if !buf.is_empty() {
            out.push(ChunkSpan {
                content: std::mem::take(buf),
                start_pos: start,
                end_pos: end,
            });
        }
    }

    let mut chunks: Vec<ChunkSpan> = Vec::new();

    let mut current = String::new();
    let mut current_start = 0usize;
    let mut current_end = 0usize;

    for (para_start, para_end) in paragraph_positions(content) {
        let raw = &content[para_start..para_end];
        let para = raw.trim();
        if para.is_empty() {
            continue;
        }
        let trim_start = para_start + (raw.len() - raw.trim_start().len());
        let trim_end = trim_start + para.len();

        if current.len() + para.len() + 2 <= chunk_size {
            if current.is_empty() {
                current_start = trim_start;
            } else {
                current.push_str("\n\n");
            }
            current.push_str(para);
            current_end = trim_end;
            continue;
        }

        flush(&mut current, current_start, current_end, &mut chunks);

        if para.len() <= chunk_size {
            current.push_str(para);
            current_start = trim_start;
            current_end = trim_end;
            continue;
        }

        // Oversize paragraph: slide an inner window, breaking at sentence
        // boundaries where possible.
        let mut inner_start = 0usize;
        while inner_start < para.len() {
            let mut inner_end = (inner_start + chunk_size).min(para.len());
            if inner_end < para.len() {
                inner_end = floor_char_boundary(para, inner_end);
                inner_end = find_sentence_boundary(para, inner_start, inner_end);
            }

            let piece = &para[inner_start..inner_end];
            if !piece.trim().is_empty() {
                chunks.push(ChunkSpan {
                    content: piece.to_string(),
                    start_pos: trim_start + inner_start,
                    end_pos: trim_start + inner_end,
                });
            }

            let mut next = floor_char_boundary(para, inner_end.saturating_sub(chunk_overlap));
            if next <= inner_start {
                next = inner_end;
            }
            inner_start = next;
        }
    }

    flush(&mut current, current_start, current_end, &mut chunks);

    // Degenerate case: non-empty content that produced no chunks.
    if chunks.is_empty() && !content.trim().is_empty() {
        let trimmed = content.trim();
        let start = content.len() - content.trim_start().len();
        chunks.push(ChunkSpan {
            content: trimmed.to_string(),
            start_pos: start,
            end_pos: start + trimmed.len(),
        });
    }

    chunks
}
