//! Snippet extraction around query matches.

use crate::index::types::Entry;
use crate::utils::{SentenceState, token_extent, tokenize};
use memchr::memrchr2;

/// Highlighted span inside a snippet (byte offsets relative to the snippet)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Highlight {
    pub start: usize,
    pub len: usize,
}

/// Produce a snippet of at most `max_len` bytes around the first match of
/// `entry` in `text`, with the spans of every match inside it.
///
/// Offsets that do not point at a query lexeme in `text` are ignored; when
/// none does, the text itself is scanned for the lexemes. Without any match
/// the head of the text is returned.
pub fn get_context(entry: &Entry, lexemes: &[String], text: &str, max_len: usize) -> (String, Vec<Highlight>) {
    if text.is_empty() || max_len == 0 {
        return (String::new(), Vec::new());
    }

    let mut spans = spans_from_offsets(entry, lexemes, text);
    if spans.is_empty() {
        spans = spans_from_scan(lexemes, text);
    }

    let Some(&(first, _)) = spans.first() else {
        let end = floor_char_boundary(text, max_len.min(text.len()));
        return (clean(&text[..end]), Vec::new());
    };

    let start = snippet_start(text, first, max_len);
    let end = floor_char_boundary(text, (start + max_len).min(text.len()));

    let highlights = spans
        .into_iter()
        .filter(|&(pos, _)| pos >= start && pos < end)
        .map(|(pos, len)| Highlight {
            start: pos - start,
            len: len.min(end - pos),
        })
        .collect();

    (clean(&text[start..end]), highlights)
}

fn lexeme_matches(lexeme: &str, token: &str) -> bool {
    match lexeme.strip_suffix('*') {
        Some(prefix) => token.starts_with(prefix),
        None => token == lexeme,
    }
}

fn spans_from_offsets(entry: &Entry, lexemes: &[String], text: &str) -> Vec<(usize, usize)> {
    let mut spans: Vec<(usize, usize)> = entry
        .offsets
        .iter()
        .filter_map(|o| {
            let pos = o.offset_normal() as usize;
            let len = token_extent(text, pos);
            if len == 0 {
                return None;
            }
            let token = text[pos..pos + len].to_lowercase();
            let named = lexemes
                .get(o.base_id as usize)
                .is_some_and(|lexeme| lexeme_matches(lexeme, &token));
            let wildcard = lexemes
                .iter()
                .any(|lexeme| lexeme.ends_with('*') && lexeme_matches(lexeme, &token));
            (named || wildcard).then_some((pos, len))
        })
        .collect();
    spans.sort_unstable();
    spans.dedup();
    spans
}

fn spans_from_scan(lexemes: &[String], text: &str) -> Vec<(usize, usize)> {
    tokenize(text, &mut SentenceState::new())
        .into_iter()
        .filter(|t| lexemes.iter().any(|lexeme| lexeme_matches(lexeme, &t.term)))
        .map(|t| (t.offset, token_extent(text, t.offset)))
        .filter(|&(_, len)| len > 0)
        .collect()
}

/// Start a short lead before the match, at the beginning of a word
fn snippet_start(text: &str, first: usize, max_len: usize) -> usize {
    let lead = max_len / 4;
    let start = floor_char_boundary(text, first.saturating_sub(lead));
    if start == 0 {
        return 0;
    }
    match memrchr2(b' ', b'\n', &text.as_bytes()[..start]) {
        // Snapping back must not push the match out of the window
        Some(space) if first - (space + 1) <= max_len / 2 => space + 1,
        Some(_) => start,
        None if first <= max_len / 2 => 0,
        None => start,
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Flatten line breaks and tabs; every replaced char is one byte, so spans stay valid
fn clean(snippet: &str) -> String {
    snippet.replace(['\n', '\r', '\t'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::types::InstanceOffset;

    fn entry_at(positions: &[(u32, u16)]) -> Entry {
        let offsets = positions
            .iter()
            .map(|&(pos, base)| {
                let mut o = InstanceOffset::new(pos, 0, 0, 0);
                o.base_id = base;
                o
            })
            .collect();
        Entry::new(0, 1.0, offsets)
    }

    fn lexemes(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_highlights_are_relative_to_snippet() {
        let text = "Some words before the Omea match and more after";
        let (snippet, highlights) = get_context(&entry_at(&[(22, 0)]), &lexemes(&["omea"]), text, 24);
        assert_eq!(highlights.len(), 1);
        let h = highlights[0];
        assert_eq!(&snippet[h.start..h.start + h.len], "Omea");
        assert!(snippet.len() <= 24);
    }

    #[test]
    fn test_match_at_end_stays_in_bounds() {
        let text = "a long prefix of filler text ending with target";
        let pos = text.len() - "target".len();
        let (snippet, highlights) =
            get_context(&entry_at(&[(pos as u32, 0)]), &lexemes(&["target"]), text, 20);
        assert!(snippet.ends_with("target"));
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].start + highlights[0].len, snippet.len());
    }

    #[test]
    fn test_offsets_past_text_are_ignored() {
        let text = "short";
        let (snippet, highlights) = get_context(&entry_at(&[(400, 0)]), &lexemes(&["missing"]), text, 50);
        assert_eq!(snippet, "short");
        assert!(highlights.is_empty());
    }

    #[test]
    fn test_wildcard_and_scan_fallback() {
        let text = "Omea and\nomniamea";
        // Offsets belong to another fragment; the text is scanned instead
        let (snippet, highlights) = get_context(&entry_at(&[(900, 0)]), &lexemes(&["om*"]), text, 100);
        assert_eq!(snippet, "Omea and omniamea");
        assert_eq!(highlights, vec![Highlight { start: 0, len: 4 }, Highlight { start: 9, len: 8 }]);
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "ééééé ééééé über ééééé";
        let pos = text.find("über").unwrap();
        let (snippet, highlights) =
            get_context(&entry_at(&[(pos as u32, 0)]), &lexemes(&["über"]), text, 9);
        let h = highlights[0];
        assert_eq!(&snippet[h.start..h.start + h.len], "über");
    }
}
