/// Maximum token length to store in the index.
/// Longer runs are usually encoded blobs or URLs and are not searchable text.
pub const MAX_TOKEN_LENGTH: usize = 128;

/// Punctuation that may appear inside a token without splitting it
const IN_TOKEN_CHARS: [char; 3] = ['`', '\'', '_'];

/// A token cut out of a text fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawToken {
    /// Lowercased token text
    pub term: String,
    /// Byte offset of the token start inside the fragment
    pub offset: usize,
    /// Sentence number, counted across fragments of one document
    pub sentence: u16,
    /// Position of the token inside its sentence
    pub order: u16,
}

/// Sentence bookkeeping carried from one fragment of a document to the next.
#[derive(Debug, Clone, Default)]
pub struct SentenceState {
    sentence: u16,
    order: u16,
    pending_break: bool,
    newline_run: u8,
}

impl SentenceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the current sentence; the next token opens a new one
    pub fn end_sentence(&mut self) {
        self.pending_break = true;
    }

    pub fn sentence(&self) -> u16 {
        self.sentence
    }

    fn open_token(&mut self) -> (u16, u16) {
        if self.pending_break && self.order > 0 {
            self.sentence = self.sentence.saturating_add(1);
            self.order = 0;
        }
        self.pending_break = false;
        self.newline_run = 0;
        let position = (self.sentence, self.order);
        self.order = self.order.saturating_add(1);
        position
    }

    fn observe_separator(&mut self, ch: char, next: Option<char>) {
        match ch {
            '\n' => {
                self.newline_run = self.newline_run.saturating_add(1);
                if self.newline_run >= 2 {
                    self.pending_break = true;
                }
            }
            ' ' | '\t' | '\r' => {}
            '.' | '!' | '?' => {
                self.newline_run = 0;
                if next.is_none_or(char::is_whitespace) {
                    self.pending_break = true;
                }
            }
            _ => self.newline_run = 0,
        }
    }
}

#[inline]
fn starts_token(ch: char) -> bool {
    ch.is_alphanumeric()
}

#[inline]
fn continues_token(ch: char) -> bool {
    ch.is_alphanumeric() || IN_TOKEN_CHARS.contains(&ch)
}

/// Split a fragment into lowercased tokens with sentence positions.
///
/// Letters and digits form tokens, together with the in-token punctuation
/// allow-list. Everything else separates tokens. `.`, `!` and `?` followed by
/// whitespace end a sentence; a run of two or more newlines ends a paragraph,
/// which also ends the sentence. A single newline is plain whitespace.
pub fn tokenize(text: &str, state: &mut SentenceState) -> Vec<RawToken> {
    let mut tokens = Vec::with_capacity(text.len() / 6);
    let mut chars = text.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        if !starts_token(ch) {
            let next = chars.peek().map(|&(_, c)| c);
            state.observe_separator(ch, next);
            continue;
        }

        let mut end = start + ch.len_utf8();
        while let Some(&(i, c)) = chars.peek() {
            if !continues_token(c) {
                break;
            }
            end = i + c.len_utf8();
            chars.next();
        }

        let slice = text[start..end].trim_end_matches(|c: char| IN_TOKEN_CHARS.contains(&c));
        if slice.len() > MAX_TOKEN_LENGTH {
            continue;
        }

        let (sentence, order) = state.open_token();
        tokens.push(RawToken {
            term: slice.to_lowercase(),
            offset: start,
            sentence,
            order,
        });
    }

    tokens
}

/// Tokenize a query word, ignoring sentence structure
pub fn tokenize_query(word: &str) -> Vec<String> {
    let mut state = SentenceState::new();
    tokenize(word, &mut state)
        .into_iter()
        .map(|t| t.term)
        .collect()
}

/// Byte length of the token starting at `offset`, or 0 when no token starts there
pub fn token_extent(text: &str, offset: usize) -> usize {
    if offset >= text.len() || !text.is_char_boundary(offset) {
        return 0;
    }
    let rest = &text[offset..];
    match rest.chars().next() {
        Some(ch) if starts_token(ch) => {}
        _ => return 0,
    }

    let end = rest
        .char_indices()
        .find(|&(_, c)| !continues_token(c))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    rest[..end]
        .trim_end_matches(|c: char| IN_TOKEN_CHARS.contains(&c))
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(text: &str) -> Vec<String> {
        tokenize(text, &mut SentenceState::new())
            .into_iter()
            .map(|t| t.term)
            .collect()
    }

    #[test]
    fn test_dot_splits_tokens() {
        assert_eq!(
            terms("token1.token2. token3 token4.token5. "),
            vec!["token1", "token2", "token3", "token4", "token5"]
        );
    }

    #[test]
    fn test_lowercase_and_offsets() {
        let tokens = tokenize("Omea  OmniaMea", &mut SentenceState::new());
        assert_eq!(tokens[0].term, "omea");
        assert_eq!(tokens[0].offset, 0);
        assert_eq!(tokens[1].term, "omniamea");
        assert_eq!(tokens[1].offset, 6);
    }

    #[test]
    fn test_in_token_punctuation() {
        assert_eq!(terms("don't split `tick`s"), vec!["don't", "split", "tick`s"]);
        assert_eq!(terms("snake_case rock&roll"), vec!["snake_case", "rock", "roll"]);
        assert_eq!(terms("'quoted'"), vec!["quoted"]);
    }

    #[test]
    fn test_sentences() {
        let tokens = tokenize("one two. three! four", &mut SentenceState::new());
        let positions: Vec<_> = tokens.iter().map(|t| (t.sentence, t.order)).collect();
        assert_eq!(positions, vec![(0, 0), (0, 1), (1, 0), (2, 0)]);
    }

    #[test]
    fn test_single_newline_keeps_sentence() {
        let tokens = tokenize("one\ntwo", &mut SentenceState::new());
        assert_eq!(tokens[1].sentence, 0);
        assert_eq!(tokens[1].order, 1);
    }

    #[test]
    fn test_paragraph_break() {
        let tokens = tokenize("one two\n\nthree fourplay", &mut SentenceState::new());
        assert_eq!(tokens[1].sentence, 0);
        assert_eq!(tokens[2].sentence, 1);
        assert_eq!(tokens[2].order, 0);

        let tokens = tokenize("one\r\n \r\ntwo", &mut SentenceState::new());
        assert_eq!(tokens[1].sentence, 1);
    }

    #[test]
    fn test_state_carries_across_fragments() {
        let mut state = SentenceState::new();
        tokenize("token1 token2.", &mut state);
        let tokens = tokenize(" token3", &mut state);
        assert_eq!(tokens[0].sentence, 1);
        assert_eq!(tokens[0].order, 0);
    }

    #[test]
    fn test_overlong_tokens_skipped() {
        let long = "x".repeat(MAX_TOKEN_LENGTH + 1);
        assert_eq!(terms(&format!("a {} b", long)), vec!["a", "b"]);
    }

    #[test]
    fn test_token_extent() {
        let text = "see Omea's page";
        assert_eq!(token_extent(text, 4), 6);
        assert_eq!(token_extent(text, 3), 0);
        assert_eq!(token_extent(text, 11), 4);
        assert_eq!(token_extent(text, 100), 0);
    }
}
