use crate::index::sections::SectionRegistry;
use crate::index::types::SectionId;
use crate::utils::tokenize_query;
use std::fmt;

/// One step of a postfix query program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Push the postings of lexeme `n`
    Term(usize),
    /// Push the union of every spelling starting with lexeme `n` (stored with
    /// its trailing `*`)
    Wildcard(usize),
    /// Push documents holding lexemes `first..first + len` contiguously
    Phrase { first: usize, len: usize },
    And,
    Or,
    Near,
    /// Restrict the top of the stack to one section
    Section(SectionId),
}

/// Lexemes a query may hold; offsets carry their lexeme index in 16 bits
pub const MAX_LEXEMES: usize = u16::MAX as usize;

/// Parsed query: postfix instructions over a lexeme table.
///
/// Built once by [`parse_query`] and evaluated any number of times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostfixForm {
    pub instructions: Vec<Instruction>,
    pub lexemes: Vec<String>,
}

impl PostfixForm {
    fn push_lexeme(&mut self, lexeme: String) -> usize {
        self.lexemes.push(lexeme);
        self.lexemes.len() - 1
    }
}

impl fmt::Display for PostfixForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, instruction) in self.instructions.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match *instruction {
                Instruction::Term(n) | Instruction::Wildcard(n) => f.write_str(&self.lexemes[n])?,
                Instruction::Phrase { first, len } => {
                    write!(f, "\"{}\"", self.lexemes[first..first + len].join(" "))?
                }
                Instruction::And => f.write_str("AND")?,
                Instruction::Or => f.write_str("OR")?,
                Instruction::Near => f.write_str("NEAR")?,
                Instruction::Section(id) => write!(f, "[#{}]", id)?,
            }
        }
        Ok(())
    }
}

/// Parse a query string into postfix form.
///
/// ```text
/// query   := or
/// or      := and ( "or" and )*
/// and     := near ( ["and"] near )*
/// near    := unary ( "near" unary )*
/// unary   := primary ( "[" CODE "]" )*
/// primary := WORD | WORD "*" | '"' WORD+ '"' | "(" query ")"
/// ```
///
/// Returns `None` for malformed input: unbalanced parentheses or quotes, a
/// missing operand, or an unknown section code.
pub fn parse_query(input: &str, sections: &SectionRegistry) -> Option<PostfixForm> {
    let mut parser = QueryParser::new(input, sections);
    parser.parse()
}

/// Query parser
struct QueryParser<'a> {
    input: &'a str,
    pos: usize,
    sections: &'a SectionRegistry,
    form: PostfixForm,
}

impl<'a> QueryParser<'a> {
    fn new(input: &'a str, sections: &'a SectionRegistry) -> Self {
        Self {
            input,
            pos: 0,
            sections,
            form: PostfixForm::default(),
        }
    }

    fn parse(&mut self) -> Option<PostfixForm> {
        self.skip_whitespace();
        if self.is_eof() {
            return None;
        }
        self.parse_or()?;
        self.skip_whitespace();
        if !self.is_eof() {
            // Stray ')' or similar
            return None;
        }
        if self.form.lexemes.len() > MAX_LEXEMES {
            return None;
        }
        Some(std::mem::take(&mut self.form))
    }

    fn parse_or(&mut self) -> Option<()> {
        self.parse_and()?;
        while self.consume_keyword("or") {
            self.parse_and()?;
            self.emit(Instruction::Or);
        }
        Some(())
    }

    fn parse_and(&mut self) -> Option<()> {
        self.parse_near()?;
        loop {
            self.skip_whitespace();
            if self.is_eof() || self.peek_char() == Some(')') || self.at_keyword("or") {
                break;
            }
            self.consume_keyword("and");
            self.parse_near()?;
            self.emit(Instruction::And);
        }
        Some(())
    }

    fn parse_near(&mut self) -> Option<()> {
        self.parse_unary()?;
        while self.consume_keyword("near") {
            self.parse_unary()?;
            self.emit(Instruction::Near);
        }
        Some(())
    }

    fn parse_unary(&mut self) -> Option<()> {
        self.parse_primary()?;
        loop {
            self.skip_whitespace();
            if !self.consume_char('[') {
                return Some(());
            }
            let start = self.pos;
            while !self.is_eof() && self.peek_char() != Some(']') {
                self.advance();
            }
            let code = self.input[start..self.pos].trim();
            if !self.consume_char(']') {
                return None;
            }
            let section = self.sections.by_code(code)?;
            self.emit(Instruction::Section(section.id));
        }
    }

    fn parse_primary(&mut self) -> Option<()> {
        loop {
            self.skip_whitespace();
            if self.is_eof() || self.at_operator_keyword() {
                return None;
            }

            // Parenthesized expression
            if self.consume_char('(') {
                self.parse_or()?;
                self.skip_whitespace();
                return if self.consume_char(')') { Some(()) } else { None };
            }

            // Quoted phrase
            if self.peek_char() == Some('"') {
                return self.parse_phrase();
            }

            match self.peek_char() {
                Some(')') | Some('[') | Some(']') => return None,
                _ => {}
            }

            // A word made of separators only is skipped
            if self.parse_word()? {
                return Some(());
            }
        }
    }

    fn parse_phrase(&mut self) -> Option<()> {
        self.consume_char('"');
        let start = self.pos;

        while !self.is_eof() && self.peek_char() != Some('"') {
            self.advance();
        }

        let phrase = &self.input[start..self.pos];
        if !self.consume_char('"') {
            return None;
        }

        let tokens = tokenize_query(phrase);
        if tokens.is_empty() {
            return None;
        }
        self.emit_tokens(tokens);
        Some(())
    }

    /// Returns `Some(false)` when the word holds no token
    fn parse_word(&mut self) -> Option<bool> {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | '[' | ']') {
                break;
            }
            self.advance();
        }

        let word = &self.input[start..self.pos];
        let wildcard = word.ends_with('*');
        let mut tokens = tokenize_query(word.trim_end_matches('*'));
        if tokens.is_empty() {
            return Some(false);
        }

        if !wildcard {
            self.emit_tokens(tokens);
            return Some(true);
        }

        // `e-ma*` reads as `e AND ma*`
        let prefix = tokens.pop()?;
        let leading = !tokens.is_empty();
        if leading {
            self.emit_tokens(tokens);
        }
        let n = self.form.push_lexeme(format!("{}*", prefix));
        self.emit(Instruction::Wildcard(n));
        if leading {
            self.emit(Instruction::And);
        }
        Some(true)
    }

    /// A single token becomes a term, several become a phrase
    fn emit_tokens(&mut self, tokens: Vec<String>) {
        if tokens.len() == 1 {
            let n = self.form.push_lexeme(tokens.into_iter().next().unwrap_or_default());
            self.emit(Instruction::Term(n));
            return;
        }
        let first = self.form.lexemes.len();
        let len = tokens.len();
        self.form.lexemes.extend(tokens);
        self.emit(Instruction::Phrase { first, len });
    }

    fn emit(&mut self, instruction: Instruction) {
        self.form.instructions.push(instruction);
    }

    fn at_operator_keyword(&self) -> bool {
        self.at_keyword("or") || self.at_keyword("and") || self.at_keyword("near")
    }

    /// Keyword match: case-insensitive and followed by a word boundary
    fn at_keyword(&self, keyword: &str) -> bool {
        let rest = self.remaining();
        if rest.len() < keyword.len() || !rest.is_char_boundary(keyword.len()) {
            return false;
        }
        if !rest[..keyword.len()].eq_ignore_ascii_case(keyword) {
            return false;
        }
        match rest[keyword.len()..].chars().next() {
            None => true,
            Some(ch) => ch.is_whitespace() || matches!(ch, '(' | ')' | '"'),
        }
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        if self.at_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while !self.is_eof() && self.peek_char().map(|c| c.is_whitespace()).unwrap_or(false) {
            self.advance();
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn consume_char(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) {
        if let Some(ch) = self.peek_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn remaining(&self) -> &str {
        &self.input[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Instruction::*;

    fn parse(input: &str) -> Option<PostfixForm> {
        parse_query(input, &SectionRegistry::default())
    }

    #[test]
    fn test_simple_query() {
        let q = parse("Hello").unwrap();
        assert_eq!(q.instructions, vec![Term(0)]);
        assert_eq!(q.lexemes, vec!["hello"]);
    }

    #[test]
    fn test_implicit_and() {
        let q = parse("token2 token1").unwrap();
        assert_eq!(q.instructions, vec![Term(0), Term(1), And]);
        let explicit = parse("token2 AND token1").unwrap();
        assert_eq!(explicit, q);
    }

    #[test]
    fn test_or_binds_loosest() {
        let q = parse("a b or c").unwrap();
        assert_eq!(q.instructions, vec![Term(0), Term(1), And, Term(2), Or]);
        assert_eq!(q.to_string(), "a b AND c OR");
    }

    #[test]
    fn test_near_binds_tighter_than_and() {
        let q = parse("a b near c").unwrap();
        assert_eq!(q.instructions, vec![Term(0), Term(1), Term(2), Near, And]);
    }

    #[test]
    fn test_parentheses() {
        let q = parse("(a or b) c").unwrap();
        assert_eq!(q.instructions, vec![Term(0), Term(1), Or, Term(2), And]);
    }

    #[test]
    fn test_phrase_query() {
        let q = parse("\"Token1 token2 token3\"").unwrap();
        assert_eq!(q.instructions, vec![Phrase { first: 0, len: 3 }]);
        assert_eq!(q.to_string(), "\"token1 token2 token3\"");
    }

    #[test]
    fn test_single_word_phrase_is_term() {
        assert_eq!(parse("\"word\"").unwrap().instructions, vec![Term(0)]);
    }

    #[test]
    fn test_split_word_becomes_phrase() {
        let q = parse("token1.token2").unwrap();
        assert_eq!(q.instructions, vec![Phrase { first: 0, len: 2 }]);
    }

    #[test]
    fn test_wildcard() {
        let q = parse("Om*").unwrap();
        assert_eq!(q.instructions, vec![Wildcard(0)]);
        assert_eq!(q.lexemes, vec!["om*"]);

        let q = parse("e-ma*").unwrap();
        assert_eq!(q.instructions, vec![Term(0), Wildcard(1), And]);
    }

    #[test]
    fn test_section_filter() {
        let q = parse("fourplay [SU]").unwrap();
        assert_eq!(q.instructions, vec![Term(0), Section(1)]);
        let q = parse("(a b)[bo]").unwrap();
        assert_eq!(q.instructions, vec![Term(0), Term(1), And, Section(0)]);
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let q = parse("a OR b Near c").unwrap();
        assert_eq!(q.instructions, vec![Term(0), Term(1), Term(2), Near, Or]);
        // Words that merely start with a keyword are terms
        let q = parse("order nearby").unwrap();
        assert_eq!(q.lexemes, vec!["order", "nearby"]);
    }

    #[test]
    fn test_separator_words_are_skipped() {
        let q = parse("rock & roll").unwrap();
        assert_eq!(q.instructions, vec![Term(0), Term(1), And]);
    }

    #[test]
    fn test_malformed_queries() {
        for input in [
            "",
            "   ",
            "(a b",
            "a b)",
            "\"open phrase",
            "a or",
            "or a",
            "a near",
            "a [XX]",
            "a [SU",
            "&&",
            "\"&\"",
            "()",
            "(a or)",
            "(a and)",
            "(a near)",
            "(a b or)",
        ] {
            assert!(parse(input).is_none(), "expected None for {:?}", input);
        }
    }

    #[test]
    fn test_lexeme_limit() {
        let at_limit = "a ".repeat(MAX_LEXEMES);
        assert_eq!(parse(&at_limit).unwrap().lexemes.len(), MAX_LEXEMES);

        let over_limit = "a ".repeat(MAX_LEXEMES + 1);
        assert!(parse(&over_limit).is_none());
    }

    #[test]
    fn test_duplicate_terms_get_distinct_lexemes() {
        let q = parse("a a").unwrap();
        assert_eq!(q.lexemes, vec!["a", "a"]);
        assert_eq!(q.instructions, vec![Term(0), Term(1), And]);
    }
}
