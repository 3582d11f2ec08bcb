//! The lexer: source text to a flat token stream.
//!
//! Comments (`/* ... */`, `//...\n`) are skipped transparently; `/*! ... !*/`
//! captures its contents verbatim as a raw-string literal with no escape
//! processing. String escapes recognise `\t \r \n \e \{ \}`; a bare
//! backslash before any other character passes that character through
//! unescaped rather than erroring, matching a permissive script-language
//! lexer rather than a strict one.

use std::collections::VecDeque;

use raven_core::RavenError;

use crate::token::{Token, TokenKind};

pub struct Lexer<'a> {
    path: String,
    src: &'a str,
    chars: std::vec::IntoIter<char>,
    lookahead: VecDeque<char>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(path: impl Into<String>, src: &'a str) -> Self {
        Lexer {
            path: path.into(),
            src,
            chars: src.chars().collect::<Vec<_>>().into_iter(),
            lookahead: VecDeque::new(),
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, RavenError> {
        let mut out = Vec::new();
        loop {
            let tok = self.scan_one()?;
            let done = tok.kind == TokenKind::Eof;
            out.push(tok);
            if done {
                break;
            }
        }
        Ok(out)
    }

    fn fill(&mut self, n: usize) {
        while self.lookahead.len() < n {
            match self.chars.next() {
                Some(c) => self.lookahead.push_back(c),
                None => break,
            }
        }
    }

    fn bump(&mut self) -> Option<char> {
        self.fill(1);
        let c = self.lookahead.pop_front();
        if let Some(c) = c {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        c
    }

    fn peek(&mut self) -> Option<char> {
        self.fill(1);
        self.lookahead.front().copied()
    }

    fn peek2(&mut self) -> Option<char> {
        self.fill(2);
        self.lookahead.get(1).copied()
    }

    fn err(&self, line: usize, column: usize, message: impl Into<String>) -> RavenError {
        let excerpt_line = self.src.lines().nth(line.saturating_sub(1)).unwrap_or("");
        let caret = format!("{}^", " ".repeat(column.saturating_sub(1)));
        RavenError::Syntax {
            path: self.path.clone(),
            line,
            column,
            message: message.into(),
            excerpt: format!("{excerpt_line}\n{caret}"),
        }
    }

    /// Skip whitespace and `//`/`/* */` comments. Returns `Some((line,
    /// column))` of the comment opener if it turns out to be a `/*!` raw
    /// string (with `/*` already consumed and `!` still unread) -- `scan_one`
    /// takes over from there, since a raw string is a real token, not trivia.
    fn skip_trivia(&mut self) -> Result<Option<(usize, usize)>, RavenError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek2() == Some('/') => {
                    self.bump();
                    self.bump();
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek2() == Some('*') => {
                    let line = self.line;
                    let column = self.column;
                    self.bump();
                    self.bump();
                    if self.peek() == Some('!') {
                        return Ok(Some((line, column)));
                    }
                    self.skip_block_comment(line, column)?;
                }
                _ => return Ok(None),
            }
        }
    }

    fn skip_block_comment(&mut self, start_line: usize, start_col: usize) -> Result<(), RavenError> {
        loop {
            match self.bump() {
                None => return Err(self.err(start_line, start_col, "unterminated block comment")),
                Some('*') if self.peek() == Some('/') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => {}
            }
        }
    }

    fn scan_one(&mut self) -> Result<Token, RavenError> {
        if let Some((line, column)) = self.skip_trivia()? {
            let raw = self.scan_raw_string(line, column)?;
            return Ok(Token { kind: TokenKind::RawStr(raw), line, column });
        }
        let line = self.line;
        let column = self.column;

        let c = match self.bump() {
            None => return Ok(Token::eof(line, column)),
            Some(c) => c,
        };

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ';' => TokenKind::Semi,
            ',' => TokenKind::Comma,
            '.' => {
                if self.peek() == Some('.') {
                    self.bump();
                    if self.peek() == Some('.') {
                        self.bump();
                        TokenKind::Ellipsis
                    } else {
                        return Err(self.err(line, column, "unexpected '..'"));
                    }
                } else {
                    TokenKind::Dot
                }
            }
            ':' => {
                if self.peek() == Some(':') {
                    self.bump();
                    TokenKind::ColonColon
                } else {
                    TokenKind::Colon
                }
            }
            '-' => {
                if self.peek() == Some('>') {
                    self.bump();
                    TokenKind::Arrow
                } else if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::MinusEq
                } else if self.peek() == Some('-') {
                    self.bump();
                    TokenKind::MinusMinus
                } else {
                    TokenKind::Minus
                }
            }
            '+' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::PlusEq
                } else if self.peek() == Some('+') {
                    self.bump();
                    TokenKind::PlusPlus
                } else {
                    TokenKind::Plus
                }
            }
            '*' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::StarEq
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::SlashEq
                } else {
                    TokenKind::Slash
                }
            }
            '%' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::PercentEq
                } else {
                    TokenKind::Percent
                }
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::EqEq
                } else if self.peek() == Some('>') {
                    self.bump();
                    TokenKind::FatArrow
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::BangEq
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::LtEq
                } else if self.peek() == Some('<') {
                    self.bump();
                    TokenKind::Shl
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    TokenKind::GtEq
                } else if self.peek() == Some('>') {
                    self.bump();
                    TokenKind::Shr
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.bump();
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.bump();
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                }
            }
            '?' => {
                if self.peek() == Some('?') {
                    self.bump();
                    TokenKind::QuestionQuestion
                } else {
                    TokenKind::Question
                }
            }
            '#' => {
                if self.peek() == Some('\'') {
                    self.bump();
                    let name = self.scan_until('\'', line, column)?;
                    TokenKind::SymbolLit(name)
                } else if self.peek() == Some(':') {
                    self.bump();
                    TokenKind::SymbolLit(self.scan_ident_text())
                } else {
                    TokenKind::Hash
                }
            }
            '"' => TokenKind::Str(self.scan_string(line, column)?),
            '\'' => TokenKind::Char(self.scan_char(line, column)?),
            _ if c.is_ascii_digit() => {
                let mut s = String::new();
                s.push(c);
                while let Some(d) = self.peek() {
                    if d.is_ascii_digit() {
                        s.push(d);
                        self.bump();
                    } else {
                        break;
                    }
                }
                let n: i64 = s.parse().map_err(|_| self.err(line, column, format!("invalid integer literal '{s}'")))?;
                TokenKind::Int(n)
            }
            _ if c == '_' || c.is_alphabetic() => {
                let mut s = String::new();
                s.push(c);
                s.push_str(&self.scan_ident_text());
                TokenKind::Ident(s)
            }
            other => return Err(self.err(line, column, format!("unexpected character '{other}'"))),
        };

        Ok(Token { kind, line, column })
    }

    fn scan_ident_text(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        s
    }

    fn scan_until(&mut self, terminator: char, line: usize, column: usize) -> Result<String, RavenError> {
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err(line, column, "unterminated literal")),
                Some(c) if c == terminator => return Ok(s),
                Some(c) => s.push(c),
            }
        }
    }

    fn scan_string(&mut self, line: usize, column: usize) -> Result<String, RavenError> {
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err(line, column, "unterminated string literal")),
                Some('"') => return Ok(s),
                Some('\\') => match self.bump() {
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some('n') => s.push('\n'),
                    Some('e') => s.push('\x1b'),
                    Some('{') => s.push('{'),
                    Some('}') => s.push('}'),
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some(other) => s.push(other),
                    None => return Err(self.err(line, column, "unterminated string literal")),
                },
                Some(c) => s.push(c),
            }
        }
    }

    fn scan_char(&mut self, line: usize, column: usize) -> Result<char, RavenError> {
        let c = match self.bump() {
            Some('\\') => match self.bump() {
                Some('t') => '\t',
                Some('r') => '\r',
                Some('n') => '\n',
                Some('e') => '\x1b',
                Some(other) => other,
                None => return Err(self.err(line, column, "unterminated char literal")),
            },
            Some(c) => c,
            None => return Err(self.err(line, column, "unterminated char literal")),
        };
        match self.bump() {
            Some('\'') => Ok(c),
            _ => Err(self.err(line, column, "expected closing \"'\"")),
        }
    }

    /// Scan the body of a `/*! ... !*/` raw string. Called with `/*` already
    /// consumed by `skip_trivia` and `!` still unread.
    fn scan_raw_string(&mut self, line: usize, column: usize) -> Result<String, RavenError> {
        self.bump(); // the '!' that distinguished this from a plain comment
        let mut s = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err(line, column, "unterminated raw string literal")),
                Some('!') if self.peek() == Some('*') && self.peek2() == Some('/') => {
                    self.bump();
                    self.bump();
                    return Ok(s);
                }
                Some(c) => s.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new("t.rv", src).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn skips_line_and_block_comments() {
        let ks = kinds("a // comment\n/* block */ b");
        assert_eq!(ks, vec![TokenKind::Ident("a".into()), TokenKind::Ident("b".into()), TokenKind::Eof]);
    }

    #[test]
    fn string_escapes_are_decoded() {
        let ks = kinds("\"a\\tb\\n\"");
        assert_eq!(ks[0], TokenKind::Str("a\tb\n".into()));
    }

    #[test]
    fn symbol_literal_forms() {
        assert_eq!(kinds("#'foo'")[0], TokenKind::SymbolLit("foo".into()));
        assert_eq!(kinds("#:foo")[0], TokenKind::SymbolLit("foo".into()));
    }

    #[test]
    fn multi_char_operators_are_greedy() {
        let ks = kinds("+= -> == && <<");
        assert_eq!(
            ks,
            vec![TokenKind::PlusEq, TokenKind::Arrow, TokenKind::EqEq, TokenKind::AmpAmp, TokenKind::Shl, TokenKind::Eof]
        );
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let err = Lexer::new("t.rv", "\"abc").tokenize().unwrap_err();
        assert!(matches!(err, RavenError::Syntax { .. }));
    }

    #[test]
    fn raw_string_captures_body_verbatim() {
        let ks = kinds("/*! a \\n \"b\" !*/ c");
        assert_eq!(ks[0], TokenKind::RawStr(" a \\n \"b\" ".into()));
        assert_eq!(ks[1], TokenKind::Ident("c".into()));
    }

    #[test]
    fn raw_string_is_distinguished_from_plain_block_comment() {
        let ks = kinds("/* not raw */ a");
        assert_eq!(ks, vec![TokenKind::Ident("a".into()), TokenKind::Eof]);
    }
}
