//! Hand-written scanning loop over the textual IR (spec §6).
//!
//! There's no separate preprocessing pass and no token lookahead buffer:
//! `Lexer::next_token` is called greedily by the parser, one token at a
//! time, matching how `common::source::SourceManager` hands out spans.

use crate::common::source::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Local(String),
    Global(String),
    Label(String),
    Ident(String),
    Int(u64),
    Float(f64),
    Colon,
    Comma,
    Equals,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Lt,
    Gt,
    Pipe,
    Ellipsis,
    Eof,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Local(s) => format!("%{s}"),
            TokenKind::Global(s) => format!("@{s}"),
            TokenKind::Label(s) => format!("${s}"),
            TokenKind::Ident(s) => s.clone(),
            TokenKind::Int(n) => n.to_string(),
            TokenKind::Float(f) => f.to_string(),
            TokenKind::Colon => ":".into(),
            TokenKind::Comma => ",".into(),
            TokenKind::Equals => "=".into(),
            TokenKind::LParen => "(".into(),
            TokenKind::RParen => ")".into(),
            TokenKind::LBrace => "{".into(),
            TokenKind::RBrace => "}".into(),
            TokenKind::LBracket => "[".into(),
            TokenKind::RBracket => "]".into(),
            TokenKind::Lt => "<".into(),
            TokenKind::Gt => ">".into(),
            TokenKind::Pipe => "|".into(),
            TokenKind::Ellipsis => "...".into(),
            TokenKind::Eof => "<eof>".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }
}

#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub span: Span,
}

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    file_id: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file_id: u32) -> Self {
        Lexer { src, bytes: src.as_bytes(), pos: 0, file_id }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn span(&self, start: usize) -> Span {
        Span { start: start as u32, end: self.pos as u32, file_id: self.file_id }
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.pos += 1;
                }
                Some(b';') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn is_ident_start(c: u8) -> bool {
        c.is_ascii_alphabetic() || c == b'_' || c == b'.'
    }

    fn is_ident_continue(c: u8) -> bool {
        c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
    }

    fn scan_ident(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if Self::is_ident_continue(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.src[start..self.pos].to_string()
    }

    fn scan_number(&mut self) -> Result<TokenKind, LexError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = &self.src[start..self.pos];
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|e| LexError { message: format!("invalid float literal `{text}`: {e}"), span: self.span(start) })
        } else if let Some(stripped) = text.strip_prefix('-') {
            stripped
                .parse::<i64>()
                .map(|v| TokenKind::Int(v as u64))
                .map_err(|e| LexError { message: format!("invalid integer literal `{text}`: {e}"), span: self.span(start) })
        } else {
            text.parse::<u64>()
                .map(TokenKind::Int)
                .map_err(|e| LexError { message: format!("invalid integer literal `{text}`: {e}"), span: self.span(start) })
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia();
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(Token { kind: TokenKind::Eof, span: self.span(start) });
        };

        let kind = match c {
            b'%' => {
                self.pos += 1;
                TokenKind::Local(self.scan_ident())
            }
            b'@' => {
                self.pos += 1;
                TokenKind::Global(self.scan_ident())
            }
            b'$' => {
                self.pos += 1;
                TokenKind::Label(self.scan_ident())
            }
            b':' => {
                self.pos += 1;
                TokenKind::Colon
            }
            b',' => {
                self.pos += 1;
                TokenKind::Comma
            }
            b'=' => {
                self.pos += 1;
                TokenKind::Equals
            }
            b'(' => {
                self.pos += 1;
                TokenKind::LParen
            }
            b')' => {
                self.pos += 1;
                TokenKind::RParen
            }
            b'{' => {
                self.pos += 1;
                TokenKind::LBrace
            }
            b'}' => {
                self.pos += 1;
                TokenKind::RBrace
            }
            b'[' => {
                self.pos += 1;
                TokenKind::LBracket
            }
            b']' => {
                self.pos += 1;
                TokenKind::RBracket
            }
            b'<' => {
                self.pos += 1;
                TokenKind::Lt
            }
            b'>' => {
                self.pos += 1;
                TokenKind::Gt
            }
            b'|' => {
                self.pos += 1;
                TokenKind::Pipe
            }
            b'.' if self.peek_at(1) == Some(b'.') && self.peek_at(2) == Some(b'.') => {
                self.pos += 3;
                TokenKind::Ellipsis
            }
            c if c.is_ascii_digit() || (c == b'-' && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit())) => {
                self.scan_number()?
            }
            c if Self::is_ident_start(c) => TokenKind::Ident(self.scan_ident()),
            other => {
                return Err(LexError {
                    message: format!("unexpected character `{}`", other as char),
                    span: self.span(start),
                })
            }
        };
        Ok(Token { kind, span: self.span(start) })
    }

    /// Tokenizes the whole input, stopping at the first error.
    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut out = Vec::new();
        loop {
            let tok = self.next_token()?;
            let is_eof = tok.is_eof();
            out.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, 0).tokenize().unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_a_define_header() {
        let ks = kinds("define i32 @add(i32 %a, i32 %b) {");
        assert_eq!(
            ks,
            vec![
                TokenKind::Ident("define".into()),
                TokenKind::Ident("i32".into()),
                TokenKind::Global("add".into()),
                TokenKind::LParen,
                TokenKind::Ident("i32".into()),
                TokenKind::Local("a".into()),
                TokenKind::Comma,
                TokenKind::Ident("i32".into()),
                TokenKind::Local("b".into()),
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn skips_semicolon_comments() {
        let ks = kinds("i32 ; a trailing comment\n%x");
        assert_eq!(ks, vec![TokenKind::Ident("i32".into()), TokenKind::Local("x".into()), TokenKind::Eof]);
    }

    #[test]
    fn scans_negative_and_float_literals() {
        let ks = kinds("-12 3.5 1e3");
        assert_eq!(ks, vec![TokenKind::Int((-12i64) as u64), TokenKind::Float(3.5), TokenKind::Float(1e3), TokenKind::Eof]);
    }

    #[test]
    fn rejects_unknown_characters() {
        let err = Lexer::new("%x #", 0).tokenize().unwrap_err();
        assert!(err.message.contains('#'));
    }
}
