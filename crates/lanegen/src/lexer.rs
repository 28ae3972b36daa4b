//! Tokenizer for the base-function source dialect.
//!
//! The input language is a small Go-syntax subset, tokenized by hand.
//! Comments are not discarded: line comments are collected alongside the
//! token stream so the directive scanner can reconstruct conditional blocks
//! and unroll hints from them.
//!
//! Statement termination follows the host dialect's semicolon-insertion
//! rule: a newline after an identifier, literal, closing bracket, `++`/`--`
//! or a flow keyword yields a synthetic semicolon.

use crate::{
    ast::CodeRange,
    error::{GenError, GenResult},
};

/// A lexical token kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Int(i64),
    Float { value: f64, text: String },
    Str(String),

    KwPackage,
    KwImport,
    KwFunc,
    KwVar,
    KwConst,
    KwFor,
    KwIf,
    KwElse,
    KwReturn,
    KwBreak,
    KwContinue,
    KwRange,
    KwType,
    KwStruct,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,

    Assign,
    Define,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Inc,
    Dec,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
    AmpAmp,
    PipePipe,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,

    Eof,
}

impl TokenKind {
    /// Whether a newline after this token terminates a statement.
    fn ends_statement(&self) -> bool {
        matches!(
            self,
            Self::Ident(_)
                | Self::Int(_)
                | Self::Float { .. }
                | Self::Str(_)
                | Self::RParen
                | Self::RBracket
                | Self::RBrace
                | Self::Inc
                | Self::Dec
                | Self::KwReturn
                | Self::KwBreak
                | Self::KwContinue
        )
    }
}

/// A token with its source position (1-based line and column).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub col: u32,
}

impl Token {
    pub fn range(&self) -> CodeRange {
        CodeRange::new(self.line, self.col, self.line, self.col)
    }
}

/// A line comment captured during tokenization.
///
/// `text` excludes the leading `//` but keeps everything after it verbatim,
/// including directive prefixes.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentLine {
    pub line: u32,
    pub text: String,
}

/// Tokenization output: the token stream plus the comment side channel.
#[derive(Debug)]
pub struct TokenStream {
    pub tokens: Vec<Token>,
    pub comments: Vec<CommentLine>,
}

/// Tokenizes a whole source unit.
pub fn tokenize(code: &str) -> GenResult<TokenStream> {
    Lexer::new(code).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    tokens: Vec<Token>,
    comments: Vec<CommentLine>,
}

impl Lexer {
    fn new(code: &str) -> Self {
        Self {
            chars: code.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            tokens: Vec::new(),
            comments: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied();
        if let Some(c) = c {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        c
    }

    fn push(&mut self, kind: TokenKind, line: u32, col: u32) {
        self.tokens.push(Token { kind, line, col });
    }

    /// Inserts a synthetic semicolon at a newline when the last real token
    /// can end a statement.
    fn maybe_insert_semi(&mut self) {
        let ends = self.tokens.last().is_some_and(|t| t.kind.ends_statement());
        if ends {
            let (line, col) = (self.line, self.col);
            self.push(TokenKind::Semi, line, col);
        }
    }

    fn run(mut self) -> GenResult<TokenStream> {
        while let Some(c) = self.peek() {
            let (line, col) = (self.line, self.col);
            match c {
                '\n' => {
                    self.maybe_insert_semi();
                    self.bump();
                }
                c if c.is_whitespace() => {
                    self.bump();
                }
                '/' if self.peek2() == Some('/') => {
                    self.bump();
                    self.bump();
                    let mut text = String::new();
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        text.push(c);
                        self.bump();
                    }
                    self.comments.push(CommentLine { line, text });
                }
                '/' if self.peek2() == Some('*') => {
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(GenError::syntax("unterminated block comment", CodeRange::line(line)));
                            }
                        }
                    }
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut ident = String::new();
                    while let Some(c) = self.peek() {
                        if c.is_ascii_alphanumeric() || c == '_' {
                            ident.push(c);
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    let kind = match ident.as_str() {
                        "package" => TokenKind::KwPackage,
                        "import" => TokenKind::KwImport,
                        "func" => TokenKind::KwFunc,
                        "var" => TokenKind::KwVar,
                        "const" => TokenKind::KwConst,
                        "for" => TokenKind::KwFor,
                        "if" => TokenKind::KwIf,
                        "else" => TokenKind::KwElse,
                        "return" => TokenKind::KwReturn,
                        "break" => TokenKind::KwBreak,
                        "continue" => TokenKind::KwContinue,
                        "range" => TokenKind::KwRange,
                        "type" => TokenKind::KwType,
                        "struct" => TokenKind::KwStruct,
                        _ => TokenKind::Ident(ident),
                    };
                    self.push(kind, line, col);
                }
                c if c.is_ascii_digit() => {
                    self.lex_number(line, col)?;
                }
                '"' => {
                    self.bump();
                    let mut s = String::new();
                    loop {
                        match self.bump() {
                            Some('"') => break,
                            Some('\\') => match self.bump() {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some('\\') => s.push('\\'),
                                Some('"') => s.push('"'),
                                other => {
                                    return Err(GenError::syntax(
                                        format!("unsupported string escape: {other:?}"),
                                        CodeRange::line(line),
                                    ));
                                }
                            },
                            Some('\n') | None => {
                                return Err(GenError::syntax("unterminated string literal", CodeRange::line(line)));
                            }
                            Some(c) => s.push(c),
                        }
                    }
                    self.push(TokenKind::Str(s), line, col);
                }
                _ => {
                    self.lex_operator(line, col)?;
                }
            }
        }
        self.maybe_insert_semi();
        let line = self.line;
        let col = self.col;
        self.push(TokenKind::Eof, line, col);
        Ok(TokenStream {
            tokens: self.tokens,
            comments: self.comments,
        })
    }

    fn lex_number(&mut self, line: u32, col: u32) -> GenResult<()> {
        let mut text = String::new();
        let mut is_float = false;
        if self.peek() == Some('0') && matches!(self.peek2(), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let mut hex = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() || c == '_' {
                    if c != '_' {
                        hex.push(c);
                    }
                    self.bump();
                } else {
                    break;
                }
            }
            let value = i64::from_str_radix(&hex, 16)
                .map_err(|_| GenError::syntax(format!("invalid hex literal 0x{hex}"), CodeRange::line(line)))?;
            self.push(TokenKind::Int(value), line, col);
            return Ok(());
        }
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => {
                    if c != '_' {
                        text.push(c);
                    }
                    self.bump();
                }
                '.' if self.peek2().is_some_and(|c| c.is_ascii_digit()) => {
                    is_float = true;
                    text.push('.');
                    self.bump();
                }
                'e' | 'E' => {
                    is_float = true;
                    text.push(c);
                    self.bump();
                    if matches!(self.peek(), Some('+' | '-')) {
                        text.push(self.bump().expect("peeked sign"));
                    }
                }
                _ => break,
            }
        }
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| GenError::syntax(format!("invalid float literal {text}"), CodeRange::line(line)))?;
            self.push(TokenKind::Float { value, text }, line, col);
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| GenError::syntax(format!("invalid int literal {text}"), CodeRange::line(line)))?;
            self.push(TokenKind::Int(value), line, col);
        }
        Ok(())
    }

    fn lex_operator(&mut self, line: u32, col: u32) -> GenResult<()> {
        let c = self.bump().expect("caller peeked");
        let two = |lexer: &Lexer| lexer.peek();
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            '.' => TokenKind::Dot,
            ':' => {
                if two(self) == Some('=') {
                    self.bump();
                    TokenKind::Define
                } else {
                    TokenKind::Colon
                }
            }
            '+' => match two(self) {
                Some('+') => {
                    self.bump();
                    TokenKind::Inc
                }
                Some('=') => {
                    self.bump();
                    TokenKind::PlusAssign
                }
                _ => TokenKind::Plus,
            },
            '-' => match two(self) {
                Some('-') => {
                    self.bump();
                    TokenKind::Dec
                }
                Some('=') => {
                    self.bump();
                    TokenKind::MinusAssign
                }
                _ => TokenKind::Minus,
            },
            '*' => {
                if two(self) == Some('=') {
                    self.bump();
                    TokenKind::StarAssign
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if two(self) == Some('=') {
                    self.bump();
                    TokenKind::SlashAssign
                } else {
                    TokenKind::Slash
                }
            }
            '%' => TokenKind::Percent,
            '&' => {
                if two(self) == Some('&') {
                    self.bump();
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if two(self) == Some('|') {
                    self.bump();
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                }
            }
            '^' => TokenKind::Caret,
            '!' => {
                if two(self) == Some('=') {
                    self.bump();
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '=' => {
                if two(self) == Some('=') {
                    self.bump();
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '<' => match two(self) {
                Some('<') => {
                    self.bump();
                    TokenKind::Shl
                }
                Some('=') => {
                    self.bump();
                    TokenKind::Le
                }
                _ => TokenKind::Lt,
            },
            '>' => match two(self) {
                Some('>') => {
                    self.bump();
                    TokenKind::Shr
                }
                Some('=') => {
                    self.bump();
                    TokenKind::Ge
                }
                _ => TokenKind::Gt,
            },
            other => {
                return Err(GenError::syntax(
                    format!("unexpected character {other:?}"),
                    CodeRange::new(line, col, line, col),
                ));
            }
        };
        self.push(kind, line, col);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semicolons_inserted_at_statement_ends() {
        let ts = tokenize("x := 1\ny := 2\n").expect("lexes");
        let semis = ts.tokens.iter().filter(|t| t.kind == TokenKind::Semi).count();
        assert_eq!(semis, 2);
    }

    #[test]
    fn comments_are_collected_with_lines() {
        let ts = tokenize("// first\nx := 1 //gen:unroll 4\n").expect("lexes");
        assert_eq!(ts.comments.len(), 2);
        assert_eq!(ts.comments[0].line, 1);
        assert_eq!(ts.comments[1].line, 2);
        assert_eq!(ts.comments[1].text, "gen:unroll 4");
    }

    #[test]
    fn float_tokens_keep_text() {
        let ts = tokenize("y := 3.14\n").expect("lexes");
        assert!(ts.tokens.iter().any(|t| matches!(
            &t.kind,
            TokenKind::Float { text, .. } if text == "3.14"
        )));
    }

    #[test]
    fn no_semicolon_after_open_brace() {
        let ts = tokenize("if x {\n}\n").expect("lexes");
        let kinds: Vec<_> = ts.tokens.iter().map(|t| &t.kind).collect();
        let brace_at = kinds
            .iter()
            .position(|k| **k == TokenKind::LBrace)
            .expect("has open brace");
        assert_ne!(kinds[brace_at + 1], &TokenKind::Semi, "newline after `{{` is not a terminator");
    }
}
