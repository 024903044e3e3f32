//! Byte stream → token stream.
//!
//! Positions are 1-indexed line/column, counted in characters. Newlines only
//! advance the line counter; they are not tokens. `//` and `/* ... */`
//! comments are skipped. Anything the grammar has no token for is a
//! [`LexError`] pointing at the offending character.

use crate::error::LexError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier: ASCII letter or `_`, then letters, digits, `_`.
    Symbol(String),
    /// Double-quoted string literal, escapes already applied.
    Str(String),
    Int(i32),
    Float(f64),

    // Keywords
    Func,
    If,
    Else,
    While,
    For,
    In,
    Return,
    Break,
    Continue,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    DotDot,
    Semicolon,
    Colon,
    Arrow,
    FatArrow,
    Assign,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Lte,
    Gt,
    Gte,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
}

impl TokenKind {
    /// Short name for diagnostics ("expected X, found Y").
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Symbol(s) => format!("'{s}'"),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::Int(v) => format!("'{v}'"),
            TokenKind::Float(v) => format!("'{v}'"),
            TokenKind::Func => "'func'".to_string(),
            TokenKind::If => "'if'".to_string(),
            TokenKind::Else => "'else'".to_string(),
            TokenKind::While => "'while'".to_string(),
            TokenKind::For => "'for'".to_string(),
            TokenKind::In => "'in'".to_string(),
            TokenKind::Return => "'return'".to_string(),
            TokenKind::Break => "'break'".to_string(),
            TokenKind::Continue => "'continue'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
            TokenKind::LBracket => "'['".to_string(),
            TokenKind::RBracket => "']'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::DotDot => "'..'".to_string(),
            TokenKind::Semicolon => "';'".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Arrow => "'->'".to_string(),
            TokenKind::FatArrow => "'=>'".to_string(),
            TokenKind::Assign => "'='".to_string(),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::Percent => "'%'".to_string(),
            TokenKind::Lt => "'<'".to_string(),
            TokenKind::Lte => "'<='".to_string(),
            TokenKind::Gt => "'>'".to_string(),
            TokenKind::Gte => "'>='".to_string(),
            TokenKind::EqEq => "'=='".to_string(),
            TokenKind::NotEq => "'!='".to_string(),
            TokenKind::AndAnd => "'&&'".to_string(),
            TokenKind::OrOr => "'||'".to_string(),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// A token with the position of its first character.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

/// Tokenize an entire source text.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer { chars: source.chars().peekable(), line: 1, column: 1 }
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn error(&self, line: u32, column: u32, message: impl Into<String>) -> LexError {
        LexError { line, column, message: message.into() }
    }

    fn run(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        while let Some(ch) = self.peek() {
            let (line, column) = (self.line, self.column);
            match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.bump();
                }
                '/' => {
                    self.bump();
                    match self.peek() {
                        Some('/') => {
                            while let Some(c) = self.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.bump();
                            }
                        }
                        Some('*') => {
                            self.bump();
                            self.skip_block_comment(line, column)?;
                        }
                        _ => tokens.push(Token { kind: TokenKind::Slash, line, column }),
                    }
                }
                '"' => {
                    self.bump();
                    let kind = self.string_literal(line, column)?;
                    tokens.push(Token { kind, line, column });
                }
                '0'..='9' => {
                    let kind = self.number(line, column)?;
                    tokens.push(Token { kind, line, column });
                }
                'a'..='z' | 'A'..='Z' | '_' => {
                    let kind = self.symbol_or_keyword();
                    tokens.push(Token { kind, line, column });
                }
                _ => {
                    self.bump();
                    let kind = self.punct(ch, line, column)?;
                    tokens.push(Token { kind, line, column });
                }
            }
        }
        Ok(tokens)
    }

    fn skip_block_comment(&mut self, line: u32, column: u32) -> Result<(), LexError> {
        let mut prev_star = false;
        while let Some(c) = self.bump() {
            if prev_star && c == '/' {
                return Ok(());
            }
            prev_star = c == '*';
        }
        Err(self.error(line, column, "unterminated block comment"))
    }

    fn string_literal(&mut self, line: u32, column: u32) -> Result<TokenKind, LexError> {
        let mut value = String::new();
        loop {
            let (el, ec) = (self.line, self.column);
            match self.bump() {
                None => return Err(self.error(line, column, "unterminated string literal")),
                Some('"') => return Ok(TokenKind::Str(value)),
                Some('\\') => match self.bump() {
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('n') => value.push('\n'),
                    Some('r') => value.push('\r'),
                    Some('t') => value.push('\t'),
                    Some(other) => {
                        return Err(self.error(el, ec, format!("unknown escape '\\{other}'")));
                    }
                    None => return Err(self.error(line, column, "unterminated string literal")),
                },
                Some(c) => value.push(c),
            }
        }
    }

    fn number(&mut self, line: u32, column: u32) -> Result<TokenKind, LexError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }

        // Hex literal: "0x" directly after a leading zero.
        if text == "0" && self.peek() == Some('x') {
            self.bump();
            let mut hex = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    hex.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            if hex.is_empty() {
                return Err(self.error(line, column, "'0x' with no hex digits"));
            }
            return match u32::from_str_radix(&hex, 16) {
                Ok(v) => Ok(TokenKind::Int(v as i32)),
                Err(_) => Err(self.error(line, column, "hex literal out of range")),
            };
        }

        // A single '.' followed by a digit makes this a float; ".." is the
        // range punctuation and stays out of the number.
        if self.peek() == Some('.') {
            let mut ahead = self.chars.clone();
            ahead.next();
            if ahead.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
                text.push('.');
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                return match text.parse::<f64>() {
                    Ok(v) => Ok(TokenKind::Float(v)),
                    Err(_) => Err(self.error(line, column, "malformed float literal")),
                };
            }
        }

        match text.parse::<i64>() {
            Ok(v) if v <= i32::MAX as i64 => Ok(TokenKind::Int(v as i32)),
            _ => Err(self.error(line, column, "integer literal out of range")),
        }
    }

    fn symbol_or_keyword(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match text.as_str() {
            "func" => TokenKind::Func,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "return" => TokenKind::Return,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            _ => TokenKind::Symbol(text),
        }
    }

    fn punct(&mut self, ch: char, line: u32, column: u32) -> Result<TokenKind, LexError> {
        let followed_by = |lexer: &mut Self, next: char| {
            if lexer.peek() == Some(next) {
                lexer.bump();
                true
            } else {
                false
            }
        };
        Ok(match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '+' => TokenKind::Plus,
            '*' => TokenKind::Star,
            '%' => TokenKind::Percent,
            '.' => {
                if followed_by(self, '.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '-' => {
                if followed_by(self, '>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Minus
                }
            }
            '=' => {
                if followed_by(self, '=') {
                    TokenKind::EqEq
                } else if followed_by(self, '>') {
                    TokenKind::FatArrow
                } else {
                    TokenKind::Assign
                }
            }
            '<' => {
                if followed_by(self, '=') {
                    TokenKind::Lte
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if followed_by(self, '=') {
                    TokenKind::Gte
                } else {
                    TokenKind::Gt
                }
            }
            '!' => {
                if followed_by(self, '=') {
                    TokenKind::NotEq
                } else {
                    return Err(self.error(line, column, "unexpected character '!'"));
                }
            }
            '&' => {
                if followed_by(self, '&') {
                    TokenKind::AndAnd
                } else {
                    return Err(self.error(line, column, "unexpected character '&'"));
                }
            }
            '|' => {
                if followed_by(self, '|') {
                    TokenKind::OrOr
                } else {
                    return Err(self.error(line, column, "unexpected character '|'"));
                }
            }
            other => {
                return Err(self.error(line, column, format!("unexpected character '{other}'")));
            }
        })
    }
}
