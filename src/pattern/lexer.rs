//! Pattern lexer: tokenizes ASCII-art path patterns.

use crate::{Error, Result};

/// A token from the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

/// Source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Null, True, False,

    // Literals
    Integer, Float, StringLiteral,

    Identifier,

    // Punctuation
    LParen, RParen, LBracket, RBracket, LBrace, RBrace,
    Comma, Colon, Pipe, Star,
    Arrow,      // ->
    LeftArrow,  // <-
    Dash,       // -
    DotDot,     // ..

    Eof,
}

/// Tokenize a pattern string.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => { chars.next(); }

            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let start = pos;
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\\')) => {
                            if let Some((_, escaped)) = chars.next() {
                                match escaped {
                                    'n' => s.push('\n'),
                                    't' => s.push('\t'),
                                    '\\' => s.push('\\'),
                                    c if c == quote => s.push(c),
                                    c => { s.push('\\'); s.push(c); }
                                }
                            }
                        }
                        Some((end, c)) if c == quote => {
                            tokens.push(Token {
                                kind: TokenKind::StringLiteral,
                                span: Span { start, end: end + 1 },
                                text: s,
                            });
                            break;
                        }
                        Some((_, c)) => s.push(c),
                        None => return Err(Error::PatternSyntax {
                            position: start,
                            message: "unterminated string literal".into(),
                        }),
                    }
                }
            }

            // A dash directly followed by a digit is a negative number;
            // in a path a dash is always followed by `[`, `(` or `>`.
            '-' if matches!(chars.clone().nth(1), Some((_, d)) if d.is_ascii_digit()) => {
                chars.next();
                tokens.push(number(&mut chars, pos, "-"));
            }

            c if c.is_ascii_digit() => tokens.push(number(&mut chars, pos, "")),

            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: keyword_or_ident(&ident),
                    span: Span { start, end: start + ident.len() },
                    text: ident,
                });
            }

            // Backquoted identifiers: `weird label`
            '`' => {
                chars.next();
                let mut ident = String::new();
                loop {
                    match chars.next() {
                        Some((end, '`')) => {
                            tokens.push(Token {
                                kind: TokenKind::Identifier,
                                span: Span { start: pos, end: end + 1 },
                                text: ident,
                            });
                            break;
                        }
                        Some((_, c)) => ident.push(c),
                        None => return Err(Error::PatternSyntax {
                            position: pos,
                            message: "unterminated backquoted identifier".into(),
                        }),
                    }
                }
            }

            '(' => { chars.next(); tokens.push(punct(TokenKind::LParen, pos, "(")); }
            ')' => { chars.next(); tokens.push(punct(TokenKind::RParen, pos, ")")); }
            '[' => { chars.next(); tokens.push(punct(TokenKind::LBracket, pos, "[")); }
            ']' => { chars.next(); tokens.push(punct(TokenKind::RBracket, pos, "]")); }
            '{' => { chars.next(); tokens.push(punct(TokenKind::LBrace, pos, "{")); }
            '}' => { chars.next(); tokens.push(punct(TokenKind::RBrace, pos, "}")); }
            ',' => { chars.next(); tokens.push(punct(TokenKind::Comma, pos, ",")); }
            ':' => { chars.next(); tokens.push(punct(TokenKind::Colon, pos, ":")); }
            '|' => { chars.next(); tokens.push(punct(TokenKind::Pipe, pos, "|")); }
            '*' => { chars.next(); tokens.push(punct(TokenKind::Star, pos, "*")); }
            '.' if matches!(chars.clone().nth(1), Some((_, '.'))) => {
                chars.next();
                chars.next();
                tokens.push(punct(TokenKind::DotDot, pos, ".."));
            }
            '<' if matches!(chars.clone().nth(1), Some((_, '-'))) => {
                chars.next();
                chars.next();
                tokens.push(punct(TokenKind::LeftArrow, pos, "<-"));
            }
            '-' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '>'))) {
                    chars.next();
                    tokens.push(punct(TokenKind::Arrow, pos, "->"));
                } else {
                    tokens.push(punct(TokenKind::Dash, pos, "-"));
                }
            }

            other => {
                return Err(Error::PatternSyntax {
                    position: pos,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span { start: input.len(), end: input.len() },
        text: String::new(),
    });

    Ok(tokens)
}

/// Read digits (and one fractional part) starting at `start`.
///
/// `1..3` lexes as `1`, `..`, `3`: a dot only opens a fraction when a
/// digit follows it.
fn number(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    start: usize,
    sign: &str,
) -> Token {
    let mut num = String::from(sign);
    let mut is_float = false;
    while let Some(&(_, c)) = chars.peek() {
        if c.is_ascii_digit() {
            num.push(c);
            chars.next();
        } else if c == '.' && !is_float && matches!(chars.clone().nth(1), Some((_, d)) if d.is_ascii_digit()) {
            is_float = true;
            num.push(c);
            chars.next();
        } else {
            break;
        }
    }
    Token {
        kind: if is_float { TokenKind::Float } else { TokenKind::Integer },
        span: Span { start, end: start + num.len() },
        text: num,
    }
}

fn punct(kind: TokenKind, pos: usize, text: &str) -> Token {
    Token {
        kind,
        span: Span { start: pos, end: pos + text.len() },
        text: text.to_string(),
    }
}

fn keyword_or_ident(s: &str) -> TokenKind {
    match s.to_uppercase().as_str() {
        "NULL" => TokenKind::Null,
        "TRUE" => TokenKind::True,
        "FALSE" => TokenKind::False,
        _ => TokenKind::Identifier,
    }
}
