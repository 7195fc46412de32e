//! S-expression reader for Quill source text.
//!
//! Quill source is a sequence of S-expressions. Besides atoms and lists the
//! reader understands double-quoted string literals (with `\"`, `\\`, `\n`
//! and `\t` escapes) and `;` line comments. Every node remembers the 1-based
//! line and column it started at so the front end can point diagnostics at it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deepest list nesting the reader accepts.
pub const MAX_NESTING: usize = 128;

/// A source position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// An S-expression node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SExpr {
    /// A bare token (symbol or number).
    Atom(String, Span),
    /// A string literal, escapes already resolved.
    Str(String, Span),
    /// A parenthesised list.
    List(Vec<SExpr>, Span),
}

impl SExpr {
    pub fn span(&self) -> Span {
        match self {
            Self::Atom(_, s) | Self::Str(_, s) | Self::List(_, s) => *s,
        }
    }

    /// The atom text, if this node is an atom.
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Self::Atom(a, _) => Some(a),
            _ => None,
        }
    }

    /// The list items, if this node is a list.
    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            Self::List(items, _) => Some(items),
            _ => None,
        }
    }

    /// The head atom of a list, e.g. `type` for `(type Player ...)`.
    pub fn head(&self) -> Option<&str> {
        self.as_list()?.first()?.as_atom()
    }

    /// Whether this node is a list headed by `keyword`.
    pub fn is_form(&self, keyword: &str) -> bool {
        self.head() == Some(keyword)
    }
}

impl fmt::Display for SExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atom(s, _) => write!(f, "{}", s),
            Self::Str(s, _) => write!(f, "{:?}", s),
            Self::List(items, _) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A reader error with the position it was detected at.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Open(Span),
    Close(Span),
    Atom(String, Span),
    Str(String, Span),
}

/// Read every top-level S-expression in `input`.
///
/// Empty input (or input holding only comments) yields an empty vector.
pub fn parse_forms(input: &str) -> Result<Vec<SExpr>, SyntaxError> {
    let tokens = tokenize(input)?;
    let mut forms = Vec::new();
    let mut rest = tokens.as_slice();
    while !rest.is_empty() {
        let (expr, remaining) = parse_tokens(rest, 0)?;
        forms.push(expr);
        rest = remaining;
    }
    Ok(forms)
}

/// Read exactly one S-expression.
pub fn parse_sexpr(input: &str) -> Result<SExpr, SyntaxError> {
    let mut forms = parse_forms(input)?;
    match forms.len() {
        0 => Err(SyntaxError::new("empty input", Span::new(1, 1))),
        1 => Ok(forms.remove(0)),
        _ => Err(SyntaxError::new(
            format!("unexpected trailing form: {}", forms[1]),
            forms[1].span(),
        )),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let (mut line, mut column) = (1u32, 1u32);

    macro_rules! bump {
        ($c:expr) => {{
            if $c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }};
    }

    while let Some(&ch) = chars.peek() {
        let here = Span::new(line, column);
        match ch {
            '(' => {
                tokens.push(Token::Open(here));
                chars.next();
                bump!(ch);
            }
            ')' => {
                tokens.push(Token::Close(here));
                chars.next();
                bump!(ch);
            }
            ';' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                    bump!(c);
                }
            }
            '"' => {
                chars.next();
                bump!(ch);
                let mut text = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    bump!(c);
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            let escaped = chars.next().ok_or_else(|| {
                                SyntaxError::new("unterminated string literal", here)
                            })?;
                            bump!(escaped);
                            text.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                        }
                        other => text.push(other),
                    }
                }
                if !closed {
                    return Err(SyntaxError::new("unterminated string literal", here));
                }
                tokens.push(Token::Str(text, here));
            }
            c if c.is_whitespace() => {
                chars.next();
                bump!(c);
            }
            _ => {
                let mut atom = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '(' || c == ')' || c == '"' || c == ';' || c.is_whitespace() {
                        break;
                    }
                    atom.push(c);
                    chars.next();
                    bump!(c);
                }
                tokens.push(Token::Atom(atom, here));
            }
        }
    }

    Ok(tokens)
}

fn parse_tokens(tokens: &[Token], depth: usize) -> Result<(SExpr, &[Token]), SyntaxError> {
    match tokens.first() {
        None => Err(SyntaxError::new("unexpected end of input", Span::default())),
        Some(Token::Open(open)) if depth >= MAX_NESTING => Err(SyntaxError::new(
            format!("lists nested deeper than {MAX_NESTING} levels"),
            *open,
        )),
        Some(Token::Open(open)) => {
            let mut rest = &tokens[1..];
            let mut items = Vec::new();
            loop {
                match rest.first() {
                    None => {
                        return Err(SyntaxError::new(
                            "unbalanced parentheses: missing ')'",
                            *open,
                        ))
                    }
                    Some(Token::Close(_)) => {
                        rest = &rest[1..];
                        break;
                    }
                    Some(_) => {
                        let (item, new_rest) = parse_tokens(rest, depth + 1)?;
                        items.push(item);
                        rest = new_rest;
                    }
                }
            }
            Ok((SExpr::List(items, *open), rest))
        }
        Some(Token::Close(span)) => Err(SyntaxError::new("unexpected ')'", *span)),
        Some(Token::Atom(a, span)) => Ok((SExpr::Atom(a.clone(), *span), &tokens[1..])),
        Some(Token::Str(s, span)) => Ok((SExpr::Str(s.clone(), *span), &tokens[1..])),
    }
}
