//! Parse error types.

use scriptlang_ast::SourceRange;
use scriptlang_lexer::Token;
use std::fmt;

/// Parse error with source location and context.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub range: SourceRange,
    pub message: String,
}

/// Category of parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A specific token was expected and something else was found
    UnexpectedToken,
    /// Input ended while a construct was still open
    UnexpectedEof,
    /// Tokens are present but violate the grammar
    InvalidSyntax,
    /// Unrecognized input reported by the lexer
    BadToken,
}

impl ParseError {
    /// "expected X, found Y" at a location.
    pub fn expected(expected: &str, found: Option<&Token>, range: SourceRange) -> Self {
        let message = match found {
            Some(token) => format!("expected {expected}, found {token}"),
            None => format!("expected {expected}, found end of input"),
        };
        Self {
            kind: if found.is_none() {
                ParseErrorKind::UnexpectedEof
            } else {
                ParseErrorKind::UnexpectedToken
            },
            range,
            message,
        }
    }

    /// "unexpected Y <context>" at a location.
    pub fn unexpected(found: Option<&Token>, context: &str, range: SourceRange) -> Self {
        let message = match found {
            Some(token) => format!("unexpected {token} {context}"),
            None => format!("unexpected end of input {context}"),
        };
        Self {
            kind: if found.is_none() {
                ParseErrorKind::UnexpectedEof
            } else {
                ParseErrorKind::UnexpectedToken
            },
            range,
            message,
        }
    }

    pub fn invalid(message: impl Into<String>, range: SourceRange) -> Self {
        Self {
            kind: ParseErrorKind::InvalidSyntax,
            range,
            message: message.into(),
        }
    }

    /// Append a trailing context phrase to the message.
    pub(crate) fn with_context(mut self, context: &str) -> Self {
        if !context.is_empty() {
            self.message = format!("{} {}", self.message, context);
        }
        self
    }

    /// Error for a slice the lexer could not tokenize.
    pub fn bad_token(range: SourceRange) -> Self {
        Self {
            kind: ParseErrorKind::BadToken,
            range,
            message: "unrecognized token".to_string(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {},{}",
            self.message, self.range.begin.line, self.range.begin.column
        )
    }
}

impl std::error::Error for ParseError {}
