//! Token stream wrapper for the hand-written parser.

use crate::ParseError;
use scriptlang_ast::span::{FileId, SourceFile, SourceRange};
use scriptlang_lexer::Token;
use std::ops::Range;

/// Token stream with lookahead and position tracking.
///
/// Each token is paired with its byte span from the source; spans convert
/// into `(line, column)` ranges through the owning [`SourceFile`], so every
/// error lands on real source coordinates.
pub struct TokenStream<'src> {
    tokens: &'src [(Token, Range<usize>)],
    pos: usize,
    file_id: FileId,
    file: &'src SourceFile,
}

impl<'src> TokenStream<'src> {
    pub fn new(
        tokens: &'src [(Token, Range<usize>)],
        file_id: FileId,
        file: &'src SourceFile,
    ) -> Self {
        Self {
            tokens,
            pos: 0,
            file_id,
            file,
        }
    }

    /// Peek at the current token without consuming it.
    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(tok, _)| tok)
    }

    /// Peek at the nth token ahead without consuming.
    pub fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(tok, _)| tok)
    }

    /// Advance to the next token and return it.
    pub fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos).map(|(tok, _)| tok);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Does the current token match `expected` (by variant)?
    pub fn check(&self, expected: &Token) -> bool {
        matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    /// Consume the current token if it matches `expected` (by variant).
    pub fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Expect a specific token and advance past it.
    pub fn expect(&mut self, expected: Token) -> Result<SourceRange, ParseError> {
        if self.check(&expected) {
            let start = self.pos;
            self.advance();
            Ok(self.range_from(start))
        } else {
            Err(ParseError::expected(
                expected.describe(),
                self.peek(),
                self.current_range(),
            ))
        }
    }

    /// Expect an identifier and return it with its range.
    pub fn expect_ident(&mut self, context: &str) -> Result<(String, SourceRange), ParseError> {
        let range = self.current_range();
        match self.peek() {
            Some(Token::Ident(_)) => {
                let Some(Token::Ident(name)) = self.advance().cloned() else {
                    unreachable!("peeked identifier vanished");
                };
                Ok((name, range))
            }
            found => Err(ParseError::expected("identifier", found, range).with_context(context)),
        }
    }

    /// Skip any run of end-of-line tokens (blank lines are legal everywhere
    /// a statement boundary is).
    pub fn skip_eols(&mut self) {
        while self.check(&Token::Eol) {
            self.advance();
        }
    }

    /// Expect an end-of-line (or end of input, which closes the last line).
    pub fn expect_eol(&mut self) -> Result<(), ParseError> {
        if self.at_end() || self.eat(&Token::Eol) {
            Ok(())
        } else {
            Err(ParseError::expected(
                "end of line",
                self.peek(),
                self.current_range(),
            ))
        }
    }

    /// Skip to just past the next end-of-line (statement-level recovery).
    pub fn recover_to_eol(&mut self) {
        while let Some(token) = self.peek() {
            let was_eol = matches!(token, Token::Eol);
            self.advance();
            if was_eol {
                break;
            }
        }
    }

    /// Skip tokens until the next top-level declaration keyword or EOF
    /// (declaration-level recovery).
    pub fn synchronize(&mut self) {
        while !self.at_end() {
            match self.peek() {
                Some(Token::ScriptName)
                | Some(Token::ScriptHash)
                | Some(Token::Using)
                | Some(Token::Proc)
                | Some(Token::Func)
                | Some(Token::Proto)
                | Some(Token::Native)
                | Some(Token::Struct)
                | Some(Token::Const)
                | Some(Token::Global) => break,
                _ => {
                    self.advance();
                }
            }
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn current_pos(&self) -> usize {
        self.pos
    }

    /// Range from a starting token position to the last consumed token.
    pub fn range_from(&self, start: usize) -> SourceRange {
        let Some((_, start_span)) = self.tokens.get(start) else {
            return self.current_range();
        };
        let end_byte = if self.pos > 0 && self.pos <= self.tokens.len() {
            self.tokens[self.pos - 1].1.end
        } else {
            start_span.start
        };
        SourceRange::new(
            self.file_id,
            self.file.position(start_span.start as u32),
            self.file.position(end_byte as u32),
        )
    }

    /// Range of the current token (or a zero-width range at EOF).
    pub fn current_range(&self) -> SourceRange {
        let byte_span = match self.tokens.get(self.pos) {
            Some((_, span)) => span.clone(),
            None => match self.tokens.last() {
                Some((_, span)) => span.end..span.end,
                None => 0..0,
            },
        };
        SourceRange::new(
            self.file_id,
            self.file.position(byte_span.start as u32),
            self.file.position(byte_span.end as u32),
        )
    }
}
