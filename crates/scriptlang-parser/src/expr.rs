//! Expression parsing — precedence climbing over the token stream.

use crate::{ParseError, TokenStream};
use scriptlang_ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use scriptlang_lexer::Token;

/// Operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
}

/// Binary operator metadata: (precedence, associativity, operator).
///
/// Higher precedence binds tighter. Single source of truth for the infix
/// grammar:
///
/// | prec | operators |
/// |---|---|
/// | 10 | `OR` |
/// | 20 | `AND` |
/// | 30 | `==` `<>` `<` `<=` `>` `>=` |
/// | 34 | `\|` `^` |
/// | 36 | `&` |
/// | 40 | `+` `-` |
/// | 50 | `*` `/` `%` |
fn binary_op_info(token: &Token) -> Option<(u8, Assoc, BinaryOp)> {
    match token {
        Token::Or => Some((10, Assoc::Left, BinaryOp::Or)),
        Token::And => Some((20, Assoc::Left, BinaryOp::And)),
        Token::EqEq => Some((30, Assoc::Left, BinaryOp::Eq)),
        Token::NotEq => Some((30, Assoc::Left, BinaryOp::Ne)),
        Token::Lt => Some((30, Assoc::Left, BinaryOp::Lt)),
        Token::LtEq => Some((30, Assoc::Left, BinaryOp::Le)),
        Token::Gt => Some((30, Assoc::Left, BinaryOp::Gt)),
        Token::GtEq => Some((30, Assoc::Left, BinaryOp::Ge)),
        Token::Pipe => Some((34, Assoc::Left, BinaryOp::BitOr)),
        Token::Caret => Some((34, Assoc::Left, BinaryOp::BitXor)),
        Token::Amp => Some((36, Assoc::Left, BinaryOp::BitAnd)),
        Token::Plus => Some((40, Assoc::Left, BinaryOp::Add)),
        Token::Minus => Some((40, Assoc::Left, BinaryOp::Sub)),
        Token::Star => Some((50, Assoc::Left, BinaryOp::Mul)),
        Token::Slash => Some((50, Assoc::Left, BinaryOp::Div)),
        Token::Percent => Some((50, Assoc::Left, BinaryOp::Mod)),
        _ => None,
    }
}

/// Parse a full expression.
pub fn parse_expr(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    parse_pratt(stream, 0)
}

fn parse_pratt(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let mut left = parse_prefix(stream)?;

    while let Some(token) = stream.peek() {
        let Some((prec, assoc, op)) = binary_op_info(token) else {
            break;
        };
        if prec < min_prec {
            break;
        }
        stream.advance();

        let next_prec = match assoc {
            Assoc::Left => prec + 1,
        };
        let right = parse_pratt(stream, next_prec)?;

        let range = stream.range_from(start);
        left = Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            range,
        );
    }

    Ok(left)
}

/// Prefix expressions: unary operators, then postfix chains.
fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    match stream.peek() {
        Some(Token::Minus) => parse_unary(stream, UnaryOp::Neg),
        Some(Token::Not) => parse_unary(stream, UnaryOp::Not),
        _ => parse_postfix(stream),
    }
}

fn parse_unary(stream: &mut TokenStream, op: UnaryOp) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    stream.advance();
    let operand = parse_prefix(stream)?;
    let range = stream.range_from(start);

    // Canonicalize negated literals right away so `-1` is one literal, not
    // a unary node; the constant evaluator and case labels rely on it.
    if op == UnaryOp::Neg {
        match operand.kind {
            ExprKind::IntLit(v) => return Ok(Expr::new(ExprKind::IntLit(-v), range)),
            ExprKind::FloatLit(v) => return Ok(Expr::new(ExprKind::FloatLit(-v), range)),
            _ => {}
        }
    }

    Ok(Expr::new(
        ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        range,
    ))
}

/// Postfix chains: member access, array index, invocation.
fn parse_postfix(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let mut expr = parse_atom(stream)?;

    loop {
        match stream.peek() {
            Some(Token::Dot) => {
                stream.advance();
                let (field, field_range) = stream.expect_ident("after '.'")?;
                expr = Expr::new(
                    ExprKind::Member {
                        base: Box::new(expr),
                        field,
                        field_range,
                    },
                    stream.range_from(start),
                );
            }
            Some(Token::LBracket) => {
                stream.advance();
                let index = parse_expr(stream)?;
                stream.expect(Token::RBracket)?;
                expr = Expr::new(
                    ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    stream.range_from(start),
                );
            }
            Some(Token::LParen) => {
                let args = parse_call_args(stream)?;
                expr = Expr::new(
                    ExprKind::Invoke {
                        callee: Box::new(expr),
                        args,
                    },
                    stream.range_from(start),
                );
            }
            _ => break,
        }
    }

    Ok(expr)
}

/// Atoms: literals, identifiers, parentheses, vector literals.
fn parse_atom(stream: &mut TokenStream) -> Result<Expr, ParseError> {
    let start = stream.current_pos();
    let range = stream.current_range();
    match stream.peek() {
        Some(Token::IntLit(_)) => {
            let Some(Token::IntLit(v)) = stream.advance().cloned() else {
                unreachable!("peeked int literal vanished");
            };
            Ok(Expr::new(ExprKind::IntLit(v), range))
        }
        Some(Token::FloatLit(_)) => {
            let Some(Token::FloatLit(v)) = stream.advance().cloned() else {
                unreachable!("peeked float literal vanished");
            };
            Ok(Expr::new(ExprKind::FloatLit(v), range))
        }
        Some(Token::StringLit(_)) => {
            let Some(Token::StringLit(s)) = stream.advance().cloned() else {
                unreachable!("peeked string literal vanished");
            };
            Ok(Expr::new(ExprKind::StringLit(s), range))
        }
        Some(Token::True) => {
            stream.advance();
            Ok(Expr::new(ExprKind::BoolLit(true), range))
        }
        Some(Token::False) => {
            stream.advance();
            Ok(Expr::new(ExprKind::BoolLit(false), range))
        }
        Some(Token::Ident(_)) => {
            let Some(Token::Ident(name)) = stream.advance().cloned() else {
                unreachable!("peeked identifier vanished");
            };
            Ok(Expr::new(ExprKind::Ident(name), range))
        }
        Some(Token::LParen) => {
            stream.advance();
            let inner = parse_expr(stream)?;
            stream.expect(Token::RParen)?;
            Ok(Expr::new(
                ExprKind::Paren(Box::new(inner)),
                stream.range_from(start),
            ))
        }
        Some(Token::VecOpen) => {
            stream.advance();
            let mut parts = vec![parse_expr(stream)?];
            while stream.eat(&Token::Comma) {
                parts.push(parse_expr(stream)?);
            }
            stream.expect(Token::VecClose)?;
            Ok(Expr::new(
                ExprKind::Vector(parts),
                stream.range_from(start),
            ))
        }
        found => Err(ParseError::unexpected(found, "in expression", range)),
    }
}

/// Parenthesized comma-separated argument list.
fn parse_call_args(stream: &mut TokenStream) -> Result<Vec<Expr>, ParseError> {
    stream.expect(Token::LParen)?;
    let mut args = Vec::new();
    if !stream.check(&Token::RParen) {
        args.push(parse_expr(stream)?);
        while stream.eat(&Token::Comma) {
            args.push(parse_expr(stream)?);
        }
    }
    stream.expect(Token::RParen)?;
    Ok(args)
}
