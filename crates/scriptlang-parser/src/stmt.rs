//! Statement parsing.
//!
//! Statements are line-terminated; every simple statement consumes its own
//! trailing end-of-line, and block statements consume their closing keyword
//! plus its end-of-line. Recovery happens one level up: a failed statement
//! is reported and the stream skips to the next line.

use crate::decl::{looks_like_declaration, parse_declarators, parse_type_ref};
use crate::expr::parse_expr;
use crate::{ParseError, TokenStream};
use scriptlang_ast::{BinaryOp, ExprKind, Stmt, SwitchCase};
use scriptlang_lexer::Token;

/// Parse statements until one of `terminators` (not consumed) or EOF.
///
/// Errors inside the block are appended to `errors` and parsing resumes at
/// the next line, so one bad statement never hides the rest of a body.
pub fn parse_block(
    stream: &mut TokenStream,
    terminators: &[Token],
    errors: &mut Vec<ParseError>,
) -> Vec<Stmt> {
    let mut body = Vec::new();
    loop {
        stream.skip_eols();
        if stream.at_end() {
            break;
        }
        if terminators.iter().any(|t| stream.check(t)) {
            break;
        }
        if looks_like_declaration(stream) {
            // `FLOAT x, y = 1.0` declares one local per declarator.
            match parse_local_decls(stream) {
                Ok(decls) => body.extend(decls.into_iter().map(Stmt::Var)),
                Err(err) => {
                    errors.push(err);
                    stream.recover_to_eol();
                }
            }
            continue;
        }
        match parse_stmt(stream, errors) {
            Ok(stmt) => body.push(stmt),
            Err(err) => {
                errors.push(err);
                stream.recover_to_eol();
            }
        }
    }
    body
}

fn parse_stmt(stream: &mut TokenStream, errors: &mut Vec<ParseError>) -> Result<Stmt, ParseError> {
    match stream.peek() {
        Some(Token::If) => parse_if(stream, errors),
        Some(Token::While) => parse_while(stream, errors),
        Some(Token::Repeat) => parse_repeat(stream, errors),
        Some(Token::Switch) => parse_switch(stream, errors),
        Some(Token::Break) => {
            let range = stream.current_range();
            stream.advance();
            stream.expect_eol()?;
            Ok(Stmt::Break { range })
        }
        Some(Token::Return) => {
            let start = stream.current_pos();
            stream.advance();
            let value = if stream.check(&Token::Eol) || stream.at_end() {
                None
            } else {
                Some(parse_expr(stream)?)
            };
            let range = stream.range_from(start);
            stream.expect_eol()?;
            Ok(Stmt::Return { value, range })
        }
        _ => parse_expr_led(stream),
    }
}

/// Local variable declaration line: `TYPE [&] name [suffixes] [= init] {, …}`.
fn parse_local_decls(
    stream: &mut TokenStream,
) -> Result<Vec<scriptlang_ast::VarDecl>, ParseError> {
    let ty = parse_type_ref(stream)?;
    let decls = parse_declarators(stream, ty)?;
    stream.expect_eol()?;
    Ok(decls)
}

/// Assignment or bare invocation.
fn parse_expr_led(stream: &mut TokenStream) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    let lhs = parse_expr(stream)?;

    let compound = match stream.peek() {
        Some(Token::Assign) => Some(None),
        Some(Token::PlusAssign) => Some(Some(BinaryOp::Add)),
        Some(Token::MinusAssign) => Some(Some(BinaryOp::Sub)),
        Some(Token::StarAssign) => Some(Some(BinaryOp::Mul)),
        Some(Token::SlashAssign) => Some(Some(BinaryOp::Div)),
        _ => None,
    };

    if let Some(op) = compound {
        stream.advance();
        let rhs = parse_expr(stream)?;
        let range = stream.range_from(start);
        stream.expect_eol()?;
        return Ok(Stmt::Assign {
            lhs,
            op,
            rhs,
            range,
        });
    }

    let range = stream.range_from(start);
    stream.expect_eol()?;
    match lhs.kind {
        ExprKind::Invoke { .. } => Ok(Stmt::Invoke { call: lhs, range }),
        _ => Err(ParseError::invalid(
            "expression statement must be an invocation",
            range,
        )),
    }
}

fn parse_if(stream: &mut TokenStream, errors: &mut Vec<ParseError>) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::If)?;
    let cond = parse_expr(stream)?;
    stream.expect_eol()?;

    let then_body = parse_block(stream, &[Token::Else, Token::EndIf], errors);

    let else_body = if stream.eat(&Token::Else) {
        stream.expect_eol()?;
        Some(parse_block(stream, &[Token::EndIf], errors))
    } else {
        None
    };

    stream.expect(Token::EndIf)?;
    let range = stream.range_from(start);
    stream.expect_eol()?;
    Ok(Stmt::If {
        cond,
        then_body,
        else_body,
        range,
    })
}

fn parse_while(stream: &mut TokenStream, errors: &mut Vec<ParseError>) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::While)?;
    let cond = parse_expr(stream)?;
    stream.expect_eol()?;

    let body = parse_block(stream, &[Token::EndWhile], errors);

    stream.expect(Token::EndWhile)?;
    let range = stream.range_from(start);
    stream.expect_eol()?;
    Ok(Stmt::While { cond, body, range })
}

fn parse_repeat(stream: &mut TokenStream, errors: &mut Vec<ParseError>) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Repeat)?;
    let limit = parse_expr(stream)?;
    let counter = parse_expr(stream)?;
    stream.expect_eol()?;

    let body = parse_block(stream, &[Token::EndRepeat], errors);

    stream.expect(Token::EndRepeat)?;
    let range = stream.range_from(start);
    stream.expect_eol()?;
    Ok(Stmt::Repeat {
        limit,
        counter,
        body,
        range,
    })
}

fn parse_switch(stream: &mut TokenStream, errors: &mut Vec<ParseError>) -> Result<Stmt, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Switch)?;
    let value = parse_expr(stream)?;
    stream.expect_eol()?;

    let mut cases = Vec::new();
    let mut default = None;

    loop {
        stream.skip_eols();
        match stream.peek() {
            Some(Token::Case) => {
                let case_start = stream.current_pos();
                stream.advance();
                let case_value = parse_expr(stream)?;
                stream.expect_eol()?;
                let body = parse_block(
                    stream,
                    &[Token::Case, Token::Default, Token::EndSwitch],
                    errors,
                );
                cases.push(SwitchCase {
                    value: case_value,
                    body,
                    range: stream.range_from(case_start),
                });
            }
            Some(Token::Default) => {
                let default_range = stream.current_range();
                stream.advance();
                stream.expect_eol()?;
                let body = parse_block(
                    stream,
                    &[Token::Case, Token::Default, Token::EndSwitch],
                    errors,
                );
                if default.replace(body).is_some() {
                    errors.push(ParseError::invalid(
                        "SWITCH has more than one DEFAULT",
                        default_range,
                    ));
                }
            }
            _ => break,
        }
    }

    stream.expect(Token::EndSwitch)?;
    let range = stream.range_from(start);
    stream.expect_eol()?;
    Ok(Stmt::Switch {
        value,
        cases,
        default,
        range,
    })
}
