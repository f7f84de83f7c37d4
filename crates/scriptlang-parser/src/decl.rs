//! Top-level declaration parsing.

use crate::expr::parse_expr;
use crate::stmt::parse_block;
use crate::{ParseError, TokenStream};
use scriptlang_ast::{Decl, FunctionDecl, FunctionProvenance, TypeRef, TypeWrapper, Unit, VarDecl};
use scriptlang_lexer::Token;

/// Parse a whole translation unit.
///
/// Never fails as a whole: declarations that don't parse are reported and
/// the stream synchronizes to the next top-level keyword.
pub fn parse_unit(stream: &mut TokenStream) -> (Unit, Vec<ParseError>) {
    let mut unit = Unit::default();
    let mut errors = Vec::new();

    loop {
        stream.skip_eols();
        if stream.at_end() {
            break;
        }
        match parse_decl(stream, &mut errors) {
            Ok(decls) => unit.decls.extend(decls),
            Err(err) => {
                errors.push(err);
                stream.recover_to_eol();
                stream.synchronize();
            }
        }
    }

    (unit, errors)
}

fn parse_decl(
    stream: &mut TokenStream,
    errors: &mut Vec<ParseError>,
) -> Result<Vec<Decl>, ParseError> {
    match stream.peek() {
        Some(Token::ScriptName) => {
            let start = stream.current_pos();
            stream.advance();
            let (name, _) = stream.expect_ident("after SCRIPT_NAME")?;
            let range = stream.range_from(start);
            stream.expect_eol()?;
            Ok(vec![Decl::ScriptName { name, range }])
        }
        Some(Token::ScriptHash) => {
            let start = stream.current_pos();
            stream.advance();
            let hash = expect_int(stream, "after SCRIPT_HASH")? as u32;
            let range = stream.range_from(start);
            stream.expect_eol()?;
            Ok(vec![Decl::ScriptHash { hash, range }])
        }
        Some(Token::Using) => {
            let start = stream.current_pos();
            stream.advance();
            let path = expect_string(stream, "after USING")?;
            let range = stream.range_from(start);
            stream.expect_eol()?;
            Ok(vec![Decl::Using { path, range }])
        }
        Some(Token::Struct) => parse_struct(stream, errors).map(|d| vec![d]),
        Some(Token::Const) => {
            stream.advance();
            let ty = parse_type_ref(stream)?;
            let decls = parse_declarators(stream, ty)?;
            stream.expect_eol()?;
            for decl in &decls {
                if decl.init.is_none() {
                    return Err(ParseError::invalid(
                        format!("CONST '{}' requires an initializer", decl.name),
                        decl.range,
                    ));
                }
            }
            Ok(decls.into_iter().map(Decl::Const).collect())
        }
        Some(Token::Global) => parse_global(stream, errors).map(|d| vec![d]),
        Some(Token::Proc) | Some(Token::Func) => {
            parse_function(stream, FunctionProvenance::Defined, errors).map(|d| vec![d])
        }
        Some(Token::Proto) => {
            stream.advance();
            parse_header_only(stream, FunctionProvenance::Prototype).map(|d| vec![d])
        }
        Some(Token::Native) => {
            stream.advance();
            parse_header_only(stream, FunctionProvenance::Native).map(|d| vec![d])
        }
        Some(Token::Ident(_)) => {
            // Type-name-led line: script statics.
            let ty = parse_type_ref(stream)?;
            let decls = parse_declarators(stream, ty)?;
            stream.expect_eol()?;
            Ok(decls.into_iter().map(Decl::Static).collect())
        }
        found => Err(ParseError::unexpected(
            found,
            "at top level",
            stream.current_range(),
        )),
    }
}

fn parse_struct(stream: &mut TokenStream, errors: &mut Vec<ParseError>) -> Result<Decl, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Struct)?;
    let (name, name_range) = stream.expect_ident("after STRUCT")?;
    stream.expect_eol()?;

    let mut fields = Vec::new();
    loop {
        stream.skip_eols();
        if stream.check(&Token::EndStruct) || stream.at_end() {
            break;
        }
        match parse_field_line(stream) {
            Ok(decls) => fields.extend(decls),
            Err(err) => {
                errors.push(err);
                stream.recover_to_eol();
            }
        }
    }

    stream.expect(Token::EndStruct)?;
    let range = stream.range_from(start);
    stream.expect_eol()?;
    Ok(Decl::Struct {
        name,
        name_range,
        fields,
        range,
    })
}

fn parse_field_line(stream: &mut TokenStream) -> Result<Vec<VarDecl>, ParseError> {
    let ty = parse_type_ref(stream)?;
    let decls = parse_declarators(stream, ty)?;
    stream.expect_eol()?;
    for decl in &decls {
        if decl.init.is_some() {
            return Err(ParseError::invalid(
                format!("struct field '{}' may not have an initializer", decl.name),
                decl.range,
            ));
        }
    }
    Ok(decls)
}

fn parse_global(stream: &mut TokenStream, errors: &mut Vec<ParseError>) -> Result<Decl, ParseError> {
    let start = stream.current_pos();
    stream.expect(Token::Global)?;
    let block = expect_int(stream, "as GLOBAL block index")? as u32;
    let (owner, _) = stream.expect_ident("as GLOBAL owner")?;
    stream.expect_eol()?;

    let mut vars = Vec::new();
    loop {
        stream.skip_eols();
        if stream.check(&Token::EndGlobal) || stream.at_end() {
            break;
        }
        let line = parse_type_ref(stream)
            .and_then(|ty| parse_declarators(stream, ty))
            .and_then(|decls| stream.expect_eol().map(|()| decls));
        match line {
            Ok(decls) => vars.extend(decls),
            Err(err) => {
                errors.push(err);
                stream.recover_to_eol();
            }
        }
    }

    stream.expect(Token::EndGlobal)?;
    let range = stream.range_from(start);
    stream.expect_eol()?;
    Ok(Decl::Global {
        block,
        owner,
        vars,
        range,
    })
}

fn parse_function(
    stream: &mut TokenStream,
    provenance: FunctionProvenance,
    errors: &mut Vec<ParseError>,
) -> Result<Decl, ParseError> {
    let start = stream.current_pos();
    let is_func = stream.check(&Token::Func);
    let mut decl = parse_signature(stream, provenance)?;
    stream.expect_eol()?;

    let end_token = if is_func { Token::EndFunc } else { Token::EndProc };
    let body = parse_block(stream, &[end_token.clone()], errors);
    stream.expect(end_token)?;
    decl.body = Some(body);
    decl.range = stream.range_from(start);
    stream.expect_eol()?;
    Ok(Decl::Function(decl))
}

fn parse_header_only(
    stream: &mut TokenStream,
    provenance: FunctionProvenance,
) -> Result<Decl, ParseError> {
    let start = stream.current_pos();
    let mut decl = parse_signature(stream, provenance)?;
    decl.range = stream.range_from(start);
    stream.expect_eol()?;
    Ok(Decl::Function(decl))
}

/// `PROC id(params)` / `FUNC T id(params)` — shared by all provenances.
fn parse_signature(
    stream: &mut TokenStream,
    provenance: FunctionProvenance,
) -> Result<FunctionDecl, ParseError> {
    let start = stream.current_pos();
    let ret = if stream.eat(&Token::Func) {
        Some(parse_type_ref(stream)?)
    } else if stream.eat(&Token::Proc) {
        None
    } else {
        return Err(ParseError::expected(
            "PROC or FUNC",
            stream.peek(),
            stream.current_range(),
        ));
    };

    let (name, name_range) = stream.expect_ident("as function name")?;

    stream.expect(Token::LParen)?;
    let mut params = Vec::new();
    if !stream.check(&Token::RParen) {
        params.push(parse_param(stream)?);
        while stream.eat(&Token::Comma) {
            params.push(parse_param(stream)?);
        }
    }
    stream.expect(Token::RParen)?;

    Ok(FunctionDecl {
        name,
        name_range,
        ret,
        params,
        body: None,
        provenance,
        range: stream.range_from(start),
    })
}

/// One parameter: `TYPE [&] name [array suffixes]`, no initializer.
fn parse_param(stream: &mut TokenStream) -> Result<VarDecl, ParseError> {
    let start = stream.current_pos();
    let ty = parse_type_ref(stream)?;
    let (name, name_range) = stream.expect_ident("as parameter name")?;
    let ty = with_array_suffixes(stream, ty)?;
    Ok(VarDecl {
        ty,
        name,
        name_range,
        init: None,
        range: stream.range_from(start),
    })
}

/// Base type reference: identifier plus optional `&` reference marker.
pub fn parse_type_ref(stream: &mut TokenStream) -> Result<TypeRef, ParseError> {
    let start = stream.current_pos();
    let (base, _) = stream.expect_ident("as type name")?;
    let mut wrappers = Vec::new();
    if stream.eat(&Token::Amp) {
        wrappers.push(TypeWrapper::Ref);
    }
    Ok(TypeRef {
        base,
        wrappers,
        range: stream.range_from(start),
    })
}

/// Comma-separated declarator list sharing one base type:
/// `name [suffixes] [= init] {, name [suffixes] [= init]}`.
pub fn parse_declarators(
    stream: &mut TokenStream,
    ty: TypeRef,
) -> Result<Vec<VarDecl>, ParseError> {
    let mut decls = Vec::new();
    loop {
        let start = stream.current_pos();
        let (name, name_range) = stream.expect_ident("as declarator name")?;
        let decl_ty = with_array_suffixes(stream, ty.clone())?;
        let init = if stream.eat(&Token::Assign) {
            Some(parse_expr(stream)?)
        } else {
            None
        };
        let range = ty.range.merge(&stream.range_from(start));
        decls.push(VarDecl {
            ty: decl_ty,
            name,
            name_range,
            init,
            range,
        });
        if !stream.eat(&Token::Comma) {
            break;
        }
    }
    Ok(decls)
}

/// Append `[len]` suffixes to a type reference, outermost-first.
fn with_array_suffixes(stream: &mut TokenStream, mut ty: TypeRef) -> Result<TypeRef, ParseError> {
    while stream.eat(&Token::LBracket) {
        let len = parse_expr(stream)?;
        stream.expect(Token::RBracket)?;
        ty.wrappers.push(TypeWrapper::Array(len));
    }
    Ok(ty)
}

/// A line is a declaration when it opens with `Ident Ident` or `Ident & Ident`.
pub fn looks_like_declaration(stream: &TokenStream) -> bool {
    matches!(stream.peek(), Some(Token::Ident(_)))
        && match stream.peek_nth(1) {
            Some(Token::Ident(_)) => true,
            Some(Token::Amp) => matches!(stream.peek_nth(2), Some(Token::Ident(_))),
            _ => false,
        }
}

fn expect_int(stream: &mut TokenStream, context: &str) -> Result<i64, ParseError> {
    let range = stream.current_range();
    match stream.peek() {
        Some(Token::IntLit(_)) => {
            let Some(Token::IntLit(v)) = stream.advance().cloned() else {
                unreachable!("peeked int literal vanished");
            };
            Ok(v)
        }
        found => Err(ParseError::expected("integer literal", found, range).with_context(context)),
    }
}

fn expect_string(stream: &mut TokenStream, context: &str) -> Result<String, ParseError> {
    let range = stream.current_range();
    match stream.peek() {
        Some(Token::StringLit(_)) => {
            let Some(Token::StringLit(s)) = stream.advance().cloned() else {
                unreachable!("peeked string literal vanished");
            };
            Ok(s)
        }
        found => Err(ParseError::expected("string literal", found, range).with_context(context)),
    }
}
