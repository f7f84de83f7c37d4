// Allow unwrap in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Lexical analysis for ScriptLang source.
//!
//! Tokenization uses logos. ScriptLang statements are terminated by end of
//! line, so `\n` is a real token ([`Token::Eol`]) rather than skipped
//! trivia; spaces, tabs, carriage returns, and `//` line comments are
//! skipped.
//!
//! # Design
//!
//! - Keywords are case-insensitive (`ignore(ascii_case)`); identifiers
//!   preserve the case they were written in
//! - `<<` / `>>` delimit vector literals and outrank `<` / `>`
//! - Integer literals take decimal or `0x` hex form; floats are
//!   `<int>.<digits>`; strings use `"…"` or `'…'` with `\` escapes
//!
//! # Examples
//!
//! ```
//! # use scriptlang_lexer::*;
//! let (tokens, errors) = tokenize("PROC MAIN()\n");
//! assert!(errors.is_empty());
//! assert_eq!(tokens[0].0, Token::Proc);
//! ```

use logos::Logos;
use std::fmt;
use std::ops::Range;

/// ScriptLang token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+")] // Skip intra-line whitespace
#[logos(skip r"//[^\n]*")] // Skip line comments
pub enum Token {
    // === Keywords: top-level forms ===
    /// Keyword `SCRIPT_NAME`
    #[token("SCRIPT_NAME", ignore(ascii_case))]
    ScriptName,
    /// Keyword `SCRIPT_HASH`
    #[token("SCRIPT_HASH", ignore(ascii_case))]
    ScriptHash,
    /// Keyword `USING`
    #[token("USING", ignore(ascii_case))]
    Using,
    /// Keyword `PROC`
    #[token("PROC", ignore(ascii_case))]
    Proc,
    /// Keyword `ENDPROC`
    #[token("ENDPROC", ignore(ascii_case))]
    EndProc,
    /// Keyword `FUNC`
    #[token("FUNC", ignore(ascii_case))]
    Func,
    /// Keyword `ENDFUNC`
    #[token("ENDFUNC", ignore(ascii_case))]
    EndFunc,
    /// Keyword `PROTO`
    #[token("PROTO", ignore(ascii_case))]
    Proto,
    /// Keyword `NATIVE`
    #[token("NATIVE", ignore(ascii_case))]
    Native,
    /// Keyword `STRUCT`
    #[token("STRUCT", ignore(ascii_case))]
    Struct,
    /// Keyword `ENDSTRUCT`
    #[token("ENDSTRUCT", ignore(ascii_case))]
    EndStruct,
    /// Keyword `CONST`
    #[token("CONST", ignore(ascii_case))]
    Const,
    /// Keyword `GLOBAL`
    #[token("GLOBAL", ignore(ascii_case))]
    Global,
    /// Keyword `ENDGLOBAL`
    #[token("ENDGLOBAL", ignore(ascii_case))]
    EndGlobal,

    // === Keywords: statements ===
    /// Keyword `IF`
    #[token("IF", ignore(ascii_case))]
    If,
    /// Keyword `ELSE`
    #[token("ELSE", ignore(ascii_case))]
    Else,
    /// Keyword `ENDIF`
    #[token("ENDIF", ignore(ascii_case))]
    EndIf,
    /// Keyword `WHILE`
    #[token("WHILE", ignore(ascii_case))]
    While,
    /// Keyword `ENDWHILE`
    #[token("ENDWHILE", ignore(ascii_case))]
    EndWhile,
    /// Keyword `REPEAT`
    #[token("REPEAT", ignore(ascii_case))]
    Repeat,
    /// Keyword `ENDREPEAT`
    #[token("ENDREPEAT", ignore(ascii_case))]
    EndRepeat,
    /// Keyword `SWITCH`
    #[token("SWITCH", ignore(ascii_case))]
    Switch,
    /// Keyword `CASE`
    #[token("CASE", ignore(ascii_case))]
    Case,
    /// Keyword `DEFAULT`
    #[token("DEFAULT", ignore(ascii_case))]
    Default,
    /// Keyword `ENDSWITCH`
    #[token("ENDSWITCH", ignore(ascii_case))]
    EndSwitch,
    /// Keyword `BREAK`
    #[token("BREAK", ignore(ascii_case))]
    Break,
    /// Keyword `RETURN`
    #[token("RETURN", ignore(ascii_case))]
    Return,

    // === Keywords: operators and literals ===
    /// Keyword `NOT`
    #[token("NOT", ignore(ascii_case))]
    Not,
    /// Keyword `AND`
    #[token("AND", ignore(ascii_case))]
    And,
    /// Keyword `OR`
    #[token("OR", ignore(ascii_case))]
    Or,
    /// Boolean literal `TRUE`
    #[token("TRUE", ignore(ascii_case))]
    True,
    /// Boolean literal `FALSE`
    #[token("FALSE", ignore(ascii_case))]
    False,

    // === Operators ===
    /// Operator `=`
    #[token("=")]
    Assign,
    /// Operator `+=`
    #[token("+=")]
    PlusAssign,
    /// Operator `-=`
    #[token("-=")]
    MinusAssign,
    /// Operator `*=`
    #[token("*=")]
    StarAssign,
    /// Operator `/=`
    #[token("/=")]
    SlashAssign,
    /// Operator `+`
    #[token("+")]
    Plus,
    /// Operator `-`
    #[token("-")]
    Minus,
    /// Operator `*`
    #[token("*")]
    Star,
    /// Operator `/`
    #[token("/")]
    Slash,
    /// Operator `%`
    #[token("%")]
    Percent,
    /// Operator `&` (bitwise AND, and the declarator reference marker)
    #[token("&")]
    Amp,
    /// Operator `|`
    #[token("|")]
    Pipe,
    /// Operator `^`
    #[token("^")]
    Caret,
    /// Operator `==`
    #[token("==")]
    EqEq,
    /// Operator `<>`
    #[token("<>")]
    NotEq,
    /// Vector literal open `<<` (outranks two `<`)
    #[token("<<", priority = 12)]
    VecOpen,
    /// Vector literal close `>>` (outranks two `>`)
    #[token(">>", priority = 12)]
    VecClose,
    /// Operator `<`
    #[token("<", priority = 10)]
    Lt,
    /// Operator `<=`
    #[token("<=")]
    LtEq,
    /// Operator `>`
    #[token(">", priority = 10)]
    Gt,
    /// Operator `>=`
    #[token(">=")]
    GtEq,

    // === Delimiters ===
    /// Delimiter `(`
    #[token("(")]
    LParen,
    /// Delimiter `)`
    #[token(")")]
    RParen,
    /// Delimiter `[`
    #[token("[")]
    LBracket,
    /// Delimiter `]`
    #[token("]")]
    RBracket,
    /// Delimiter `,`
    #[token(",")]
    Comma,
    /// Delimiter `.`
    #[token(".")]
    Dot,
    /// End of line — the statement terminator
    #[token("\n")]
    Eol,

    // === Literals ===
    /// Integer literal, decimal or `0x` hex.
    ///
    /// Hex parses through u64 so the full 64-bit pattern space round-trips
    /// (native hashes are written as hex constants).
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| {
        u64::from_str_radix(&lex.slice()[2..], 16).ok().map(|v| v as i64)
    })]
    IntLit(i64),

    /// Float literal `<int>.<digits>`
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f32>().ok())]
    FloatLit(f32),

    /// String literal, `"…"` or `'…'`, `\` escapes
    #[regex(r#""([^"\\\n]|\\.)*""#, |lex| unescape(lex.slice()))]
    #[regex(r#"'([^'\\\n]|\\.)*'"#, |lex| unescape(lex.slice()))]
    StringLit(String),

    /// Identifier `[A-Za-z_][A-Za-z_0-9]*`
    #[regex(r"[A-Za-z_][A-Za-z_0-9]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Short description used in parse error messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Token::ScriptName => "SCRIPT_NAME",
            Token::ScriptHash => "SCRIPT_HASH",
            Token::Using => "USING",
            Token::Proc => "PROC",
            Token::EndProc => "ENDPROC",
            Token::Func => "FUNC",
            Token::EndFunc => "ENDFUNC",
            Token::Proto => "PROTO",
            Token::Native => "NATIVE",
            Token::Struct => "STRUCT",
            Token::EndStruct => "ENDSTRUCT",
            Token::Const => "CONST",
            Token::Global => "GLOBAL",
            Token::EndGlobal => "ENDGLOBAL",
            Token::If => "IF",
            Token::Else => "ELSE",
            Token::EndIf => "ENDIF",
            Token::While => "WHILE",
            Token::EndWhile => "ENDWHILE",
            Token::Repeat => "REPEAT",
            Token::EndRepeat => "ENDREPEAT",
            Token::Switch => "SWITCH",
            Token::Case => "CASE",
            Token::Default => "DEFAULT",
            Token::EndSwitch => "ENDSWITCH",
            Token::Break => "BREAK",
            Token::Return => "RETURN",
            Token::Not => "NOT",
            Token::And => "AND",
            Token::Or => "OR",
            Token::True => "TRUE",
            Token::False => "FALSE",
            Token::Assign => "'='",
            Token::PlusAssign => "'+='",
            Token::MinusAssign => "'-='",
            Token::StarAssign => "'*='",
            Token::SlashAssign => "'/='",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Star => "'*'",
            Token::Slash => "'/'",
            Token::Percent => "'%'",
            Token::Amp => "'&'",
            Token::Pipe => "'|'",
            Token::Caret => "'^'",
            Token::EqEq => "'=='",
            Token::NotEq => "'<>'",
            Token::VecOpen => "'<<'",
            Token::VecClose => "'>>'",
            Token::Lt => "'<'",
            Token::LtEq => "'<='",
            Token::Gt => "'>'",
            Token::GtEq => "'>='",
            Token::LParen => "'('",
            Token::RParen => "')'",
            Token::LBracket => "'['",
            Token::RBracket => "']'",
            Token::Comma => "','",
            Token::Dot => "'.'",
            Token::Eol => "end of line",
            Token::IntLit(_) => "integer literal",
            Token::FloatLit(_) => "float literal",
            Token::StringLit(_) => "string literal",
            Token::Ident(_) => "identifier",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "identifier '{name}'"),
            Token::IntLit(v) => write!(f, "integer {v}"),
            Token::FloatLit(v) => write!(f, "float {v}"),
            Token::StringLit(s) => write!(f, "string {s:?}"),
            other => f.write_str(other.describe()),
        }
    }
}

/// Strip quotes and process `\` escapes; `None` on a bad escape.
fn unescape(quoted: &str) -> Option<String> {
    let content = &quoted[1..quoted.len() - 1];
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => result.push('\n'),
                Some('r') => result.push('\r'),
                Some('t') => result.push('\t'),
                Some('0') => result.push('\0'),
                Some('\\') => result.push('\\'),
                Some('"') => result.push('"'),
                Some('\'') => result.push('\''),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

/// Tokenize a source string.
///
/// Returns tokens paired with their byte spans, plus the byte spans of any
/// unrecognized input. Lexing never aborts; errors are reported per bad
/// slice and scanning resumes after it.
pub fn tokenize(source: &str) -> (Vec<(Token, Range<usize>)>, Vec<Range<usize>>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    for (result, span) in Token::lexer(source).spanned() {
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(span),
        }
    }
    (tokens, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(source: &str) -> Vec<Token> {
        let (tokens, errors) = tokenize(source);
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(toks("PROC proc Proc"), vec![Token::Proc; 3]);
        assert_eq!(toks("endif ENDIF"), vec![Token::EndIf; 2]);
    }

    #[test]
    fn test_identifiers_preserve_case() {
        assert_eq!(
            toks("MyVar my_var"),
            vec![
                Token::Ident("MyVar".into()),
                Token::Ident("my_var".into())
            ]
        );
    }

    #[test]
    fn test_int_literals() {
        assert_eq!(toks("42"), vec![Token::IntLit(42)]);
        assert_eq!(toks("0x1F"), vec![Token::IntLit(31)]);
        assert_eq!(
            toks("0xFFFFFFFFFFFFFFFF"),
            vec![Token::IntLit(u64::MAX as i64)]
        );
    }

    #[test]
    fn test_float_literals() {
        assert_eq!(toks("1.5"), vec![Token::FloatLit(1.5)]);
        // "1." is not a float: int then dot
        assert_eq!(toks("1."), vec![Token::IntLit(1), Token::Dot]);
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(
            toks(r#""hello\n" 'it' ''"#),
            vec![
                Token::StringLit("hello\n".into()),
                Token::StringLit("it".into()),
                Token::StringLit(String::new()),
            ]
        );
    }

    #[test]
    fn test_vector_delimiters_outrank_comparisons() {
        assert_eq!(
            toks("<<1.0,2.0,3.0>>")[0],
            Token::VecOpen,
        );
        assert_eq!(toks("a < b"), vec![
            Token::Ident("a".into()),
            Token::Lt,
            Token::Ident("b".into()),
        ]);
    }

    #[test]
    fn test_eol_is_a_token() {
        assert_eq!(
            toks("PROC MAIN()\nENDPROC\n"),
            vec![
                Token::Proc,
                Token::Ident("MAIN".into()),
                Token::LParen,
                Token::RParen,
                Token::Eol,
                Token::EndProc,
                Token::Eol,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            toks("x = 1 // trailing comment\n"),
            vec![
                Token::Ident("x".into()),
                Token::Assign,
                Token::IntLit(1),
                Token::Eol,
            ]
        );
    }

    #[test]
    fn test_compound_assignment() {
        assert_eq!(
            toks("x += 2"),
            vec![
                Token::Ident("x".into()),
                Token::PlusAssign,
                Token::IntLit(2),
            ]
        );
    }

    #[test]
    fn test_bad_input_reports_span() {
        let (_, errors) = tokenize("x = @\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0], 4..5);
    }
}
