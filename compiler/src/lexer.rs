// Lexer for SNEX source text.
//
// Tokenizes a C-like expression-language source into a token stream with
// byte-offset spans. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues
//   so the parser can report the first error with full context.
// Side effects: none.

use logos::Logos;
use serde::Serialize;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// A span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors.
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// SNEX token types.
///
/// Keywords and symbols are matched as fixed strings. Literals carry parsed
/// values. Identifiers carry no value — use the span to retrieve the text
/// from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|//[^\n]*|/\*[^*]*\*+([^/*][^*]*\*+)*/")]
pub enum Token {
    // ── Keywords ──
    #[token("void")]
    Void,
    #[token("int")]
    Int,
    #[token("float")]
    Float,
    #[token("double")]
    Double,
    #[token("block")]
    Block,
    #[token("event")]
    Event,
    #[token("span")]
    Span_,
    #[token("struct")]
    Struct,
    #[token("template")]
    Template,
    #[token("typename")]
    Typename,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semicolon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("::")]
    DoubleColon,
    #[token("$")]
    Dollar,

    // ── Operators ──
    //
    // Compound assignment tokens must appear before their single-character
    // prefixes so the longer match wins.
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("=")]
    Assign,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("!")]
    Not,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,

    // ── Literals ──
    //
    // Float (trailing `f`) must appear before Double so the longer match
    // (digits + fraction + suffix) wins; Double before Int for the same
    // reason. Negative numbers are produced by the parser's unary minus.
    /// Single-precision literal (e.g. `1.5f`).
    #[regex(r"[0-9]+\.[0-9]+f", parse_float)]
    FloatLit(f32),

    /// Double-precision literal (e.g. `1.5`).
    #[regex(r"[0-9]+\.[0-9]+", parse_double)]
    DoubleLit(f64),

    /// Integer literal.
    #[regex(r"[0-9]+", parse_int)]
    IntLit(i64),

    // ── Identifier ──
    //
    // Placed after keywords — logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `int` matches Int, not Ident.
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Void => write!(f, "void"),
            Token::Int => write!(f, "int"),
            Token::Float => write!(f, "float"),
            Token::Double => write!(f, "double"),
            Token::Block => write!(f, "block"),
            Token::Event => write!(f, "event"),
            Token::Span_ => write!(f, "span"),
            Token::Struct => write!(f, "struct"),
            Token::Template => write!(f, "template"),
            Token::Typename => write!(f, "typename"),
            Token::Return => write!(f, "return"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::While => write!(f, "while"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Semicolon => write!(f, ";"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::DoubleColon => write!(f, "::"),
            Token::Dollar => write!(f, "$"),
            Token::PlusAssign => write!(f, "+="),
            Token::MinusAssign => write!(f, "-="),
            Token::StarAssign => write!(f, "*="),
            Token::SlashAssign => write!(f, "/="),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Le => write!(f, "<="),
            Token::Ge => write!(f, ">="),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Assign => write!(f, "="),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Not => write!(f, "!"),
            Token::Question => write!(f, "?"),
            Token::Colon => write!(f, ":"),
            Token::FloatLit(v) => write!(f, "{v}f"),
            Token::DoubleLit(v) => write!(f, "{v}"),
            Token::IntLit(v) => write!(f, "{v}"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_int(lex: &mut logos::Lexer<'_, Token>) -> Option<i64> {
    lex.slice().parse().ok()
}

fn parse_double(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_float(lex: &mut logos::Lexer<'_, Token>) -> Option<f32> {
    let slice = lex.slice();
    slice[..slice.len() - 1].parse().ok() // strip `f` suffix
}

// ── Public API ──

/// Lex a SNEX source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal here: errors are collected
/// and the lexer continues past bad characters; the parser aborts on the
/// first one.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords() {
        let tokens = lex_ok("void int float double block event span struct template typename");
        assert_eq!(
            tokens,
            vec![
                Token::Void,
                Token::Int,
                Token::Float,
                Token::Double,
                Token::Block,
                Token::Event,
                Token::Span_,
                Token::Struct,
                Token::Template,
                Token::Typename,
            ]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `integer` is an identifier, not keyword `int` + `eger`
        let tokens = lex_ok("int integer");
        assert_eq!(tokens, vec![Token::Int, Token::Ident]);
    }

    #[test]
    fn literals() {
        let tokens = lex_ok("42 1.5 2.25f");
        assert_eq!(
            tokens,
            vec![
                Token::IntLit(42),
                Token::DoubleLit(1.5),
                Token::FloatLit(2.25),
            ]
        );
    }

    #[test]
    fn compound_operators_win_over_prefixes() {
        let tokens = lex_ok("+= == <= >= && || ::");
        assert_eq!(
            tokens,
            vec![
                Token::PlusAssign,
                Token::EqEq,
                Token::Le,
                Token::Ge,
                Token::AndAnd,
                Token::OrOr,
                Token::DoubleColon,
            ]
        );
    }

    #[test]
    fn template_angle_brackets() {
        let tokens = lex_ok("wrap::fix<2, X>");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::DoubleColon,
                Token::Ident,
                Token::Lt,
                Token::IntLit(2),
                Token::Comma,
                Token::Ident,
                Token::Gt,
            ]
        );
    }

    #[test]
    fn comments_skipped() {
        let tokens = lex_ok("a // line comment\nb /* block\ncomment */ c");
        assert_eq!(tokens, vec![Token::Ident, Token::Ident, Token::Ident]);
    }

    #[test]
    fn block_comments_with_interior_stars() {
        let tokens = lex_ok("/* one */ a /* two * stars ** here */ b /**/ c");
        assert_eq!(tokens, vec![Token::Ident, Token::Ident, Token::Ident]);
    }

    #[test]
    fn spans_correct() {
        let result = lex("int x");
        assert!(result.errors.is_empty());
        assert_eq!(result.tokens.len(), 2);
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 3 });
        assert_eq!(result.tokens[1].1, Span { start: 4, end: 5 });
    }

    #[test]
    fn error_recovery() {
        let result = lex("foo ~ bar");
        // `~` is not a valid token
        let tokens: Vec<Token> = result.tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(tokens, vec![Token::Ident, Token::Ident]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 4, end: 5 });
    }

    #[test]
    fn callback_source_snippet() {
        let source = "float processSample(float input) { return input * 0.5f; }";
        let tokens = lex_ok(source);
        assert_eq!(
            tokens,
            vec![
                Token::Float,
                Token::Ident, // processSample
                Token::LParen,
                Token::Float,
                Token::Ident, // input
                Token::RParen,
                Token::LBrace,
                Token::Return,
                Token::Ident, // input
                Token::Star,
                Token::FloatLit(0.5),
                Token::Semicolon,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn member_call_chain() {
        let tokens = lex_ok("obj.getWrappedObject().f.size()");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::Dot,
                Token::Ident,
                Token::LParen,
                Token::RParen,
                Token::Dot,
                Token::Ident,
                Token::Dot,
                Token::Ident,
                Token::LParen,
                Token::RParen,
            ]
        );
    }
}
