// Lexer for SPIR-V assembly text.
//
// Tokenizes the textual form accepted by `spirv-as` just far enough to find
// where each instruction starts and which `%name` it defines. Operand syntax
// beyond that (enumerants, numbers, strings) is tokenized but not checked.
// Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// SPIR-V assembly token types.
///
/// `Id`, `Word` and `Number` carry no value; use the span to retrieve the
/// text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|;[^\n]*")]
pub enum Token {
    #[token("=")]
    Equals,

    /// Result or operand id: `%42`, `%main`, `%_ptr_Function_int`.
    #[regex(r"%[A-Za-z0-9_.\-]+")]
    Id,

    /// Opcode name, enumerant or extended-instruction name.
    #[regex(r"[A-Za-z_][A-Za-z0-9_.]*")]
    Word,

    /// Integer or floating-point literal, decimal or hex.
    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?")]
    #[regex(r"-?0[xX][0-9a-fA-F]+")]
    Number,

    /// Immediate word, `!<integer>`, copied into the binary verbatim.
    #[regex(r"![0-9]+|!0[xX][0-9a-fA-F]+")]
    Immediate,

    /// String literal; a backslash escapes the following character.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    #[token("|")]
    Pipe,
}

impl Token {
    /// Whether this token is an instruction name: `Op` followed by an
    /// uppercase letter. Enumerants such as `OpenCL` or `OpenCL_C` are not.
    pub fn is_opcode(&self, text: &str) -> bool {
        matches!(self, Token::Word)
            && text
                .strip_prefix("Op")
                .and_then(|rest| rest.chars().next())
                .is_some_and(|c| c.is_ascii_uppercase())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Equals => write!(f, "="),
            Token::Id => write!(f, "<id>"),
            Token::Word => write!(f, "<word>"),
            Token::Number => write!(f, "<number>"),
            Token::Immediate => write!(f, "<immediate>"),
            Token::StringLit(s) => write!(f, "\"{s}\""),
            Token::Pipe => write!(f, "|"),
        }
    }
}

// ── Callbacks ──

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            result.push(chars.next()?);
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex SPIR-V assembly into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
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

// ── Line index ──

/// Converts byte offsets to 1-based (line, column) pairs; columns count chars.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            source,
            line_starts,
        }
    }

    pub fn line_col(&self, offset: usize) -> (u32, u32) {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        let column = self.source[start..offset].chars().count();
        (line as u32 + 1, column as u32 + 1)
    }
}
