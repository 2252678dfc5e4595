//! Test script language
//!
//! A small JavaScript-like language: lexer, parser, syntax tree and an async
//! tree-walking interpreter. Scripts declare suites and tests through the
//! globals installed by [`builtins`].

pub mod ast;
pub mod builtins;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod value;

use std::fmt;

pub use interp::Interp;
pub use lexer::Span;
pub use value::Value;

/// Lex or parse failure with the position it was detected at
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyntaxError: {} (line {}, column {})",
            self.message, self.span.line, self.span.column
        )
    }
}

impl std::error::Error for SyntaxError {}

/// Parse source text into a program
pub fn parse(source: &str) -> Result<ast::Program, SyntaxError> {
    let tokens = lexer::Lexer::new(source).tokenize()?;
    parser::Parser::new(&tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display_has_position() {
        let err = parse("let = 1").unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("SyntaxError: expected binding name"));
        assert!(text.contains("line 1, column 5"));
    }

    #[test]
    fn test_parse_empty_source() {
        assert!(parse("// nothing here\n").unwrap().body.is_empty());
    }
}
