use thiserror::Error;

use crate::tokenizer::TokenSpan;

/// A parser over a slice of already-tokenized input. Returns the position after
/// the consumed input together with the parsed value.
pub trait Parser<I, O> {
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<O>;
}

pub type ParseResult<O> = Result<(usize, O), ParseError>;

/// Input items that know where they came from in the source text.
pub trait Spanned {
    fn line_column(&self) -> (usize, usize);
}

impl Spanned for TokenSpan {
    fn line_column(&self) -> (usize, usize) {
        (self.line, self.column)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Parse error: {message} (found '{found}' at line {}, column {})", position.0, position.1)]
    ParseError {
        message: String,
        found: String,
        position: (usize, usize),
    },
    #[error("Unexpected EOF")]
    EOF,
    #[error("Unexpected token")]
    Unexpected,
    #[error("No alternative")]
    NoAlternative,
    #[error("WithContext: {message}, {inner}")]
    WithContext {
        message: String,
        inner: Box<ParseError>,
    },
}
