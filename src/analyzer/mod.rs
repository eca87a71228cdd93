//! Turns a token stream into a [`Program`](crate::ast::Program).
//!
//! Parsers are built from the small combinator set in [`combinators`] and work over
//! the significant tokens only (whitespace and comments are dropped first).

pub mod combinators;
pub mod core;
pub mod parsers;
pub mod prelude;

pub use core::ParseError;
pub use core::ParseResult;
pub use core::Parser;

use crate::{
    ast::{Program, ProgramId},
    tokenizer::{token::significant, Tokenizer},
    ChariotResult,
};

/// Tokenizes and parses a whole program. Trailing input that does not form a
/// statement is an error pointing at the first offending token.
#[tracing::instrument(level = "debug", skip(source))]
pub fn parse_program(source: &str, id: ProgramId) -> ChariotResult<Program> {
    let tokens = significant(Tokenizer::new().tokenize(source)?);
    let (pos, statements) = parsers::parse_statements().parse(&tokens, 0)?;

    if let Some(next) = tokens.get(pos) {
        let cause = parsers::parse_statement()
            .parse(&tokens, pos)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        let error = ParseError::ParseError {
            message: format!("unexpected token '{}': {}", next.token, cause),
            found: next.token.to_string(),
            position: (next.line, next.column),
        };
        tracing::debug!("{}", error);
        return Err(error.into());
    }

    Ok(Program { id, statements })
}
