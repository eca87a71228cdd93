//! # Tokenizer
//!
//! Lexical analysis of agent program text. [`Tokenizer::tokenize`](token::Tokenizer::tokenize)
//! turns source into a stream of [`TokenSpan`](token::TokenSpan)s, each carrying the
//! line and column it started at so the parser can attach positions to statements.
//!
//! Whitespace, newlines and comments are kept as tokens; [`token::significant`] drops
//! them before parsing.
//!
//! * [`token`]: token types and the tokenizer loop
//! * [`keyword`]: reserved words
//! * [`symbol`]: delimiters
//! * [`literal`]: numbers, strings, `true`/`false`/`null`
//! * [`whitespace`]: spaces, tabs and line breaks
//! * [`comment`]: `//` and `/* */` comments

pub mod comment;
pub mod keyword;
pub mod literal;
pub mod symbol;
pub mod token;
pub mod whitespace;

pub use token::{Token, TokenSpan, Tokenizer, TokenizerError};
