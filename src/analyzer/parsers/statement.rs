use super::{
    super::{core::*, prelude::*},
    expression::parse_expression,
};
use crate::ast;
use crate::tokenizer::{symbol::Delimiter, TokenSpan};

use super::common::delimiter;

pub fn parse_statement() -> impl Parser<TokenSpan, ast::Statement> {
    with_context(
        map(
            tuple2(
                located(parse_expression()),
                optional(delimiter(Delimiter::Semicolon)),
            ),
            |(((line, column), expression), _)| ast::Statement {
                expression,
                line,
                column,
            },
        ),
        "statement",
    )
}

pub fn parse_statements() -> impl Parser<TokenSpan, Vec<ast::Statement>> {
    many(lazy(parse_statement))
}

pub fn parse_block() -> impl Parser<TokenSpan, ast::Block> {
    with_context(
        map(
            delimited(
                delimiter(Delimiter::OpenBrace),
                parse_statements(),
                delimiter(Delimiter::CloseBrace),
            ),
            ast::Block::new,
        ),
        "block",
    )
}
