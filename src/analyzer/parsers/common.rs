use super::super::{core::*, prelude::*};
use crate::ast;
use crate::tokenizer::{
    keyword::Keyword, literal::Literal, symbol::Delimiter, token::Token, TokenSpan,
};

pub fn token(expected: Token) -> impl Parser<TokenSpan, ()> {
    satisfy(move |span: &TokenSpan| (span.token == expected).then_some(()))
}

pub fn delimiter(d: Delimiter) -> impl Parser<TokenSpan, ()> {
    token(Token::Delimiter(d))
}

pub fn keyword(kw: Keyword) -> impl Parser<TokenSpan, ()> {
    with_context(token(Token::Keyword(kw.clone())), kw.to_string())
}

pub fn parse_comma() -> impl Parser<TokenSpan, ()> {
    with_context(delimiter(Delimiter::Comma), "comma")
}

pub fn parse_identifier() -> impl Parser<TokenSpan, String> {
    with_context(
        satisfy(|span: &TokenSpan| match &span.token {
            Token::Identifier(s) => Some(s.clone()),
            _ => None,
        }),
        "identifier",
    )
}

pub fn parse_literal() -> impl Parser<TokenSpan, ast::Literal> {
    with_context(
        satisfy(|span: &TokenSpan| match &span.token {
            Token::Literal(Literal::Number(n)) => Some(ast::Literal::Number(*n)),
            Token::Literal(Literal::String(s)) => Some(ast::Literal::String(s.clone())),
            Token::Literal(Literal::Boolean(b)) => Some(ast::Literal::Boolean(*b)),
            Token::Literal(Literal::Null) => Some(ast::Literal::Null),
            _ => None,
        }),
        "literal",
    )
}

/// `( item, item, ... )`
pub fn parenthesized_list<P, O>(item: P) -> impl Parser<TokenSpan, Vec<O>>
where
    P: Parser<TokenSpan, O>,
{
    delimited(
        delimiter(Delimiter::OpenParen),
        separated_list(item, parse_comma()),
        delimiter(Delimiter::CloseParen),
    )
}
