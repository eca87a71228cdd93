use std::sync::Arc;

use super::{
    super::{core::*, prelude::*},
    common::*,
    statement::parse_block,
};
use crate::ast;
use crate::tokenizer::{keyword::Keyword, symbol::Delimiter, TokenSpan};

pub fn parse_expression() -> impl Parser<TokenSpan, ast::Expression> {
    with_context(
        choice(vec![
            Box::new(parse_if()),
            Box::new(parse_while()),
            Box::new(parse_switch()),
            Box::new(parse_function()),
            Box::new(parse_array()),
            Box::new(parse_call()),
            Box::new(map(parse_literal(), ast::Expression::Literal)),
            Box::new(map(parse_identifier(), ast::Expression::Variable)),
        ]),
        "expression",
    )
}

/// `( expr ) { ... }`, shared by `if`, `else if`, `while` and `case`.
fn parse_guarded_block() -> impl Parser<TokenSpan, (ast::Expression, ast::Block)> {
    tuple2(
        delimited(
            delimiter(Delimiter::OpenParen),
            lazy(parse_expression),
            delimiter(Delimiter::CloseParen),
        ),
        parse_block(),
    )
}

fn parse_if() -> impl Parser<TokenSpan, ast::Expression> {
    with_context(
        map(
            tuple3(
                preceded(keyword(Keyword::If), parse_guarded_block()),
                many(preceded(
                    tuple2(keyword(Keyword::Else), keyword(Keyword::If)),
                    parse_guarded_block(),
                )),
                optional(preceded(keyword(Keyword::Else), parse_block())),
            ),
            |(first, rest, otherwise)| {
                let mut branches = vec![first];
                branches.extend(rest);
                ast::Expression::If {
                    branches,
                    otherwise,
                }
            },
        ),
        "if",
    )
}

fn parse_while() -> impl Parser<TokenSpan, ast::Expression> {
    with_context(
        map(
            preceded(keyword(Keyword::While), parse_guarded_block()),
            |(condition, body)| ast::Expression::While {
                condition: Box::new(condition),
                body,
            },
        ),
        "while",
    )
}

fn parse_switch() -> impl Parser<TokenSpan, ast::Expression> {
    let subject = delimited(
        delimiter(Delimiter::OpenParen),
        optional(lazy(parse_expression)),
        delimiter(Delimiter::CloseParen),
    );
    let case = preceded(keyword(Keyword::Case), parse_guarded_block());
    let default = preceded(
        tuple2(
            keyword(Keyword::Default),
            optional(tuple2(
                delimiter(Delimiter::OpenParen),
                delimiter(Delimiter::CloseParen),
            )),
        ),
        parse_block(),
    );
    with_context(
        map(
            preceded(
                keyword(Keyword::Switch),
                tuple2(
                    subject,
                    delimited(
                        delimiter(Delimiter::OpenBrace),
                        tuple2(many(case), optional(default)),
                        delimiter(Delimiter::CloseBrace),
                    ),
                ),
            ),
            |(subject, (cases, default))| ast::Expression::Switch {
                subject: subject.map(Box::new),
                cases,
                default,
            },
        ),
        "switch",
    )
}

fn parse_function() -> impl Parser<TokenSpan, ast::Expression> {
    with_context(
        map(
            preceded(
                keyword(Keyword::Func),
                tuple2(parenthesized_list(parse_identifier()), parse_block()),
            ),
            |(params, body)| ast::Expression::Function {
                params,
                body: Arc::new(body),
            },
        ),
        "func",
    )
}

fn parse_array() -> impl Parser<TokenSpan, ast::Expression> {
    with_context(
        map(
            delimited(
                delimiter(Delimiter::OpenBracket),
                separated_list(lazy(parse_expression), parse_comma()),
                delimiter(Delimiter::CloseBracket),
            ),
            ast::Expression::Array,
        ),
        "array",
    )
}

fn parse_call() -> impl Parser<TokenSpan, ast::Expression> {
    with_context(
        map(
            tuple3(
                parse_identifier(),
                parenthesized_list(lazy(parse_expression)),
                optional(parse_block()),
            ),
            |(name, mut arguments, trailing)| {
                if let Some(block) = trailing {
                    arguments.push(ast::Expression::Block(block));
                }
                ast::Expression::Call { name, arguments }
            },
        ),
        "call",
    )
}
