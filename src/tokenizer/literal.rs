use nom::{
    branch::alt,
    bytes::complete::take_while,
    character::complete::{char, digit1, one_of},
    combinator::{map, map_res, opt, recognize},
    error::{context, ContextError, ErrorKind, ParseError, VerboseError},
    sequence::{delimited, pair, tuple},
};

use super::token::{ParserResult, Token};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => f.write_str("null"),
        }
    }
}

#[tracing::instrument(level = "debug", skip(input))]
fn parse_number_literal(input: &str) -> ParserResult<Literal> {
    context(
        "number literal",
        map_res(
            recognize(tuple((
                opt(char('-')),
                digit1,
                opt(pair(char('.'), digit1)),
                opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
            ))),
            |s: &str| s.parse::<f64>().map(Literal::Number),
        ),
    )(input)
}

/// A `'` or `"` string. Backslash escapes are decoded; an unterminated string
/// is a hard failure so the tokenizer reports it instead of trying other tokens.
fn quoted(quote: char) -> impl Fn(&str) -> ParserResult<String> {
    move |input: &str| {
        let (mut rest, _) = char(quote)(input)?;
        let mut out = String::new();
        loop {
            let mut chars = rest.chars();
            match chars.next() {
                None => {
                    return Err(nom::Err::Failure(VerboseError::add_context(
                        input,
                        "unterminated string",
                        VerboseError::from_error_kind(rest, ErrorKind::Eof),
                    )))
                }
                Some(c) if c == quote => return Ok((chars.as_str(), out)),
                Some('\\') => {
                    let escaped = match chars.next() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('b') => '\u{8}',
                        Some('f') => '\u{c}',
                        Some(c @ ('\\' | '\'' | '"')) => c,
                        _ => {
                            return Err(nom::Err::Failure(VerboseError::add_context(
                                rest,
                                "invalid escape sequence",
                                VerboseError::from_error_kind(rest, ErrorKind::Escaped),
                            )))
                        }
                    };
                    out.push(escaped);
                }
                Some(c) => out.push(c),
            }
            rest = chars.as_str();
        }
    }
}

#[tracing::instrument(level = "debug", skip(input))]
fn parse_string_literal(input: &str) -> ParserResult<Literal> {
    context(
        "string literal",
        map(
            alt((
                quoted('"'),
                quoted('\''),
                map(
                    delimited(char('`'), take_while(|c| c != '`'), char('`')),
                    |raw: &str| raw.to_string(),
                ),
            )),
            Literal::String,
        ),
    )(input)
}

#[tracing::instrument(level = "debug", skip(input))]
pub fn parse_literal(input: &str) -> ParserResult<Token> {
    context(
        "literal",
        map(
            alt((parse_string_literal, parse_number_literal)),
            Token::Literal,
        ),
    )(input)
}
