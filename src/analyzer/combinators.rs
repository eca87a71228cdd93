//! Generic parsers over token slices. Each one is a small struct implementing
//! [`Parser`]; the lowercase constructor next to it is what grammar code uses.

use std::marker::PhantomData;

use super::core::{ParseError, ParseResult, Parser, Spanned};

/// One input item accepted by a predicate that also produces the output.
#[derive(Clone)]
pub struct Satisfy<F>(F);

pub fn satisfy<I, O, F>(predicate: F) -> Satisfy<F>
where
    F: Fn(&I) -> Option<O>,
{
    Satisfy(predicate)
}

impl<I, O, F> Parser<I, O> for Satisfy<F>
where
    F: Fn(&I) -> Option<O>,
{
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<O> {
        let item = input.get(pos).ok_or(ParseError::EOF)?;
        match (self.0)(item) {
            Some(value) => Ok((pos + 1, value)),
            None => Err(ParseError::Unexpected),
        }
    }
}

/// Tries alternatives in order; the first success wins.
pub struct Choice<I, O>(Vec<Box<dyn Parser<I, O>>>);

pub fn choice<I, O>(alternatives: Vec<Box<dyn Parser<I, O>>>) -> Choice<I, O> {
    Choice(alternatives)
}

impl<I, O> Parser<I, O> for Choice<I, O> {
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<O> {
        self.0
            .iter()
            .find_map(|alternative| alternative.parse(input, pos).ok())
            .ok_or(ParseError::NoAlternative)
    }
}

/// Runs `first`, discards its output, then runs `second`.
#[derive(Clone)]
pub struct Preceded<P1, P2, O1> {
    first: P1,
    second: P2,
    _skipped: PhantomData<fn() -> O1>,
}

pub fn preceded<I, O1, O2, P1, P2>(first: P1, second: P2) -> Preceded<P1, P2, O1>
where
    P1: Parser<I, O1>,
    P2: Parser<I, O2>,
{
    Preceded {
        first,
        second,
        _skipped: PhantomData,
    }
}

impl<I, O1, O2, P1, P2> Parser<I, O2> for Preceded<P1, P2, O1>
where
    P1: Parser<I, O1>,
    P2: Parser<I, O2>,
{
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<O2> {
        let (pos, _) = self.first.parse(input, pos)?;
        self.second.parse(input, pos)
    }
}

#[derive(Clone)]
pub struct Map<P, F, A> {
    parser: P,
    f: F,
    _input: PhantomData<fn(A)>,
}

pub fn map<I, A, B, P, F>(parser: P, f: F) -> Map<P, F, A>
where
    P: Parser<I, A>,
    F: Fn(A) -> B,
{
    Map {
        parser,
        f,
        _input: PhantomData,
    }
}

impl<I, A, B, P, F> Parser<I, B> for Map<P, F, A>
where
    P: Parser<I, A>,
    F: Fn(A) -> B,
{
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<B> {
        let (pos, value) = self.parser.parse(input, pos)?;
        Ok((pos, (self.f)(value)))
    }
}

/// Zero or more repetitions. Stops on the first failure or on a match that
/// consumed nothing.
#[derive(Clone)]
pub struct Many<P>(P);

pub fn many<I, O, P>(parser: P) -> Many<P>
where
    P: Parser<I, O>,
{
    Many(parser)
}

impl<I, O, P> Parser<I, Vec<O>> for Many<P>
where
    P: Parser<I, O>,
{
    fn parse(&self, input: &[I], mut pos: usize) -> ParseResult<Vec<O>> {
        let mut items = Vec::new();
        while let Ok((next, item)) = self.0.parse(input, pos) {
            if next == pos {
                break;
            }
            items.push(item);
            pos = next;
        }
        Ok((pos, items))
    }
}

/// Zero or more items split by `separator`; a trailing separator is allowed.
#[derive(Clone)]
pub struct SeparatedList<P, S> {
    item: P,
    separator: S,
}

pub fn separated_list<I, O, P, S>(item: P, separator: S) -> SeparatedList<P, S>
where
    P: Parser<I, O>,
    S: Parser<I, ()>,
{
    SeparatedList { item, separator }
}

impl<I, O, P, S> Parser<I, Vec<O>> for SeparatedList<P, S>
where
    P: Parser<I, O>,
    S: Parser<I, ()>,
{
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<Vec<O>> {
        let mut items = Vec::new();
        let Ok((mut pos, first)) = self.item.parse(input, pos) else {
            return Ok((pos, items));
        };
        items.push(first);
        while let Ok((after_separator, _)) = self.separator.parse(input, pos) {
            pos = after_separator;
            match self.item.parse(input, pos) {
                Ok((next, item)) => {
                    items.push(item);
                    pos = next;
                }
                Err(_) => break,
            }
        }
        Ok((pos, items))
    }
}

#[derive(Clone)]
pub struct Optional<P>(P);

pub fn optional<I, O, P>(parser: P) -> Optional<P>
where
    P: Parser<I, O>,
{
    Optional(parser)
}

impl<I, O, P> Parser<I, Option<O>> for Optional<P>
where
    P: Parser<I, O>,
{
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<Option<O>> {
        Ok(match self.0.parse(input, pos) {
            Ok((next, value)) => (next, Some(value)),
            Err(_) => (pos, None),
        })
    }
}

#[derive(Clone)]
pub struct Tuple2<P1, P2>(P1, P2);

pub fn tuple2<I, O1, O2, P1, P2>(first: P1, second: P2) -> Tuple2<P1, P2>
where
    P1: Parser<I, O1>,
    P2: Parser<I, O2>,
{
    Tuple2(first, second)
}

impl<I, O1, O2, P1, P2> Parser<I, (O1, O2)> for Tuple2<P1, P2>
where
    P1: Parser<I, O1>,
    P2: Parser<I, O2>,
{
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<(O1, O2)> {
        let (pos, a) = self.0.parse(input, pos)?;
        let (pos, b) = self.1.parse(input, pos)?;
        Ok((pos, (a, b)))
    }
}

#[derive(Clone)]
pub struct Tuple3<P1, P2, P3>(P1, P2, P3);

pub fn tuple3<I, O1, O2, O3, P1, P2, P3>(first: P1, second: P2, third: P3) -> Tuple3<P1, P2, P3>
where
    P1: Parser<I, O1>,
    P2: Parser<I, O2>,
    P3: Parser<I, O3>,
{
    Tuple3(first, second, third)
}

impl<I, O1, O2, O3, P1, P2, P3> Parser<I, (O1, O2, O3)> for Tuple3<P1, P2, P3>
where
    P1: Parser<I, O1>,
    P2: Parser<I, O2>,
    P3: Parser<I, O3>,
{
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<(O1, O2, O3)> {
        let (pos, a) = self.0.parse(input, pos)?;
        let (pos, b) = self.1.parse(input, pos)?;
        let (pos, c) = self.2.parse(input, pos)?;
        Ok((pos, (a, b, c)))
    }
}

/// `open inner close`, keeping only the inner value.
#[derive(Clone)]
pub struct Delimited<L, P, R> {
    open: L,
    inner: P,
    close: R,
}

pub fn delimited<I, O, L, P, R>(open: L, inner: P, close: R) -> Delimited<L, P, R>
where
    L: Parser<I, ()>,
    P: Parser<I, O>,
    R: Parser<I, ()>,
{
    Delimited { open, inner, close }
}

impl<I, O, L, P, R> Parser<I, O> for Delimited<L, P, R>
where
    L: Parser<I, ()>,
    P: Parser<I, O>,
    R: Parser<I, ()>,
{
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<O> {
        let (pos, _) = self.open.parse(input, pos)?;
        let (pos, value) = self.inner.parse(input, pos)?;
        let (pos, _) = self.close.parse(input, pos)?;
        Ok((pos, value))
    }
}

/// Wraps failures with a label naming what was expected.
#[derive(Clone)]
pub struct WithContext<P, C> {
    parser: P,
    label: C,
}

pub fn with_context<I, O, P, C>(parser: P, label: C) -> WithContext<P, C>
where
    P: Parser<I, O>,
    C: ToString,
{
    WithContext { parser, label }
}

impl<I, O, P, C> Parser<I, O> for WithContext<P, C>
where
    P: Parser<I, O>,
    C: ToString,
{
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<O> {
        self.parser
            .parse(input, pos)
            .map_err(|inner| ParseError::WithContext {
                message: self.label.to_string(),
                inner: Box::new(inner),
            })
    }
}

/// Builds the inner parser on each use. Recursive grammar rules go through
/// this so their types stay finite.
#[derive(Clone)]
pub struct Lazy<F>(F);

pub fn lazy<I, O, F, P>(build: F) -> Lazy<F>
where
    F: Fn() -> P,
    P: Parser<I, O>,
{
    Lazy(build)
}

impl<I, O, F, P> Parser<I, O> for Lazy<F>
where
    F: Fn() -> P,
    P: Parser<I, O>,
{
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<O> {
        (self.0)().parse(input, pos)
    }
}

/// Pairs the value with the (line, column) of the first item it consumed.
#[derive(Clone)]
pub struct Located<P>(P);

pub fn located<I, O, P>(parser: P) -> Located<P>
where
    I: Spanned,
    P: Parser<I, O>,
{
    Located(parser)
}

impl<I, O, P> Parser<I, ((usize, usize), O)> for Located<P>
where
    I: Spanned,
    P: Parser<I, O>,
{
    fn parse(&self, input: &[I], pos: usize) -> ParseResult<((usize, usize), O)> {
        let at = input.get(pos).ok_or(ParseError::EOF)?.line_column();
        let (pos, value) = self.0.parse(input, pos)?;
        Ok((pos, (at, value)))
    }
}
