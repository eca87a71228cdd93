use core::fmt;
use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

/// Identity of a parsed program: a caller-supplied name, or a stable hash of its source.
/// Breakpoints and the parse cache are keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgramId(String);

impl ProgramId {
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn from_source(source: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        Self(format!("src-{:016x}", hasher.finish()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub id: ProgramId,
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub statements: Vec<Statement>,
}

impl Block {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }
}

/// One expression evaluated for its effect, with the position it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub expression: Expression,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Variable(String),
    /// `[a, b, c]`
    Array(Vec<Expression>),
    /// `name(args...)`; a trailing `{ ... }` is appended to `arguments` as a [`Expression::Block`].
    Call {
        name: String,
        arguments: Vec<Expression>,
    },
    If {
        branches: Vec<(Expression, Block)>,
        otherwise: Option<Block>,
    },
    While {
        condition: Box<Expression>,
        body: Block,
    },
    /// With no subject, the first truthy case wins.
    Switch {
        subject: Option<Box<Expression>>,
        cases: Vec<(Expression, Block)>,
        default: Option<Block>,
    },
    Function {
        params: Vec<String>,
        body: Arc<Block>,
    },
    Block(Block),
}

impl Expression {
    pub fn call(name: impl Into<String>, arguments: Vec<Expression>) -> Self {
        Expression::Call {
            name: name.into(),
            arguments,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::Literal(Literal::String(value.into()))
    }

    pub fn number(value: f64) -> Self {
        Expression::Literal(Literal::Number(value))
    }
}
