//! The closed set of data kinds shared by the tree store, the interpreter and
//! every external surface.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{ast::Block, eval::context::Scope, tree::NodeRef, ChariotError, ChariotResult};

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Function(Arc<Function>),
    Node(NodeRef),
}

/// A closure: parameters, body and the frame chain it was defined in.
pub struct Function {
    pub params: Vec<String>,
    pub body: Arc<Block>,
    pub captured: Option<Arc<Scope>>,
}

impl Function {
    pub fn new(params: Vec<String>, body: Arc<Block>, captured: Option<Arc<Scope>>) -> Self {
        Self {
            params,
            body,
            captured,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("params", &self.params)
            .field("statements", &self.body.statements.len())
            .finish()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Node(a), Value::Node(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(entries) => !entries.is_empty(),
            Value::Function(_) | Value::Node(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
            Value::Node(_) => "node",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeRef> {
        match self {
            Value::Node(node) => Some(*node),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Arc<Function>> {
        match self {
            Value::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or_default()),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Plain-data JSON rendering. Functions and node references have no JSON form.
    /// Integral numbers come out as JSON integers.
    pub fn to_json(&self) -> ChariotResult<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER => {
                serde_json::Value::from(*n as i64)
            }
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Value::to_json)
                    .collect::<ChariotResult<Vec<_>>>()?,
            ),
            Value::Map(entries) => {
                let mut object = serde_json::Map::new();
                for (k, v) in entries {
                    object.insert(k.clone(), v.to_json()?);
                }
                serde_json::Value::Object(object)
            }
            Value::Function(_) => {
                return Err(ChariotError::Serialization(
                    "functions cannot be converted to JSON".to_string(),
                ))
            }
            Value::Node(node) => {
                return Err(ChariotError::Serialization(format!(
                    "node reference {} cannot be converted to JSON",
                    node
                )))
            }
        })
    }
}

/// 2^53: beyond this an f64 no longer holds every integer.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

fn format_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => format_number(*n, f),
            Value::String(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Function(function) => write!(f, "func({})", function.params.join(", ")),
            Value::Node(node) => write!(f, "{}", node),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// Declaration type letters.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
pub enum TypeCode {
    #[strum(to_string = "N", serialize = "number")]
    Number,
    #[strum(to_string = "S", serialize = "string")]
    String,
    #[strum(to_string = "L", serialize = "bool")]
    Logical,
    #[strum(to_string = "A", serialize = "list")]
    Array,
    #[strum(to_string = "M", serialize = "map")]
    Map,
    #[strum(to_string = "T", serialize = "tree")]
    Tree,
    #[strum(to_string = "J", serialize = "json")]
    Json,
    #[strum(to_string = "F", serialize = "function")]
    Function,
    #[strum(to_string = "V", serialize = "any")]
    Untyped,
}

impl TypeCode {
    pub fn is_node(&self) -> bool {
        matches!(self, TypeCode::Tree | TypeCode::Json)
    }

    pub fn default_value(&self) -> Value {
        match self {
            TypeCode::Number => Value::Number(0.0),
            TypeCode::String => Value::String(String::new()),
            TypeCode::Logical => Value::Bool(false),
            TypeCode::Array => Value::List(Vec::new()),
            TypeCode::Map => Value::Map(BTreeMap::new()),
            TypeCode::Tree | TypeCode::Json | TypeCode::Function | TypeCode::Untyped => Value::Null,
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (TypeCode::Untyped, _) => true,
            (TypeCode::Number, Value::Number(_)) => true,
            (TypeCode::String, Value::String(_)) => true,
            (TypeCode::Logical, Value::Bool(_)) => true,
            (TypeCode::Array, Value::List(_)) => true,
            (TypeCode::Map, Value::Map(_)) => true,
            (TypeCode::Tree | TypeCode::Json, Value::Node(_)) => true,
            (TypeCode::Function, Value::Function(_)) => true,
            (TypeCode::Tree | TypeCode::Json | TypeCode::Function, Value::Null) => true,
            _ => false,
        }
    }

    pub fn check(&self, name: &str, value: &Value) -> ChariotResult<()> {
        if self.accepts(value) {
            Ok(())
        } else {
            Err(ChariotError::Type(format!(
                "cannot assign {} to '{}' declared as {}",
                value.type_name(),
                name,
                self
            )))
        }
    }
}
