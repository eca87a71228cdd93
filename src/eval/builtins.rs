use std::{collections::BTreeMap, str::FromStr};

use regex::Regex;

use crate::{
    session::logs::{LogLevel, LogRecord},
    tree::{Arena, NodeId, NodeKind, NodeRef},
    value::Value,
    ChariotError, ChariotResult,
};

use super::context::RunEnv;

/// Native functions with fixed names. Resolved before host bindings and
/// function-valued variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum Builtin {
    // tree
    CreateNode,
    JsonNode,
    AddChild,
    SetAttribute,
    GetAttribute,
    HasAttribute,
    RemoveAttribute,
    AttributeNames,
    GetChild,
    Children,
    RemoveChild,
    NodeName,
    Length,
    #[strum(to_string = "parseJSON")]
    ParseJson,
    #[strum(to_string = "toJSON")]
    ToJson,
    // values
    #[strum(to_string = "list", serialize = "array")]
    List,
    Map,
    Get,
    Put,
    Append,
    Keys,
    TypeOf,
    #[strum(to_string = "toString")]
    Stringify,
    ToNumber,
    Concat,
    // math
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // comparison and logic
    Equal,
    Unequal,
    Smaller,
    Bigger,
    SmallerEq,
    BiggerEq,
    Not,
    // strings
    RegexMatch,
    RegexReplace,
    // misc
    Log,
    Plan,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        Self::from_str(name).ok()
    }
}

fn arity(builtin: Builtin, args: &[Value], min: usize, max: usize) -> ChariotResult<()> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(ChariotError::invalid_argument(format!(
            "{} expects {} argument(s), got {}",
            builtin,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn wrong_type(builtin: Builtin, index: usize, expected: &str, got: &Value) -> ChariotError {
    ChariotError::Type(format!(
        "{} argument {} must be a {}, got {}",
        builtin,
        index + 1,
        expected,
        got.type_name()
    ))
}

fn node_at(builtin: Builtin, args: &[Value], index: usize) -> ChariotResult<NodeRef> {
    match &args[index] {
        Value::Node(node) => Ok(*node),
        other => Err(wrong_type(builtin, index, "node", other)),
    }
}

fn string_at(builtin: Builtin, args: &[Value], index: usize) -> ChariotResult<String> {
    match &args[index] {
        Value::String(s) => Ok(s.clone()),
        other => Err(wrong_type(builtin, index, "string", other)),
    }
}

fn number_at(builtin: Builtin, args: &[Value], index: usize) -> ChariotResult<f64> {
    match &args[index] {
        Value::Number(n) => Ok(*n),
        other => Err(wrong_type(builtin, index, "number", other)),
    }
}

/// Attribute and map keys: strings, or numbers rendered as text.
fn key_at(builtin: Builtin, args: &[Value], index: usize) -> ChariotResult<String> {
    match &args[index] {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(Value::Number(*n).to_string()),
        other => Err(wrong_type(builtin, index, "string", other)),
    }
}

fn index_of(n: f64) -> Option<usize> {
    (n >= 0.0 && n.fract() == 0.0).then_some(n as usize)
}

fn optional_function(builtin: Builtin, args: &[Value], index: usize) -> ChariotResult<Value> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(Value::Null),
        Some(v @ Value::Function(_)) => Ok(v.clone()),
        Some(other) => Err(wrong_type(builtin, index, "function", other)),
    }
}

#[tracing::instrument(level = "trace", skip(args, env), fields(args = args.len()))]
pub async fn call(builtin: Builtin, args: Vec<Value>, env: &RunEnv) -> ChariotResult<Value> {
    use Builtin::*;
    match builtin {
        CreateNode | JsonNode => {
            arity(builtin, &args, 1, 1)?;
            let name = string_at(builtin, &args, 0)?;
            let kind = if builtin == JsonNode {
                NodeKind::Json
            } else {
                NodeKind::Tree
            };
            Ok(Value::Node(env.tree.create_node(&name, kind).await))
        }
        AddChild => {
            arity(builtin, &args, 2, 2)?;
            let parent = node_at(builtin, &args, 0)?;
            let child = node_at(builtin, &args, 1)?;
            Ok(Value::Node(env.tree.add_child(parent, child).await?))
        }
        SetAttribute => {
            arity(builtin, &args, 3, 3)?;
            let node = node_at(builtin, &args, 0)?;
            let key = key_at(builtin, &args, 1)?;
            let value = args[2].clone();
            env.tree.set_attribute(node, &key, value.clone()).await?;
            Ok(value)
        }
        GetAttribute => {
            arity(builtin, &args, 2, 2)?;
            let node = node_at(builtin, &args, 0)?;
            let key = key_at(builtin, &args, 1)?;
            env.tree.get_attribute(node, &key).await
        }
        HasAttribute => {
            arity(builtin, &args, 2, 2)?;
            let (Value::Node(node), Ok(key)) = (&args[0], key_at(builtin, &args, 1)) else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(env.tree.has_attribute(*node, &key).await))
        }
        RemoveAttribute => {
            arity(builtin, &args, 2, 2)?;
            let node = node_at(builtin, &args, 0)?;
            let key = key_at(builtin, &args, 1)?;
            let removed = env
                .tree
                .write(node, |arena| arena.remove_attribute(node, &key))
                .await?;
            Ok(removed.unwrap_or_default())
        }
        AttributeNames => {
            arity(builtin, &args, 1, 1)?;
            let node = node_at(builtin, &args, 0)?;
            let names = env
                .tree
                .read(node, |arena| arena.attribute_names(node))
                .await?;
            Ok(Value::List(names.into_iter().map(Value::String).collect()))
        }
        GetChild => {
            arity(builtin, &args, 2, 2)?;
            let node = node_at(builtin, &args, 0)?;
            let name = string_at(builtin, &args, 1)?;
            let child = env.tree.read(node, |arena| arena.child(node, &name)).await?;
            Ok(child.map(Value::Node).unwrap_or_default())
        }
        Children => {
            arity(builtin, &args, 1, 1)?;
            let node = node_at(builtin, &args, 0)?;
            let children = env.tree.read(node, |arena| arena.children(node)).await?;
            Ok(Value::List(children.into_iter().map(Value::Node).collect()))
        }
        RemoveChild => {
            arity(builtin, &args, 2, 2)?;
            let node = node_at(builtin, &args, 0)?;
            let name = string_at(builtin, &args, 1)?;
            let child = env
                .tree
                .write(node, |arena| arena.remove_child(node, &name))
                .await?;
            Ok(child.map(Value::Node).unwrap_or_default())
        }
        NodeName => {
            arity(builtin, &args, 1, 1)?;
            let node = node_at(builtin, &args, 0)?;
            let name = env
                .tree
                .read(node, |arena| Ok(arena.node(node)?.name.clone()))
                .await?;
            Ok(Value::String(name))
        }
        Length => {
            arity(builtin, &args, 1, 1)?;
            let length = match &args[0] {
                Value::Null => 0,
                Value::String(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Map(entries) => entries.len(),
                Value::Node(node) => env.tree.read(*node, |arena| arena.length(*node)).await?,
                other => return Err(wrong_type(builtin, 0, "collection", other)),
            };
            Ok(Value::from(length))
        }
        ParseJson => {
            arity(builtin, &args, 1, 2)?;
            let text = string_at(builtin, &args, 0)?;
            let name = match args.get(1) {
                Some(_) => string_at(builtin, &args, 1)?,
                None => "json".to_string(),
            };
            let attributes = json_attributes(&serde_json::from_str(&text)?)?;
            let node = env.tree.create_node(&name, NodeKind::Json).await;
            env.tree
                .write(node, |arena| {
                    for (key, value) in attributes {
                        arena.set_attribute(node, &key, value)?;
                    }
                    Ok(())
                })
                .await?;
            Ok(Value::Node(node))
        }
        ToJson => {
            arity(builtin, &args, 1, 1)?;
            let json = match &args[0] {
                Value::Node(node) => {
                    let node = *node;
                    env.tree
                        .read(node, |arena| render_node(arena, node, &mut Vec::new()))
                        .await?
                }
                other => {
                    let arena = env.tree.active().read().await;
                    render_value(&arena, other, &mut Vec::new())?
                }
            };
            Ok(Value::String(json.to_string()))
        }

        List => Ok(Value::List(args)),
        Map => {
            if args.len() % 2 != 0 {
                return Err(ChariotError::invalid_argument(
                    "map expects key/value pairs",
                ));
            }
            let mut entries = BTreeMap::new();
            for i in (0..args.len()).step_by(2) {
                entries.insert(key_at(builtin, &args, i)?, args[i + 1].clone());
            }
            Ok(Value::Map(entries))
        }
        Get => {
            arity(builtin, &args, 2, 2)?;
            match (&args[0], &args[1]) {
                (Value::List(items), Value::Number(n)) => {
                    Ok(index_of(*n).and_then(|i| items.get(i).cloned()).unwrap_or_default())
                }
                (Value::Map(entries), _) => {
                    let key = key_at(builtin, &args, 1)?;
                    Ok(entries.get(&key).cloned().unwrap_or_default())
                }
                (Value::Node(node), _) => {
                    let node = *node;
                    let key = key_at(builtin, &args, 1)?;
                    env.tree
                        .read(node, |arena| {
                            Ok(arena.node(node)?.attributes.get(&key).cloned().unwrap_or_default())
                        })
                        .await
                }
                (Value::List(_), other) => Err(wrong_type(builtin, 1, "number", other)),
                (other, _) => Err(wrong_type(builtin, 0, "collection", other)),
            }
        }
        Put => {
            arity(builtin, &args, 3, 3)?;
            let mut args = args;
            let value = args.pop().unwrap_or_default();
            let key = args.pop().unwrap_or_default();
            match args.pop().unwrap_or_default() {
                Value::List(mut items) => {
                    let index = key.as_number().and_then(index_of).ok_or_else(|| {
                        ChariotError::invalid_argument("put on a list needs an index")
                    })?;
                    match index.cmp(&items.len()) {
                        std::cmp::Ordering::Less => items[index] = value,
                        std::cmp::Ordering::Equal => items.push(value),
                        std::cmp::Ordering::Greater => {
                            return Err(ChariotError::invalid_argument(format!(
                                "index {} out of range for list of length {}",
                                index,
                                items.len()
                            )))
                        }
                    }
                    Ok(Value::List(items))
                }
                Value::Map(mut entries) => {
                    entries.insert(key_at(builtin, &[key], 0)?, value);
                    Ok(Value::Map(entries))
                }
                Value::Node(node) => {
                    env.tree
                        .set_attribute(node, &key_at(builtin, &[key], 0)?, value)
                        .await?;
                    Ok(Value::Node(node))
                }
                other => Err(wrong_type(builtin, 0, "collection", &other)),
            }
        }
        Append => {
            arity(builtin, &args, 1, usize::MAX)?;
            let mut args = args.into_iter();
            match args.next() {
                Some(Value::List(mut items)) => {
                    items.extend(args);
                    Ok(Value::List(items))
                }
                Some(other) => Err(wrong_type(builtin, 0, "list", &other)),
                None => Ok(Value::List(Vec::new())),
            }
        }
        Keys => {
            arity(builtin, &args, 1, 1)?;
            let keys = match &args[0] {
                Value::Map(entries) => entries.keys().cloned().collect(),
                Value::Node(node) => {
                    let node = *node;
                    env.tree
                        .read(node, |arena| arena.attribute_names(node))
                        .await?
                }
                other => return Err(wrong_type(builtin, 0, "map", other)),
            };
            Ok(Value::List(keys.into_iter().map(Value::String).collect()))
        }
        TypeOf => {
            arity(builtin, &args, 1, 1)?;
            Ok(Value::from(args[0].type_name()))
        }
        Stringify => {
            arity(builtin, &args, 1, 1)?;
            Ok(Value::String(args[0].to_string()))
        }
        ToNumber => {
            arity(builtin, &args, 1, 1)?;
            let n = match &args[0] {
                Value::Number(n) => *n,
                Value::Null => 0.0,
                Value::Bool(b) => f64::from(u8::from(*b)),
                Value::String(s) => s.trim().parse::<f64>().map_err(|_| {
                    ChariotError::invalid_argument(format!("'{}' is not a number", s))
                })?,
                other => return Err(wrong_type(builtin, 0, "string", other)),
            };
            Ok(Value::Number(n))
        }
        Concat => {
            if !args.is_empty() && args.iter().all(|v| matches!(v, Value::List(_))) {
                let mut joined = Vec::new();
                for arg in args {
                    if let Value::List(items) = arg {
                        joined.extend(items);
                    }
                }
                return Ok(Value::List(joined));
            }
            Ok(Value::String(args.iter().map(Value::to_string).collect()))
        }

        Add | Mul => {
            let mut acc = if builtin == Add { 0.0 } else { 1.0 };
            for i in 0..args.len() {
                let n = number_at(builtin, &args, i)?;
                if builtin == Add {
                    acc += n;
                } else {
                    acc *= n;
                }
            }
            Ok(Value::Number(acc))
        }
        Sub | Div | Mod => {
            arity(builtin, &args, 2, 2)?;
            let a = number_at(builtin, &args, 0)?;
            let b = number_at(builtin, &args, 1)?;
            match builtin {
                Sub => Ok(Value::Number(a - b)),
                _ if b == 0.0 => Err(ChariotError::invalid_argument(format!(
                    "{}: division by zero",
                    builtin
                ))),
                Div => Ok(Value::Number(a / b)),
                _ => Ok(Value::Number(a % b)),
            }
        }

        Equal | Unequal => {
            arity(builtin, &args, 2, 2)?;
            let equal = args[0] == args[1];
            Ok(Value::Bool(if builtin == Equal { equal } else { !equal }))
        }
        Smaller | Bigger | SmallerEq | BiggerEq => {
            arity(builtin, &args, 2, 2)?;
            let ordering = match (&args[0], &args[1]) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                (a, b) => {
                    return Err(ChariotError::Type(format!(
                        "{} cannot compare {} with {}",
                        builtin,
                        a.type_name(),
                        b.type_name()
                    )))
                }
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match builtin {
                Smaller => ordering.is_lt(),
                Bigger => ordering.is_gt(),
                SmallerEq => ordering.is_le(),
                _ => ordering.is_ge(),
            }))
        }
        Not => {
            arity(builtin, &args, 1, 1)?;
            Ok(Value::Bool(!args[0].is_truthy()))
        }

        RegexMatch | RegexReplace => {
            let expected = if builtin == RegexMatch { 2 } else { 3 };
            arity(builtin, &args, expected, expected)?;
            let pattern = string_at(builtin, &args, 0)?;
            let text = string_at(builtin, &args, 1)?;
            let regex = Regex::new(&pattern).map_err(|e| {
                ChariotError::invalid_argument(format!("invalid pattern '{}': {}", pattern, e))
            })?;
            if builtin == RegexMatch {
                return Ok(Value::Bool(regex.is_match(&text)));
            }
            let replacement = string_at(builtin, &args, 2)?;
            Ok(Value::String(
                regex.replace_all(&text, replacement.as_str()).into_owned(),
            ))
        }

        Log => {
            arity(builtin, &args, 1, usize::MAX)?;
            let level = match (&args[0], args.len()) {
                (Value::String(s), n) if n > 1 => LogLevel::from_str(s).ok(),
                _ => None,
            };
            let parts = if level.is_some() { &args[1..] } else { &args[..] };
            let message = parts
                .iter()
                .map(Value::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            let record = LogRecord::new(level.unwrap_or_default(), message);
            match &env.logs {
                Some(logs) => logs.push(record).await,
                None => tracing::info!(program = %env.program, "{}", record.message),
            }
            Ok(Value::Null)
        }
        Plan => {
            arity(builtin, &args, 4, 5)?;
            let name = string_at(builtin, &args, 0)?;
            let steps = match &args[3] {
                Value::Function(_) => vec![args[3].clone()],
                Value::List(items) if items.iter().all(|v| v.as_function().is_some()) => {
                    items.clone()
                }
                other => return Err(wrong_type(builtin, 3, "list of functions", other)),
            };
            let mut plan = BTreeMap::new();
            plan.insert("name".to_string(), Value::String(name));
            plan.insert("trigger".to_string(), optional_function(builtin, &args, 1)?);
            plan.insert("guard".to_string(), optional_function(builtin, &args, 2)?);
            plan.insert("steps".to_string(), Value::List(steps));
            plan.insert("drop".to_string(), optional_function(builtin, &args, 4)?);
            Ok(Value::Map(plan))
        }
    }
}

/// Attributes for a node parsed from JSON text: object entries, or array
/// elements under "0", "1", ...
fn json_attributes(json: &serde_json::Value) -> ChariotResult<Vec<(String, Value)>> {
    match json {
        serde_json::Value::Object(entries) => Ok(entries
            .iter()
            .map(|(k, v)| (k.clone(), Value::from_json(v)))
            .collect()),
        serde_json::Value::Array(items) => Ok(items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), Value::from_json(v)))
            .collect()),
        _ => Err(ChariotError::invalid_argument(
            "parseJSON expects an object or an array",
        )),
    }
}

fn render_node(
    arena: &Arena,
    node: NodeRef,
    seen: &mut Vec<NodeId>,
) -> ChariotResult<serde_json::Value> {
    let data = arena.node(node)?;
    if seen.contains(&node.id) {
        return Ok(serde_json::Value::String(data.name.clone()));
    }
    seen.push(node.id);

    let mut attributes = serde_json::Map::new();
    for (key, value) in &data.attributes {
        if let Some(json) = render_attribute(arena, value, seen)? {
            attributes.insert(key.clone(), json);
        }
    }
    let mut children = Vec::new();
    for child in arena.children(node)? {
        children.push((arena.node(child)?.name.clone(), render_node(arena, child, seen)?));
    }
    seen.pop();

    Ok(match data.kind {
        NodeKind::Json => {
            attributes.extend(children);
            serde_json::Value::Object(attributes)
        }
        NodeKind::Tree => serde_json::json!({
            "name": data.name,
            "attributes": attributes,
            "children": children.into_iter().map(|(_, c)| c).collect::<Vec<_>>(),
        }),
    })
}

/// Functions have no JSON form and are skipped inside nodes.
fn render_attribute(
    arena: &Arena,
    value: &Value,
    seen: &mut Vec<NodeId>,
) -> ChariotResult<Option<serde_json::Value>> {
    if value.as_function().is_some() {
        return Ok(None);
    }
    render_value(arena, value, seen).map(Some)
}

fn render_value(
    arena: &Arena,
    value: &Value,
    seen: &mut Vec<NodeId>,
) -> ChariotResult<serde_json::Value> {
    Ok(match value {
        Value::Node(node) if arena.contains(*node) => render_node(arena, *node, seen)?,
        Value::Node(node) => serde_json::Value::String(node.to_string()),
        Value::List(items) => serde_json::Value::Array(
            items
                .iter()
                .filter_map(|v| render_attribute(arena, v, seen).transpose())
                .collect::<ChariotResult<Vec<_>>>()?,
        ),
        Value::Map(entries) => {
            let mut object = serde_json::Map::new();
            for (key, v) in entries {
                if let Some(json) = render_attribute(arena, v, seen)? {
                    object.insert(key.clone(), json);
                }
            }
            serde_json::Value::Object(object)
        }
        other => other.to_json()?,
    })
}
