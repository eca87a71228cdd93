//! Whole-subtree persistence in two formats: `binary` (bincode behind a magic
//! header) and `text` (pretty JSON). Both go through the same snapshot model,
//! so a node saved in one format loads identically from the other.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    config::{FunctionPolicy, Format},
    value::{TypeCode, Value},
    ChariotError, ChariotResult,
};

use super::{
    arena::Arena,
    node::{NodeId, NodeKind, NodeRef},
};

const MAGIC: &[u8; 4] = b"CHRT";
const VERSION: u32 = 1;

/// Attribute value as persisted. Node references become name paths rooted at
/// the snapshot's top-level entries. Infinities and NaN are kept as their
/// string form since JSON has no literal for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    Null,
    Bool(bool),
    Number(f64),
    NonFinite(String),
    String(String),
    List(Vec<StoredValue>),
    Map(BTreeMap<String, StoredValue>),
    NodePath(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub kind: NodeKind,
    pub attributes: BTreeMap<String, StoredValue>,
    pub children: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RootEntry {
    Node(NodeSnapshot),
    Value(StoredValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootSnapshot {
    pub binding: String,
    pub type_code: TypeCode,
    pub entry: RootEntry,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub roots: Vec<RootSnapshot>,
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    document: T,
}

struct Snapshotter<'a> {
    arena: &'a Arena,
    policy: FunctionPolicy,
    paths: HashMap<NodeId, Vec<String>>,
}

impl<'a> Snapshotter<'a> {
    fn new(arena: &'a Arena, policy: FunctionPolicy) -> Self {
        Self {
            arena,
            policy,
            paths: HashMap::new(),
        }
    }

    fn index(&mut self, node: NodeRef, path: Vec<String>) -> ChariotResult<()> {
        for child in self.arena.children(node)? {
            let mut child_path = path.clone();
            child_path.push(self.arena.node(child)?.name.clone());
            self.index(child, child_path)?;
        }
        self.paths.insert(node.id, path);
        Ok(())
    }

    fn node(&self, node: NodeRef) -> ChariotResult<NodeSnapshot> {
        let data = self.arena.node(node)?;
        let mut attributes = BTreeMap::new();
        for (key, value) in &data.attributes {
            let location = format!("{}.{}", data.name, key);
            if let Some(stored) = self.value(value, &location)? {
                attributes.insert(key.clone(), stored);
            }
        }
        let children = self
            .arena
            .children(node)?
            .into_iter()
            .map(|child| self.node(child))
            .collect::<ChariotResult<Vec<_>>>()?;
        Ok(NodeSnapshot {
            name: data.name.clone(),
            kind: data.kind,
            attributes,
            children,
        })
    }

    /// `None` means the value is omitted under [`FunctionPolicy::Omit`].
    fn value(&self, value: &Value, location: &str) -> ChariotResult<Option<StoredValue>> {
        Ok(Some(match value {
            Value::Null => StoredValue::Null,
            Value::Bool(b) => StoredValue::Bool(*b),
            Value::Number(n) if !n.is_finite() => StoredValue::NonFinite(n.to_string()),
            Value::Number(n) => StoredValue::Number(*n),
            Value::String(s) => StoredValue::String(s.clone()),
            Value::List(items) => {
                let mut stored = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    if let Some(v) = self.value(item, &format!("{}[{}]", location, i))? {
                        stored.push(v);
                    }
                }
                StoredValue::List(stored)
            }
            Value::Map(entries) => {
                let mut stored = BTreeMap::new();
                for (k, v) in entries {
                    if let Some(v) = self.value(v, &format!("{}.{}", location, k))? {
                        stored.insert(k.clone(), v);
                    }
                }
                StoredValue::Map(stored)
            }
            Value::Function(_) => match self.policy {
                FunctionPolicy::Omit => {
                    tracing::debug!("omitting function-valued attribute at {}", location);
                    return Ok(None);
                }
                FunctionPolicy::Fail => {
                    return Err(ChariotError::Serialization(format!(
                        "cannot save function-valued attribute at {}",
                        location
                    )))
                }
            },
            Value::Node(node) => match self.paths.get(&node.id) {
                Some(path) if self.arena.contains(*node) => StoredValue::NodePath(path.clone()),
                _ => {
                    return Err(ChariotError::Serialization(format!(
                        "reference at {} points outside the saved tree",
                        location
                    )))
                }
            },
        }))
    }
}

pub fn snapshot_node(
    arena: &Arena,
    node: NodeRef,
    policy: FunctionPolicy,
) -> ChariotResult<NodeSnapshot> {
    let mut snapshotter = Snapshotter::new(arena, policy);
    let name = arena.node(node)?.name.clone();
    snapshotter.index(node, vec![name])?;
    snapshotter.node(node)
}

/// Every root binding of a registry, owned nodes with their subtrees.
/// A bound node nobody owns is saved whole under the first binding naming it.
pub fn snapshot_registry(arena: &Arena, policy: FunctionPolicy) -> ChariotResult<RegistrySnapshot> {
    let mut snapshotter = Snapshotter::new(arena, policy);
    let mut node_roots = HashSet::new();
    for (name, binding) in arena.bindings() {
        if let (Value::Node(node), true) = (&binding.value, binding.owns_node) {
            snapshotter.index(*node, vec![name.clone()])?;
            node_roots.insert(name.clone());
        }
    }
    for (name, binding) in arena.bindings() {
        if let Value::Node(node) = &binding.value {
            let detached = arena.contains(*node)
                && arena.owner(*node).is_none()
                && !snapshotter.paths.contains_key(&node.id);
            if detached {
                snapshotter.index(*node, vec![name.clone()])?;
                node_roots.insert(name.clone());
            }
        }
    }

    let mut roots = Vec::new();
    for (name, binding) in arena.bindings() {
        let entry = match &binding.value {
            Value::Node(node) if node_roots.contains(name) => {
                RootEntry::Node(snapshotter.node(*node)?)
            }
            value => match snapshotter.value(value, name)? {
                Some(stored) => RootEntry::Value(stored),
                None => continue,
            },
        };
        roots.push(RootSnapshot {
            binding: name.clone(),
            type_code: binding.type_code,
            entry,
        });
    }
    Ok(RegistrySnapshot { roots })
}

struct Materializer {
    paths: HashMap<Vec<String>, NodeRef>,
    pending: Vec<(NodeRef, String, StoredValue)>,
}

impl Materializer {
    fn new() -> Self {
        Self {
            paths: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn build(
        &mut self,
        arena: &mut Arena,
        snapshot: &NodeSnapshot,
        path: Vec<String>,
    ) -> ChariotResult<NodeRef> {
        let node = arena.create_node(snapshot.name.clone(), snapshot.kind);
        for (key, stored) in &snapshot.attributes {
            self.pending.push((node, key.clone(), stored.clone()));
        }
        for child in &snapshot.children {
            let mut child_path = path.clone();
            child_path.push(child.name.clone());
            let child_ref = self.build(arena, child, child_path)?;
            arena.add_child(node, child_ref)?;
        }
        self.paths.insert(path, node);
        Ok(node)
    }

    fn value(&self, stored: &StoredValue) -> ChariotResult<Value> {
        Ok(match stored {
            StoredValue::Null => Value::Null,
            StoredValue::Bool(b) => Value::Bool(*b),
            StoredValue::Number(n) => Value::Number(*n),
            StoredValue::NonFinite(text) => Value::Number(text.parse().map_err(|_| {
                ChariotError::Serialization(format!("invalid number '{}'", text))
            })?),
            StoredValue::String(s) => Value::String(s.clone()),
            StoredValue::List(items) => Value::List(
                items
                    .iter()
                    .map(|v| self.value(v))
                    .collect::<ChariotResult<Vec<_>>>()?,
            ),
            StoredValue::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.value(v)?)))
                    .collect::<ChariotResult<BTreeMap<_, _>>>()?,
            ),
            StoredValue::NodePath(path) => Value::Node(*self.paths.get(path).ok_or_else(|| {
                ChariotError::Serialization(format!("dangling node path {}", path.join("/")))
            })?),
        })
    }

    fn finish(&self, arena: &mut Arena) -> ChariotResult<()> {
        for (node, key, stored) in &self.pending {
            let value = self.value(stored)?;
            arena.set_attribute(*node, key, value)?;
        }
        Ok(())
    }
}

/// Rebuilds a saved subtree as a fresh detached node in `arena`.
pub fn materialize_node(arena: &mut Arena, snapshot: &NodeSnapshot) -> ChariotResult<NodeRef> {
    let mut materializer = Materializer::new();
    let node = materializer.build(arena, snapshot, vec![snapshot.name.clone()])?;
    materializer.finish(arena)?;
    Ok(node)
}

/// Declares every saved root into `arena`. Returns the number of restored bindings.
pub fn restore_registry(arena: &mut Arena, snapshot: &RegistrySnapshot) -> ChariotResult<usize> {
    let mut materializer = Materializer::new();
    let mut roots = Vec::new();
    for root in &snapshot.roots {
        if let RootEntry::Node(node) = &root.entry {
            let built = materializer.build(arena, node, vec![root.binding.clone()])?;
            roots.push((root, Value::Node(built)));
        }
    }
    materializer.finish(arena)?;

    for root in &snapshot.roots {
        if let RootEntry::Value(stored) = &root.entry {
            roots.push((root, materializer.value(stored)?));
        }
    }
    let count = roots.len();
    for (root, value) in roots {
        arena.declare(&root.binding, root.type_code, value)?;
    }
    Ok(count)
}

pub fn encode<T: Serialize>(document: &T, format: Format) -> ChariotResult<Vec<u8>> {
    let envelope = Envelope {
        version: VERSION,
        document,
    };
    match format {
        Format::Binary => {
            let mut bytes = MAGIC.to_vec();
            bytes.extend(bincode::serialize(&envelope)?);
            Ok(bytes)
        }
        Format::Text => Ok(serde_json::to_vec_pretty(&envelope)?),
    }
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8], format: Format) -> ChariotResult<T> {
    let envelope: Envelope<T> = match format {
        Format::Binary => {
            let body = bytes.strip_prefix(MAGIC.as_slice()).ok_or_else(|| {
                ChariotError::Serialization("missing binary snapshot header".to_string())
            })?;
            bincode::deserialize(body)?
        }
        Format::Text => serde_json::from_slice(bytes)?,
    };
    if envelope.version != VERSION {
        return Err(ChariotError::Serialization(format!(
            "unsupported snapshot version {}",
            envelope.version
        )));
    }
    Ok(envelope.document)
}

pub async fn write_document<T: Serialize>(
    path: impl AsRef<Path>,
    document: &T,
    format: Format,
) -> ChariotResult<()> {
    let bytes = encode(document, format)?;
    tokio::fs::write(path.as_ref(), bytes).await?;
    tracing::debug!(path = %path.as_ref().display(), %format, "snapshot written");
    Ok(())
}

pub async fn read_document<T: DeserializeOwned>(
    path: impl AsRef<Path>,
    format: Format,
) -> ChariotResult<T> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    decode(&bytes, format)
}
