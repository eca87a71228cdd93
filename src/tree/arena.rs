use std::collections::{BTreeMap, HashMap};

use crate::{
    value::{TypeCode, Value},
    ChariotError, ChariotResult,
};

use super::node::{Node, NodeId, NodeKind, NodeRef, Owner, Space};

/// A named entry of a registry: either a root node (owning) or an
/// attribute holder carrying a plain typed value.
#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub type_code: TypeCode,
    pub owns_node: bool,
}

/// A subtree lifted out of one arena, ready to be inserted into another.
#[derive(Debug)]
pub struct DetachedSubtree {
    root: NodeId,
    nodes: Vec<(NodeId, Node)>,
}

/// Node storage plus the root bindings of one registry (global or session-local).
#[derive(Debug)]
pub struct Arena {
    space: Space,
    nodes: HashMap<NodeId, Node>,
    owners: HashMap<NodeId, Owner>,
    bindings: BTreeMap<String, Binding>,
}

impl Arena {
    pub fn new(space: Space) -> Self {
        Self {
            space,
            nodes: HashMap::new(),
            owners: HashMap::new(),
            bindings: BTreeMap::new(),
        }
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node_ref(&self, id: NodeId) -> NodeRef {
        NodeRef::new(self.space, id)
    }

    fn resolve(&self, node: NodeRef) -> ChariotResult<NodeId> {
        if node.space != self.space || !self.nodes.contains_key(&node.id) {
            return Err(ChariotError::InvalidArgument(format!(
                "{} is not a live node",
                node
            )));
        }
        Ok(node.id)
    }

    pub fn contains(&self, node: NodeRef) -> bool {
        self.resolve(node).is_ok()
    }

    pub fn node(&self, node: NodeRef) -> ChariotResult<&Node> {
        let id = self.resolve(node)?;
        self.nodes
            .get(&id)
            .ok_or_else(|| ChariotError::internal("node vanished during lookup"))
    }

    fn node_mut(&mut self, node: NodeRef) -> ChariotResult<&mut Node> {
        let id = self.resolve(node)?;
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| ChariotError::internal("node vanished during lookup"))
    }

    pub fn owner(&self, node: NodeRef) -> Option<&Owner> {
        self.owners.get(&node.id)
    }

    pub fn parent(&self, node: NodeRef) -> Option<NodeRef> {
        match self.owners.get(&node.id) {
            Some(Owner::Parent(parent)) => Some(self.node_ref(*parent)),
            _ => None,
        }
    }

    pub fn create_node(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeRef {
        let id = NodeId::fresh();
        self.nodes.insert(id, Node::new(name, kind));
        self.node_ref(id)
    }

    pub fn rename(&mut self, node: NodeRef, name: &str) -> ChariotResult<()> {
        if let Some(parent) = self.parent(node) {
            if let Some(existing) = self.child(parent, name)? {
                if existing != node {
                    return Err(ChariotError::Declaration(format!(
                        "'{}' already has a child named '{}'",
                        self.node(parent)?.name,
                        name
                    )));
                }
            }
        }
        self.node_mut(node)?.name = name.to_string();
        Ok(())
    }

    // --- bindings -------------------------------------------------------

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    pub fn bindings(&self) -> &BTreeMap<String, Binding> {
        &self.bindings
    }

    /// Creates a new binding. Never overwrites: an existing name is a declaration error
    /// and the first declaration stays untouched.
    pub fn declare(&mut self, name: &str, type_code: TypeCode, value: Value) -> ChariotResult<Value> {
        if self.bindings.contains_key(name) {
            return Err(ChariotError::Declaration(format!(
                "'{}' is already declared in this scope",
                name
            )));
        }

        if !type_code.is_node() {
            type_code.check(name, &value)?;
            self.bindings.insert(
                name.to_string(),
                Binding {
                    value: value.clone(),
                    type_code,
                    owns_node: false,
                },
            );
            return Ok(value);
        }

        let kind = if type_code == TypeCode::Json {
            NodeKind::Json
        } else {
            NodeKind::Tree
        };
        let node = match value {
            Value::Null => self.create_node(name, kind),
            Value::Map(entries) => {
                let node = self.create_node(name, kind);
                self.node_mut(node)?.attributes = entries;
                node
            }
            Value::Node(node) => {
                self.resolve(node)?;
                self.detach(node.id);
                node
            }
            other => {
                return Err(ChariotError::Type(format!(
                    "cannot declare '{}' as {} from a {}",
                    name,
                    type_code,
                    other.type_name()
                )))
            }
        };
        self.owners.insert(node.id, Owner::Root(name.to_string()));
        self.bindings.insert(
            name.to_string(),
            Binding {
                value: Value::Node(node),
                type_code,
                owns_node: true,
            },
        );
        Ok(Value::Node(node))
    }

    /// Updates an existing binding, type-checked against its declared code.
    /// Returns `false` when the name is not bound here.
    pub fn assign(&mut self, name: &str, value: Value) -> ChariotResult<bool> {
        let Some(binding) = self.bindings.get(name) else {
            return Ok(false);
        };
        binding.type_code.check(name, &value)?;
        let released = match (&binding.value, binding.owns_node) {
            (Value::Node(old), true) if Value::Node(*old) != value => Some(old.id),
            _ => None,
        };
        if let Some(old) = released {
            self.owners.remove(&old);
        }
        if let Some(binding) = self.bindings.get_mut(name) {
            if released.is_some() {
                binding.owns_node = false;
            }
            binding.value = value;
        }
        Ok(true)
    }

    /// Creates an untyped binding, replacing nothing.
    pub fn bind(&mut self, name: &str, value: Value) {
        self.bindings.entry(name.to_string()).or_insert(Binding {
            value,
            type_code: TypeCode::Untyped,
            owns_node: false,
        });
    }

    /// Removes a binding. An owned root node is dropped with its whole subtree.
    pub fn remove_binding(&mut self, name: &str) -> Option<Binding> {
        let binding = self.bindings.remove(name)?;
        if let (Value::Node(node), true) = (&binding.value, binding.owns_node) {
            if self.owners.get(&node.id) == Some(&Owner::Root(name.to_string())) {
                self.owners.remove(&node.id);
                self.drop_subtree(node.id);
            }
        }
        Some(binding)
    }

    // --- attributes -----------------------------------------------------

    pub fn set_attribute(&mut self, node: NodeRef, key: &str, value: Value) -> ChariotResult<()> {
        self.node_mut(node)?.attributes.insert(key.to_string(), value);
        Ok(())
    }

    pub fn get_attribute(&self, node: NodeRef, key: &str) -> ChariotResult<Value> {
        let data = self.node(node)?;
        data.attributes
            .get(key)
            .cloned()
            .ok_or_else(|| ChariotError::AttributeNotFound {
                node: data.name.clone(),
                key: key.to_string(),
            })
    }

    pub fn has_attribute(&self, node: NodeRef, key: &str) -> bool {
        self.node(node)
            .map(|data| data.attributes.contains_key(key))
            .unwrap_or(false)
    }

    pub fn remove_attribute(&mut self, node: NodeRef, key: &str) -> ChariotResult<Option<Value>> {
        Ok(self.node_mut(node)?.attributes.remove(key))
    }

    pub fn attribute_names(&self, node: NodeRef) -> ChariotResult<Vec<String>> {
        Ok(self.node(node)?.attributes.keys().cloned().collect())
    }

    /// Attribute count for json nodes, child count for tree nodes.
    pub fn length(&self, node: NodeRef) -> ChariotResult<usize> {
        let data = self.node(node)?;
        Ok(match data.kind {
            NodeKind::Json => data.attributes.len(),
            NodeKind::Tree => data.children.len(),
        })
    }

    // --- structure ------------------------------------------------------

    pub fn children(&self, node: NodeRef) -> ChariotResult<Vec<NodeRef>> {
        Ok(self
            .node(node)?
            .children
            .iter()
            .map(|id| self.node_ref(*id))
            .collect())
    }

    pub fn child(&self, node: NodeRef, name: &str) -> ChariotResult<Option<NodeRef>> {
        let data = self.node(node)?;
        Ok(data
            .children
            .iter()
            .find(|id| self.nodes.get(*id).is_some_and(|c| c.name == name))
            .map(|id| self.node_ref(*id)))
    }

    /// Moves `child` under `parent`. Any previous owner loses it first.
    pub fn add_child(&mut self, parent: NodeRef, child: NodeRef) -> ChariotResult<()> {
        let parent_id = self.resolve(parent)?;
        let child_id = self.resolve(child)?;
        if parent_id == child_id || self.is_ancestor(child_id, parent_id) {
            return Err(ChariotError::InvalidArgument(format!(
                "cannot add {} beneath itself",
                child
            )));
        }
        let child_name = self.node(child)?.name.clone();
        if let Some(existing) = self.child(parent, &child_name)? {
            if existing != child {
                return Err(ChariotError::Declaration(format!(
                    "'{}' already has a child named '{}'",
                    self.node(parent)?.name,
                    child_name
                )));
            }
        }

        self.detach(child_id);
        self.node_mut(parent)?.children.push(child_id);
        self.owners.insert(child_id, Owner::Parent(parent_id));
        Ok(())
    }

    /// Detaches the named child and returns it. The node stays alive, unowned.
    pub fn remove_child(&mut self, parent: NodeRef, name: &str) -> ChariotResult<Option<NodeRef>> {
        let Some(child) = self.child(parent, name)? else {
            return Ok(None);
        };
        self.detach(child.id);
        Ok(Some(child))
    }

    fn is_ancestor(&self, candidate: NodeId, of: NodeId) -> bool {
        let mut current = of;
        while let Some(Owner::Parent(parent)) = self.owners.get(&current) {
            if *parent == candidate {
                return true;
            }
            current = *parent;
        }
        false
    }

    fn detach(&mut self, id: NodeId) {
        match self.owners.remove(&id) {
            Some(Owner::Parent(parent)) => {
                if let Some(parent) = self.nodes.get_mut(&parent) {
                    parent.children.retain(|c| *c != id);
                }
            }
            Some(Owner::Root(name)) => {
                if let Some(binding) = self.bindings.get_mut(&name) {
                    binding.owns_node = false;
                }
            }
            None => {}
        }
    }

    pub fn subtree_ids(&self, node: NodeRef) -> ChariotResult<Vec<NodeId>> {
        let root = self.resolve(node)?;
        let mut ids = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            ids.push(id);
            if let Some(data) = self.nodes.get(&id) {
                stack.extend(data.children.iter().rev());
            }
        }
        Ok(ids)
    }

    fn drop_subtree(&mut self, root: NodeId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            self.owners.remove(&id);
            if let Some(data) = self.nodes.remove(&id) {
                stack.extend(data.children);
            }
        }
    }

    /// True if any attribute in the subtree references a session-local node
    /// that is not itself part of the subtree.
    pub fn has_foreign_local_refs(&self, node: NodeRef) -> ChariotResult<bool> {
        let ids = self.subtree_ids(node)?;
        Ok(ids.iter().filter_map(|id| self.nodes.get(id)).any(|data| {
            data.attributes
                .values()
                .any(|v| has_local_ref_outside(v, &ids))
        }))
    }

    /// Lifts a whole subtree out of this arena for a cross-registry move.
    pub fn extract(&mut self, node: NodeRef) -> ChariotResult<DetachedSubtree> {
        let ids = self.subtree_ids(node)?;
        self.detach(node.id);
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            if id != node.id {
                self.owners.remove(&id);
            }
            if let Some(data) = self.nodes.remove(&id) {
                nodes.push((id, data));
            }
        }
        Ok(DetachedSubtree {
            root: node.id,
            nodes,
        })
    }

    /// Inserts a subtree taken from another arena. Ids are kept; references between
    /// the moved nodes are rewritten to this arena's space.
    pub fn insert(&mut self, subtree: DetachedSubtree) -> NodeRef {
        let moved: Vec<NodeId> = subtree.nodes.iter().map(|(id, _)| *id).collect();
        let space = self.space;
        for (id, mut data) in subtree.nodes {
            for value in data.attributes.values_mut() {
                rewrite_space(value, &moved, space);
            }
            for child in &data.children {
                self.owners.insert(*child, Owner::Parent(id));
            }
            self.nodes.insert(id, data);
        }
        self.node_ref(subtree.root)
    }
}

fn rewrite_space(value: &mut Value, moved: &[NodeId], space: Space) {
    match value {
        Value::Node(node) if moved.contains(&node.id) => node.space = space,
        Value::List(items) => items.iter_mut().for_each(|v| rewrite_space(v, moved, space)),
        Value::Map(entries) => entries
            .values_mut()
            .for_each(|v| rewrite_space(v, moved, space)),
        _ => {}
    }
}

fn has_local_ref_outside(value: &Value, ids: &[NodeId]) -> bool {
    match value {
        Value::Node(node) => node.space == Space::Local && !ids.contains(&node.id),
        Value::List(items) => items.iter().any(|v| has_local_ref_outside(v, ids)),
        Value::Map(entries) => entries.values().any(|v| has_local_ref_outside(v, ids)),
        _ => false,
    }
}

/// True if the value carries a session-local node reference anywhere inside it.
pub fn contains_local_ref(value: &Value) -> bool {
    has_local_ref_outside(value, &[])
}
