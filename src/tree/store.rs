use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{
    config::FunctionPolicy,
    value::{TypeCode, Value},
    ChariotError, ChariotResult,
};

use super::{
    arena::{contains_local_ref, Arena},
    node::{NodeKind, NodeRef, Space},
    serializer::{self, NodeSnapshot, RegistrySnapshot},
};

/// The process-wide global registry. One coarse lock, taken per operation.
#[derive(Clone)]
pub struct TreeStore {
    global: Arc<RwLock<Arena>>,
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeStore {
    pub fn new() -> Self {
        Self {
            global: Arc::new(RwLock::new(Arena::new(Space::Global))),
        }
    }

    pub fn global(&self) -> &Arc<RwLock<Arena>> {
        &self.global
    }

    /// A handle scoped to one execution: global plus an optional session-local registry.
    pub fn handle(&self, local: Option<Arc<RwLock<Arena>>>) -> TreeHandle {
        TreeHandle {
            global: self.global.clone(),
            local,
        }
    }

    pub async fn root_names(&self) -> Vec<String> {
        self.global.read().await.bindings().keys().cloned().collect()
    }

    pub async fn snapshot_registry(&self, policy: FunctionPolicy) -> ChariotResult<RegistrySnapshot> {
        serializer::snapshot_registry(&*self.global.read().await, policy)
    }

    pub async fn restore_registry(&self, snapshot: &RegistrySnapshot) -> ChariotResult<usize> {
        serializer::restore_registry(&mut *self.global.write().await, snapshot)
    }
}

/// Tree access for one run. Node operations lock only the arena the node lives in;
/// cross-registry moves take the global lock before the local one.
#[derive(Clone)]
pub struct TreeHandle {
    global: Arc<RwLock<Arena>>,
    local: Option<Arc<RwLock<Arena>>>,
}

impl TreeHandle {
    pub fn global(&self) -> &Arc<RwLock<Arena>> {
        &self.global
    }

    pub fn local(&self) -> Option<&Arc<RwLock<Arena>>> {
        self.local.as_ref()
    }

    /// The registry that `declare` and node creation target at top level.
    pub fn active(&self) -> &Arc<RwLock<Arena>> {
        self.local.as_ref().unwrap_or(&self.global)
    }

    pub fn active_space(&self) -> Space {
        if self.local.is_some() {
            Space::Local
        } else {
            Space::Global
        }
    }

    fn arena(&self, space: Space) -> ChariotResult<&Arc<RwLock<Arena>>> {
        match space {
            Space::Global => Ok(&self.global),
            Space::Local => self.local.as_ref().ok_or_else(|| {
                ChariotError::InvalidArgument(
                    "session-local node used outside of its session".to_string(),
                )
            }),
        }
    }

    pub async fn read<R>(
        &self,
        node: NodeRef,
        f: impl FnOnce(&Arena) -> ChariotResult<R>,
    ) -> ChariotResult<R> {
        let arena = self.arena(node.space)?.read().await;
        f(&arena)
    }

    pub async fn write<R>(
        &self,
        node: NodeRef,
        f: impl FnOnce(&mut Arena) -> ChariotResult<R>,
    ) -> ChariotResult<R> {
        let mut arena = self.arena(node.space)?.write().await;
        f(&mut arena)
    }

    pub async fn create_node(&self, name: &str, kind: NodeKind) -> NodeRef {
        self.active().write().await.create_node(name, kind)
    }

    pub async fn set_attribute(&self, node: NodeRef, key: &str, value: Value) -> ChariotResult<()> {
        if node.space == Space::Global && contains_local_ref(&value) {
            return Err(ChariotError::Type(format!(
                "cannot store a session-local node in global attribute '{}'",
                key
            )));
        }
        self.write(node, |arena| arena.set_attribute(node, key, value))
            .await
    }

    pub async fn get_attribute(&self, node: NodeRef, key: &str) -> ChariotResult<Value> {
        self.read(node, |arena| arena.get_attribute(node, key)).await
    }

    pub async fn has_attribute(&self, node: NodeRef, key: &str) -> bool {
        self.read(node, |arena| Ok(arena.has_attribute(node, key)))
            .await
            .unwrap_or(false)
    }

    /// Moves `child` under `parent`, across registries if needed. Returns the
    /// child's reference after the move.
    pub async fn add_child(&self, parent: NodeRef, child: NodeRef) -> ChariotResult<NodeRef> {
        if parent.space == child.space {
            self.write(parent, |arena| arena.add_child(parent, child))
                .await?;
            return Ok(child);
        }

        let mut global = self.global.write().await;
        let mut local = self.arena(Space::Local)?.write().await;
        let (source, target) = match child.space {
            Space::Local => (&mut *local, &mut *global),
            Space::Global => (&mut *global, &mut *local),
        };
        let name = source.node(child)?.name.clone();
        if target.child(parent, &name)?.is_some() {
            return Err(ChariotError::Declaration(format!(
                "'{}' already has a child named '{}'",
                target.node(parent)?.name,
                name
            )));
        }
        let moved = transfer(source, target, child)?;
        target.add_child(parent, moved)?;
        Ok(moved)
    }

    /// Moves a node (with its subtree) into `space`, detached. A node already
    /// there is returned unchanged.
    pub async fn move_to(&self, node: NodeRef, space: Space) -> ChariotResult<NodeRef> {
        if node.space == space {
            return Ok(node);
        }
        let mut global = self.global.write().await;
        let mut local = self.arena(Space::Local)?.write().await;
        match space {
            Space::Global => transfer(&mut local, &mut global, node),
            Space::Local => transfer(&mut global, &mut local, node),
        }
    }

    /// Declares `name` in the registry for `space`. A node from the other
    /// registry is moved over first; the name check, the move and the binding
    /// all happen under the same locks.
    pub async fn declare(
        &self,
        space: Space,
        name: &str,
        type_code: TypeCode,
        value: Value,
    ) -> ChariotResult<Value> {
        match value {
            Value::Node(node) if node.space != space => {
                let mut global = self.global.write().await;
                let mut local = self.arena(Space::Local)?.write().await;
                let (source, target) = match space {
                    Space::Global => (&mut *local, &mut *global),
                    Space::Local => (&mut *global, &mut *local),
                };
                ensure_undeclared(target, name)?;
                let moved = transfer(source, target, node)?;
                target.declare(name, type_code, Value::Node(moved))
            }
            value => {
                let mut registry = self.arena(space)?.write().await;
                ensure_undeclared(&registry, name)?;
                if space == Space::Global && contains_local_ref(&value) {
                    return Err(ChariotError::Type(format!(
                        "'{}' cannot hold a session-local node in the global registry",
                        name
                    )));
                }
                registry.declare(name, type_code, value)
            }
        }
    }

    pub async fn snapshot(&self, node: NodeRef, policy: FunctionPolicy) -> ChariotResult<NodeSnapshot> {
        self.read(node, |arena| serializer::snapshot_node(arena, node, policy))
            .await
    }

    /// Rebuilds a snapshot as a detached node in the active registry.
    pub async fn materialize(&self, snapshot: &NodeSnapshot) -> ChariotResult<NodeRef> {
        serializer::materialize_node(&mut *self.active().write().await, snapshot)
    }
}

fn ensure_undeclared(registry: &Arena, name: &str) -> ChariotResult<()> {
    if registry.binding(name).is_some() {
        return Err(ChariotError::Declaration(format!(
            "'{}' is already declared in the {} registry",
            name,
            registry.space()
        )));
    }
    Ok(())
}

fn transfer(source: &mut Arena, target: &mut Arena, node: NodeRef) -> ChariotResult<NodeRef> {
    if target.space() == Space::Global && source.has_foreign_local_refs(node)? {
        return Err(ChariotError::Type(
            "cannot move a node holding session-local references into the global registry"
                .to_string(),
        ));
    }
    let subtree = source.extract(node)?;
    Ok(target.insert(subtree))
}
