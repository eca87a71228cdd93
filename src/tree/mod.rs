//! Hierarchical data store: node arenas, the global and session-local
//! registries, and whole-subtree persistence.

pub mod arena;
pub mod node;
pub mod serializer;
pub mod store;

pub use arena::{Arena, Binding};
pub use node::{Node, NodeId, NodeKind, NodeRef, Owner, Space};
pub use serializer::{NodeSnapshot, RegistrySnapshot, StoredValue};
pub use store::{TreeHandle, TreeStore};
