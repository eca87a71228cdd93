//! Host bindings: named native functions a program can call like builtins.
//!
//! Bindings resolve by name after the builtin set, so a binding can never
//! shadow `setAttribute` and friends. Every failure surfaces as
//! [`ChariotError::HostBinding`] with the binding's own error as its source.

use std::{future::Future, marker::PhantomData, str::FromStr, sync::Arc};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
    config::{Format, PersistenceConfig},
    tree::{serializer, NodeSnapshot, TreeHandle},
    value::Value,
    BoxError, ChariotError, ChariotResult,
};

pub struct HostContext<'a> {
    pub tree: &'a TreeHandle,
    pub persistence: &'a PersistenceConfig,
}

#[async_trait]
pub trait HostBinding: Send + Sync {
    fn name(&self) -> &str;

    async fn call(&self, args: Vec<Value>, ctx: &HostContext<'_>) -> Result<Value, BoxError>;
}

/// Adapts an async closure that needs no tree access.
pub struct HostFunction<F, Fut> {
    name: String,
    function: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> HostFunction<F, Fut>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send,
{
    pub fn new(name: impl Into<String>, function: F) -> Self {
        Self {
            name: name.into(),
            function,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> HostBinding for HostFunction<F, Fut>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, args: Vec<Value>, _ctx: &HostContext<'_>) -> Result<Value, BoxError> {
        (self.function)(args).await
    }
}

#[derive(Default)]
pub struct HostBindings {
    bindings: DashMap<String, Arc<dyn HostBinding>>,
}

impl HostBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard set: `treeSave` and `treeLoad`.
    pub fn with_defaults() -> Self {
        let bindings = Self::new();
        bindings.register(Arc::new(TreeSave));
        bindings.register(Arc::new(TreeLoad));
        bindings
    }

    /// Registers a binding, returning the one it replaced.
    pub fn register(&self, binding: Arc<dyn HostBinding>) -> Option<Arc<dyn HostBinding>> {
        tracing::debug!(binding = binding.name(), "host binding registered");
        self.bindings.insert(binding.name().to_string(), binding)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn HostBinding>> {
        self.bindings.get(name).map(|entry| entry.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub async fn invoke(
        &self,
        binding: &dyn HostBinding,
        args: Vec<Value>,
        ctx: &HostContext<'_>,
    ) -> ChariotResult<Value> {
        binding
            .call(args, ctx)
            .await
            .map_err(|e| ChariotError::host_binding(binding.name(), e))
    }
}

fn format_arg(args: &[Value], index: usize, ctx: &HostContext<'_>) -> ChariotResult<Format> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(ctx.persistence.format),
        Some(Value::String(s)) => Format::from_str(s)
            .map_err(|_| ChariotError::invalid_argument(format!("unknown format '{}'", s))),
        Some(other) => Err(ChariotError::Type(format!(
            "format must be a string, got {}",
            other.type_name()
        ))),
    }
}

fn path_arg(args: &[Value], index: usize) -> ChariotResult<String> {
    args.get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ChariotError::invalid_argument("expected a destination path"))
}

/// `treeSave(node, path, format?)`
struct TreeSave;

#[async_trait]
impl HostBinding for TreeSave {
    fn name(&self) -> &str {
        "treeSave"
    }

    async fn call(&self, args: Vec<Value>, ctx: &HostContext<'_>) -> Result<Value, BoxError> {
        let node = args.first().and_then(Value::as_node).ok_or_else(|| {
            ChariotError::invalid_argument("treeSave expects a node as first argument")
        })?;
        let path = path_arg(&args, 1)?;
        let format = format_arg(&args, 2, ctx)?;

        let snapshot = ctx
            .tree
            .snapshot(node, ctx.persistence.function_policy)
            .await?;
        serializer::write_document(&path, &snapshot, format).await?;
        tracing::info!(node = %snapshot.name, %path, %format, "tree saved");
        Ok(Value::String(path))
    }
}

/// `treeLoad(path, format?)`
struct TreeLoad;

#[async_trait]
impl HostBinding for TreeLoad {
    fn name(&self) -> &str {
        "treeLoad"
    }

    async fn call(&self, args: Vec<Value>, ctx: &HostContext<'_>) -> Result<Value, BoxError> {
        let path = path_arg(&args, 0)?;
        let format = format_arg(&args, 1, ctx)?;

        let snapshot: NodeSnapshot = serializer::read_document(&path, format).await?;
        let node = ctx.tree.materialize(&snapshot).await?;
        tracing::info!(node = %snapshot.name, %path, %format, "tree loaded");
        Ok(Value::Node(node))
    }
}
