use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    ast::ProgramId,
    debugger::DebugController,
    session::logs::LogSink,
    tree::TreeHandle,
    value::{TypeCode, Value},
    ChariotError, ChariotResult,
};

/// Function frames deeper than this abort the run.
pub const MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub value: Value,
    pub type_code: TypeCode,
}

/// One frame of the lexical chain. Frames are shared by closures, so the
/// variable table is concurrent and the frame itself is immutable.
#[derive(Debug, Default)]
pub struct Scope {
    variables: DashMap<String, Variable>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_parent(parent: Arc<Scope>) -> Arc<Self> {
        Arc::new(Self {
            variables: DashMap::new(),
            parent: Some(parent),
        })
    }

    /// A fresh frame below `current`, or a fresh chain at top level.
    pub fn child_of(current: &Option<Arc<Scope>>) -> Arc<Self> {
        match current {
            Some(scope) => Self::with_parent(scope.clone()),
            None => Self::new(),
        }
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    pub fn get(&self, name: &str) -> Option<Variable> {
        if let Some(variable) = self.variables.get(name) {
            return Some(variable.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    /// True if this frame itself (not a parent) binds `name`.
    pub fn has_own(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn declare(&self, name: &str, type_code: TypeCode, value: Value) -> ChariotResult<()> {
        type_code.check(name, &value)?;
        match self.variables.entry(name.to_string()) {
            Entry::Occupied(_) => Err(ChariotError::Declaration(format!(
                "'{}' is already declared in this scope",
                name
            ))),
            Entry::Vacant(entry) => {
                entry.insert(Variable { value, type_code });
                Ok(())
            }
        }
    }

    /// Updates the nearest frame holding `name`. `false` if no frame does.
    pub fn assign(&self, name: &str, value: Value) -> ChariotResult<bool> {
        if let Some(mut variable) = self.variables.get_mut(name) {
            variable.type_code.check(name, &value)?;
            variable.value = value;
            return Ok(true);
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Ok(false),
        }
    }

    /// Untyped binding in this frame, replacing whatever was there.
    pub fn bind(&self, name: &str, value: Value) {
        self.variables.insert(
            name.to_string(),
            Variable {
                value,
                type_code: TypeCode::Untyped,
            },
        );
    }

    pub fn remove(&self, name: &str) -> bool {
        if self.variables.remove(name).is_some() {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.remove(name))
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.variables
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect()
    }

    /// Frames from innermost outwards.
    pub fn frames(self: &Arc<Self>) -> Vec<Arc<Scope>> {
        let mut frames = vec![self.clone()];
        let mut current = self.parent.clone();
        while let Some(scope) = current {
            current = scope.parent.clone();
            frames.push(scope);
        }
        frames
    }

    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.depth())
    }
}

/// Non-local exits threaded through evaluation.
#[derive(Debug)]
pub enum Unwind {
    Break,
    Continue,
    Return(Value),
    Fail(ChariotError),
}

impl From<ChariotError> for Unwind {
    fn from(err: ChariotError) -> Self {
        Unwind::Fail(err)
    }
}

impl Unwind {
    /// Error for an exit that escaped every construct able to catch it.
    pub fn into_error(self) -> ChariotError {
        match self {
            Unwind::Fail(err) => err,
            Unwind::Break => ChariotError::invalid_argument("break() outside of a loop"),
            Unwind::Continue => ChariotError::invalid_argument("continue() outside of a loop"),
            Unwind::Return(_) => ChariotError::invalid_argument("return() outside of a function"),
        }
    }
}

pub type EvalResult<T> = Result<T, Unwind>;

/// Everything one run needs besides the AST: tree access, the debug
/// controller and the log sink, plus the live call depth.
pub struct RunEnv {
    pub tree: TreeHandle,
    pub program: ProgramId,
    pub session: Option<String>,
    pub controller: Option<Arc<DebugController>>,
    pub logs: Option<Arc<LogSink>>,
    depth: AtomicUsize,
    statement: AtomicUsize,
}

impl RunEnv {
    pub fn new(tree: TreeHandle, program: ProgramId) -> Self {
        Self {
            tree,
            program,
            session: None,
            controller: None,
            logs: None,
            depth: AtomicUsize::new(0),
            statement: AtomicUsize::new(0),
        }
    }

    pub fn with_session(mut self, token: impl Into<String>) -> Self {
        self.session = Some(token.into());
        self
    }

    pub fn with_controller(mut self, controller: Arc<DebugController>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_logs(mut self, logs: Arc<LogSink>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Index of the top-level statement being executed.
    pub fn statement(&self) -> usize {
        self.statement.load(Ordering::SeqCst)
    }

    pub(crate) fn set_statement(&self, index: usize) {
        self.statement.store(index, Ordering::SeqCst);
    }

    pub fn enter_call(&self) -> ChariotResult<CallGuard<'_>> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > MAX_CALL_DEPTH {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(ChariotError::invalid_argument(format!(
                "call stack overflow at depth {}",
                MAX_CALL_DEPTH
            )));
        }
        Ok(CallGuard { env: self })
    }
}

/// Pops the call depth when the frame ends, whichever way it ends.
pub struct CallGuard<'a> {
    env: &'a RunEnv,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.env.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeStore;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_declare_is_frame_local() {
        let outer = Scope::new();
        outer.declare("x", TypeCode::Number, Value::Number(1.0)).unwrap();
        let inner = Scope::with_parent(outer.clone());
        inner.declare("x", TypeCode::String, Value::from("shadow")).unwrap();

        assert_eq!(inner.get("x").unwrap().value, Value::from("shadow"));
        assert_eq!(outer.get("x").unwrap().value, Value::Number(1.0));

        let err = outer
            .declare("x", TypeCode::Number, Value::Number(2.0))
            .unwrap_err();
        assert!(matches!(err, ChariotError::Declaration(_)));
        assert_eq!(outer.get("x").unwrap().value, Value::Number(1.0));
    }

    #[test]
    fn test_assign_walks_chain_and_type_checks() {
        let outer = Scope::new();
        outer.declare("n", TypeCode::Number, Value::Number(1.0)).unwrap();
        let inner = Scope::with_parent(outer.clone());

        assert!(inner.assign("n", Value::Number(5.0)).unwrap());
        assert_eq!(outer.get("n").unwrap().value, Value::Number(5.0));
        assert!(inner.assign("n", Value::from("five")).is_err());
        assert!(!inner.assign("missing", Value::Null).unwrap());
        assert_eq!(inner.depth(), 2);
        assert_eq!(inner.frames().len(), 2);
    }

    #[test]
    fn test_call_depth_guard() {
        let env = RunEnv::new(TreeStore::new().handle(None), ProgramId::named("t"));
        {
            let _a = env.enter_call().unwrap();
            let _b = env.enter_call().unwrap();
            assert_eq!(env.depth(), 2);
        }
        assert_eq!(env.depth(), 0);

        let mut guards = Vec::new();
        for _ in 0..MAX_CALL_DEPTH {
            guards.push(env.enter_call().unwrap());
        }
        assert!(matches!(
            env.enter_call(),
            Err(ChariotError::InvalidArgument(_))
        ));
        assert_eq!(env.depth(), MAX_CALL_DEPTH);
    }
}
