use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    analyzer::parse_program,
    ast::{Program, ProgramId},
    config::PersistenceConfig,
    debugger::BreakpointTable,
    tree::TreeStore,
    value::{Function, Value},
    ChariotResult,
};

use super::{
    context::{RunEnv, Scope, Unwind},
    host::HostBindings,
};

/// Tree-walking interpreter shared by every session. Holds no per-run state:
/// everything a run mutates lives in its [`RunEnv`] and scope chain.
pub struct Interpreter {
    pub(super) store: TreeStore,
    pub(super) bindings: Arc<HostBindings>,
    pub(super) breakpoints: Arc<BreakpointTable>,
    pub(super) persistence: PersistenceConfig,
    /// Parsed programs by id, with the source fingerprint they were parsed from.
    cache: DashMap<ProgramId, (ProgramId, Arc<Program>)>,
}

impl Interpreter {
    pub fn new(
        store: TreeStore,
        bindings: Arc<HostBindings>,
        breakpoints: Arc<BreakpointTable>,
        persistence: PersistenceConfig,
    ) -> Self {
        Self {
            store,
            bindings,
            breakpoints,
            persistence,
            cache: DashMap::new(),
        }
    }

    pub fn store(&self) -> &TreeStore {
        &self.store
    }

    pub fn bindings(&self) -> &Arc<HostBindings> {
        &self.bindings
    }

    pub fn breakpoints(&self) -> &Arc<BreakpointTable> {
        &self.breakpoints
    }

    pub fn persistence(&self) -> &PersistenceConfig {
        &self.persistence
    }

    /// Parses `source`, reusing the cached tree when the same id was parsed
    /// from the same text before. Unnamed programs are identified by a hash
    /// of their source.
    pub fn parse(&self, source: &str, name: Option<&str>) -> ChariotResult<Arc<Program>> {
        let fingerprint = ProgramId::from_source(source);
        let id = name.map(ProgramId::named).unwrap_or_else(|| fingerprint.clone());

        if let Some(entry) = self.cache.get(&id) {
            if entry.0 == fingerprint {
                return Ok(entry.1.clone());
            }
        }
        let program = Arc::new(parse_program(source, id.clone())?);
        tracing::debug!(program = %id, statements = program.len(), "program parsed");
        self.cache.insert(id, (fingerprint, program.clone()));
        Ok(program)
    }

    /// Runs every top-level statement in order. The value of the last one
    /// (or of a top-level `return`) is the result.
    #[tracing::instrument(level = "debug", skip_all, fields(program = %program.id))]
    pub async fn run(&self, program: &Program, env: &RunEnv) -> ChariotResult<Value> {
        let mut last = Value::Null;
        for (index, statement) in program.statements.iter().enumerate() {
            env.set_statement(index);
            self.gate(statement, &None, env, true).await?;
            match self.eval_expression(&statement.expression, &None, env).await {
                Ok(value) => last = value,
                Err(Unwind::Return(value)) => return Ok(value),
                Err(unwind) => {
                    let err = unwind.into_error();
                    tracing::debug!(
                        program = %program.id,
                        statement = index,
                        line = statement.line,
                        "run failed: {}",
                        err
                    );
                    return Err(err);
                }
            }
        }
        Ok(last)
    }

    pub async fn eval_source(
        &self,
        source: &str,
        name: Option<&str>,
        env: &RunEnv,
    ) -> ChariotResult<Value> {
        let program = self.parse(source, name)?;
        self.run(&program, env).await
    }

    /// Calls a closure from outside a program. `extra` names are bound in the
    /// call frame next to the parameters.
    pub async fn call_function(
        &self,
        function: &Function,
        args: Vec<Value>,
        env: &RunEnv,
        extra: Vec<(String, Value)>,
    ) -> ChariotResult<Value> {
        self.apply(function, args, env, extra).await
    }

    /// Evaluates a function body directly in `frame`, so consecutive calls
    /// share their locals. Parameters are not bound.
    pub async fn call_in_frame(
        &self,
        function: &Function,
        frame: &Arc<Scope>,
        env: &RunEnv,
    ) -> ChariotResult<Value> {
        let _frame_guard = env.enter_call()?;
        match self
            .eval_statements(&function.body.statements, &Some(frame.clone()), env)
            .await
        {
            Ok(value) | Err(Unwind::Return(value)) => Ok(value),
            Err(unwind) => Err(unwind.into_error()),
        }
    }

    pub(super) async fn apply(
        &self,
        function: &Function,
        args: Vec<Value>,
        env: &RunEnv,
        extra: Vec<(String, Value)>,
    ) -> ChariotResult<Value> {
        if args.len() > function.params.len() {
            return Err(crate::ChariotError::invalid_argument(format!(
                "function takes {} argument(s), got {}",
                function.params.len(),
                args.len()
            )));
        }
        let _frame_guard = env.enter_call()?;

        let frame = Scope::child_of(&function.captured);
        for (name, value) in extra {
            frame.bind(&name, value);
        }
        let mut args = args.into_iter();
        for param in &function.params {
            frame.bind(param, args.next().unwrap_or_default());
        }

        match self
            .eval_statements(&function.body.statements, &Some(frame), env)
            .await
        {
            Ok(value) | Err(Unwind::Return(value)) => Ok(value),
            Err(unwind) => Err(unwind.into_error()),
        }
    }
}
