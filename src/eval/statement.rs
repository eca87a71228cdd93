use std::{collections::BTreeMap, sync::Arc};

use crate::{
    ast::{Block, Statement},
    debugger::{Position, Variables},
    tree::Arena,
    value::Value,
    ChariotResult,
};

use super::{
    context::{EvalResult, RunEnv, Scope},
    evaluator::Interpreter,
};

impl Interpreter {
    /// Evaluates a block in a fresh child frame.
    pub(super) async fn eval_block(
        &self,
        block: &Block,
        scope: &Option<Arc<Scope>>,
        env: &RunEnv,
    ) -> EvalResult<Value> {
        let frame = Some(Scope::child_of(scope));
        self.eval_statements(&block.statements, &frame, env).await
    }

    /// Evaluates statements in `scope` itself. The empty sequence is `Null`.
    pub(super) async fn eval_statements(
        &self,
        statements: &[Statement],
        scope: &Option<Arc<Scope>>,
        env: &RunEnv,
    ) -> EvalResult<Value> {
        let mut last = Value::Null;
        for statement in statements {
            self.gate(statement, scope, env, false).await?;
            last = self
                .eval_expression(&statement.expression, scope, env)
                .await?;
        }
        Ok(last)
    }

    /// Reports a statement boundary to the debug controller, if any. Nested
    /// boundaries are only reported while the controller asks for them.
    pub(super) async fn gate(
        &self,
        statement: &Statement,
        scope: &Option<Arc<Scope>>,
        env: &RunEnv,
        top_level: bool,
    ) -> ChariotResult<()> {
        let Some(controller) = &env.controller else {
            return Ok(());
        };
        if !top_level && !controller.wants_fine_gates() {
            return Ok(());
        }

        let index = env.statement();
        let breakpoint = top_level
            && controller.honours_breakpoints()
            && self.breakpoint_hit(index, scope, env).await;
        let position = Position {
            statement: index,
            line: statement.line,
            column: statement.column,
            depth: env.depth(),
        };
        let variables = self.variables(scope, env).await;
        controller.gate(position, variables, breakpoint).await
    }

    async fn breakpoint_hit(&self, index: usize, scope: &Option<Arc<Scope>>, env: &RunEnv) -> bool {
        let Some(breakpoint) = self.breakpoints.active(&env.program, index) else {
            return false;
        };
        let Some(condition) = breakpoint.condition else {
            return true;
        };

        // conditions run without a controller so they never gate themselves
        let condition_env = RunEnv::new(env.tree.clone(), env.program.clone());
        let result = match self.parse(&condition, None) {
            Ok(program) => {
                let mut value = Ok(Value::Null);
                for statement in &program.statements {
                    value = self
                        .eval_expression(&statement.expression, scope, &condition_env)
                        .await
                        .map_err(|unwind| unwind.into_error());
                    if value.is_err() {
                        break;
                    }
                }
                value
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(value) => value.is_truthy(),
            Err(e) => {
                tracing::warn!(
                    program = %env.program,
                    statement = index,
                    %condition,
                    "breakpoint condition failed, pausing anyway: {}",
                    e
                );
                true
            }
        }
    }

    /// Frame chain (innermost first), then the session and global registries.
    pub(super) async fn variables(&self, scope: &Option<Arc<Scope>>, env: &RunEnv) -> Variables {
        let mut variables = Variables::new();
        if let Some(scope) = scope {
            for (depth, frame) in scope.frames().iter().enumerate() {
                variables.insert(format!("frame[{}]", depth), frame.snapshot());
            }
        }
        if let Some(local) = env.tree.local() {
            variables.insert("session".to_string(), registry_values(&*local.read().await));
        }
        variables.insert(
            "global".to_string(),
            registry_values(&*env.tree.global().read().await),
        );
        variables
    }
}

fn registry_values(arena: &Arena) -> BTreeMap<String, Value> {
    arena
        .bindings()
        .iter()
        .map(|(name, binding)| (name.clone(), binding.value.clone()))
        .collect()
}
