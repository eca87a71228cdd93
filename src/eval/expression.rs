use std::{str::FromStr, sync::Arc};

use async_recursion::async_recursion;

use crate::{
    ast::{self, Expression},
    tree::{arena::contains_local_ref, NodeKind, Space},
    value::{Function, TypeCode, Value},
    ChariotError, ChariotResult,
};

use super::{
    builtins::{self, Builtin},
    context::{EvalResult, RunEnv, Scope, Unwind},
    evaluator::Interpreter,
    host::HostContext,
};

fn eval_literal(literal: &ast::Literal) -> Value {
    match literal {
        ast::Literal::Number(n) => Value::Number(*n),
        ast::Literal::String(s) => Value::String(s.clone()),
        ast::Literal::Boolean(b) => Value::Bool(*b),
        ast::Literal::Null => Value::Null,
    }
}

fn expect_args(form: &str, args: &[Expression], min: usize, max: usize) -> ChariotResult<()> {
    if args.len() < min || args.len() > max {
        return Err(ChariotError::invalid_argument(format!(
            "{} expects {} argument(s), got {}",
            form,
            if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            },
            args.len()
        )));
    }
    Ok(())
}

impl Interpreter {
    #[async_recursion]
    pub(super) async fn eval_expression(
        &self,
        expr: &Expression,
        scope: &Option<Arc<Scope>>,
        env: &RunEnv,
    ) -> EvalResult<Value> {
        match expr {
            Expression::Literal(literal) => Ok(eval_literal(literal)),
            Expression::Variable(name) => Ok(self.lookup(name, scope, env).await?),
            Expression::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expression(item, scope, env).await?);
                }
                Ok(Value::List(values))
            }
            Expression::Call { name, arguments } => {
                self.eval_call(name, arguments, scope, env).await
            }
            Expression::If {
                branches,
                otherwise,
            } => {
                for (condition, block) in branches {
                    if self
                        .eval_expression(condition, scope, env)
                        .await?
                        .is_truthy()
                    {
                        return self.eval_block(block, scope, env).await;
                    }
                }
                match otherwise {
                    Some(block) => self.eval_block(block, scope, env).await,
                    None => Ok(Value::Null),
                }
            }
            Expression::While { condition, body } => {
                let mut last = Value::Null;
                while self
                    .eval_expression(condition, scope, env)
                    .await?
                    .is_truthy()
                {
                    if let Some(controller) = &env.controller {
                        controller.checkpoint().await?;
                    }
                    match self.eval_block(body, scope, env).await {
                        Ok(value) => last = value,
                        Err(Unwind::Break) => break,
                        Err(Unwind::Continue) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(last)
            }
            Expression::Switch {
                subject,
                cases,
                default,
            } => {
                let subject = match subject {
                    Some(subject) => Some(self.eval_expression(subject, scope, env).await?),
                    None => None,
                };
                for (case, block) in cases {
                    let value = self.eval_expression(case, scope, env).await?;
                    let hit = match &subject {
                        Some(subject) => *subject == value,
                        None => value.is_truthy(),
                    };
                    if hit {
                        return self.eval_block(block, scope, env).await;
                    }
                }
                match default {
                    Some(block) => self.eval_block(block, scope, env).await,
                    None => Ok(Value::Null),
                }
            }
            Expression::Function { params, body } => Ok(Value::Function(Arc::new(
                Function::new(params.clone(), body.clone(), scope.clone()),
            ))),
            // a trailing block is handed to the callee as a parameterless closure
            Expression::Block(block) => Ok(Value::Function(Arc::new(Function::new(
                Vec::new(),
                Arc::new(block.clone()),
                scope.clone(),
            )))),
        }
    }

    async fn eval_call(
        &self,
        name: &str,
        arguments: &[Expression],
        scope: &Option<Arc<Scope>>,
        env: &RunEnv,
    ) -> EvalResult<Value> {
        match name {
            "declare" => return Ok(self.eval_declare(arguments, scope, env, false).await?),
            "declareGlobal" => return Ok(self.eval_declare(arguments, scope, env, true).await?),
            "setq" => return self.eval_setq(arguments, scope, env).await,
            "destroy" => return self.eval_destroy(arguments, scope, env).await,
            "break" => {
                expect_args(name, arguments, 0, 0)?;
                return Err(Unwind::Break);
            }
            "continue" => {
                expect_args(name, arguments, 0, 0)?;
                return Err(Unwind::Continue);
            }
            "return" => {
                expect_args(name, arguments, 0, 1)?;
                let value = match arguments.first() {
                    Some(arg) => self.eval_expression(arg, scope, env).await?,
                    None => Value::Null,
                };
                return Err(Unwind::Return(value));
            }
            "and" | "or" => {
                let wanted = name == "and";
                for arg in arguments {
                    if self.eval_expression(arg, scope, env).await?.is_truthy() != wanted {
                        return Ok(Value::Bool(!wanted));
                    }
                }
                return Ok(Value::Bool(wanted));
            }
            _ => {}
        }

        let mut args = Vec::with_capacity(arguments.len());
        for arg in arguments {
            args.push(self.eval_expression(arg, scope, env).await?);
        }

        if let Some(builtin) = Builtin::lookup(name) {
            return Ok(builtins::call(builtin, args, env).await?);
        }
        if let Some(binding) = self.bindings.get(name) {
            let ctx = HostContext {
                tree: &env.tree,
                persistence: &self.persistence,
            };
            return Ok(self.bindings.invoke(binding.as_ref(), args, &ctx).await?);
        }
        match self.lookup_optional(name, scope, env).await {
            Some(Value::Function(function)) => Ok(self.apply(&function, args, env, Vec::new()).await?),
            Some(other) => Err(ChariotError::Type(format!(
                "'{}' is a {}, not a function",
                name,
                other.type_name()
            ))
            .into()),
            None => Err(ChariotError::UndefinedSymbol(format!("function '{}' not defined", name)).into()),
        }
    }

    /// Innermost frame outwards, then the session registry, then the global one.
    async fn lookup_optional(
        &self,
        name: &str,
        scope: &Option<Arc<Scope>>,
        env: &RunEnv,
    ) -> Option<Value> {
        if let Some(variable) = scope.as_ref().and_then(|s| s.get(name)) {
            return Some(variable.value);
        }
        if let Some(local) = env.tree.local() {
            if let Some(binding) = local.read().await.binding(name) {
                return Some(binding.value.clone());
            }
        }
        env.tree
            .global()
            .read()
            .await
            .binding(name)
            .map(|binding| binding.value.clone())
    }

    async fn lookup(
        &self,
        name: &str,
        scope: &Option<Arc<Scope>>,
        env: &RunEnv,
    ) -> ChariotResult<Value> {
        self.lookup_optional(name, scope, env)
            .await
            .ok_or_else(|| ChariotError::UndefinedSymbol(format!("variable '{}' not defined", name)))
    }

    /// First argument of the binding forms: a bare identifier names itself,
    /// anything else must evaluate to a string.
    async fn symbol(
        &self,
        form: &str,
        arg: Option<&Expression>,
        scope: &Option<Arc<Scope>>,
        env: &RunEnv,
    ) -> EvalResult<String> {
        match arg {
            Some(Expression::Variable(name)) => Ok(name.clone()),
            Some(other) => match self.eval_expression(other, scope, env).await? {
                Value::String(name) => Ok(name),
                value => Err(ChariotError::Type(format!(
                    "{} expects a name, got {}",
                    form,
                    value.type_name()
                ))
                .into()),
            },
            None => Err(ChariotError::invalid_argument(format!("{} expects a name", form)).into()),
        }
    }

    /// `declare(name, type?, value?)` and `declareGlobal(...)`.
    async fn eval_declare(
        &self,
        arguments: &[Expression],
        scope: &Option<Arc<Scope>>,
        env: &RunEnv,
        global: bool,
    ) -> EvalResult<Value> {
        let form = if global { "declareGlobal" } else { "declare" };
        expect_args(form, arguments, 1, 3)?;
        let name = self.symbol(form, arguments.first(), scope, env).await?;
        let type_code = match arguments.get(1) {
            None => TypeCode::Untyped,
            Some(arg) => match self.eval_expression(arg, scope, env).await? {
                Value::String(code) => TypeCode::from_str(&code).map_err(|_| {
                    ChariotError::invalid_argument(format!("unknown type code '{}'", code))
                })?,
                other => {
                    return Err(ChariotError::Type(format!(
                        "{} type must be a string, got {}",
                        form,
                        other.type_name()
                    ))
                    .into())
                }
            },
        };
        let value = match arguments.get(2) {
            Some(arg) => self.eval_expression(arg, scope, env).await?,
            None => type_code.default_value(),
        };

        let declared = match (global, scope) {
            (false, Some(frame)) => self.declare_in_frame(frame, &name, type_code, value, env).await?,
            _ => {
                let space = if global {
                    Space::Global
                } else {
                    env.tree.active_space()
                };
                env.tree.declare(space, &name, type_code, value).await?
            }
        };
        tracing::debug!(name = %name, %type_code, global, "declared");
        Ok(declared)
    }

    async fn declare_in_frame(
        &self,
        frame: &Arc<Scope>,
        name: &str,
        type_code: TypeCode,
        value: Value,
        env: &RunEnv,
    ) -> ChariotResult<Value> {
        if frame.has_own(name) {
            return Err(ChariotError::Declaration(format!(
                "'{}' is already declared in this scope",
                name
            )));
        }
        let value = if type_code.is_node() {
            let kind = if type_code == TypeCode::Json {
                NodeKind::Json
            } else {
                NodeKind::Tree
            };
            match value {
                Value::Null => Value::Node(env.tree.create_node(name, kind).await),
                Value::Map(entries) => {
                    let node = env.tree.create_node(name, kind).await;
                    for (key, v) in entries {
                        env.tree.set_attribute(node, &key, v).await?;
                    }
                    Value::Node(node)
                }
                other => other,
            }
        } else {
            value
        };
        frame.declare(name, type_code, value.clone())?;
        Ok(value)
    }

    /// `setq(name, value)`: nearest existing binding, else a new untyped one
    /// in the innermost scope.
    async fn eval_setq(
        &self,
        arguments: &[Expression],
        scope: &Option<Arc<Scope>>,
        env: &RunEnv,
    ) -> EvalResult<Value> {
        expect_args("setq", arguments, 2, 2)?;
        let name = self.symbol("setq", arguments.first(), scope, env).await?;
        let value = self.eval_expression(&arguments[1], scope, env).await?;

        if let Some(frame) = scope {
            if frame.assign(&name, value.clone())? {
                return Ok(value);
            }
        }
        if let Some(local) = env.tree.local() {
            if local.write().await.assign(&name, value.clone())? {
                return Ok(value);
            }
        }
        {
            let mut global = env.tree.global().write().await;
            if global.binding(&name).is_some() {
                if contains_local_ref(&value) {
                    return Err(ChariotError::Type(format!(
                        "'{}' cannot hold a session-local node in the global registry",
                        name
                    ))
                    .into());
                }
                global.assign(&name, value.clone())?;
                return Ok(value);
            }
        }

        match scope {
            Some(frame) => frame.bind(&name, value.clone()),
            None => env.tree.active().write().await.bind(&name, value.clone()),
        }
        Ok(value)
    }

    /// `destroy(name)` removes the nearest binding; owned nodes go with it.
    async fn eval_destroy(
        &self,
        arguments: &[Expression],
        scope: &Option<Arc<Scope>>,
        env: &RunEnv,
    ) -> EvalResult<Value> {
        expect_args("destroy", arguments, 1, 1)?;
        let name = self.symbol("destroy", arguments.first(), scope, env).await?;

        if scope.as_ref().is_some_and(|frame| frame.remove(&name)) {
            return Ok(Value::Null);
        }
        if let Some(local) = env.tree.local() {
            if local.write().await.remove_binding(&name).is_some() {
                return Ok(Value::Null);
            }
        }
        if env.tree.global().write().await.remove_binding(&name).is_some() {
            return Ok(Value::Null);
        }
        Err(ChariotError::UndefinedSymbol(format!("variable '{}' not defined", name)).into())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        ast::ProgramId,
        config::PersistenceConfig,
        debugger::BreakpointTable,
        eval::{HostBindings, Interpreter, RunEnv},
        tree::{Arena, Space, TreeStore},
        value::Value,
        ChariotError, ChariotResult, ErrorKind,
    };
    use pretty_assertions::assert_eq;
    use tokio::sync::RwLock;

    fn interpreter() -> Interpreter {
        Interpreter::new(
            TreeStore::new(),
            Arc::new(HostBindings::with_defaults()),
            Arc::new(BreakpointTable::new()),
            PersistenceConfig::default(),
        )
    }

    async fn eval(interpreter: &Interpreter, env: &RunEnv, source: &str) -> ChariotResult<Value> {
        interpreter.eval_source(source, None, env).await
    }

    fn global_env(interpreter: &Interpreter) -> RunEnv {
        RunEnv::new(interpreter.store().handle(None), ProgramId::named("test"))
    }

    #[tokio::test]
    async fn test_duplicate_declare_keeps_first_value() {
        let interpreter = interpreter();
        let env = global_env(&interpreter);
        eval(&interpreter, &env, "declare(x, 'N', 1)").await.unwrap();
        let err = eval(&interpreter, &env, "declare(x, 'N', 2)").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeclarationError);
        assert_eq!(eval(&interpreter, &env, "x").await.unwrap(), Value::Number(1.0));
    }

    #[tokio::test]
    async fn test_setq_respects_declared_type() {
        let interpreter = interpreter();
        let env = global_env(&interpreter);
        eval(&interpreter, &env, "declare(n, 'N', 1) setq(n, 5)").await.unwrap();
        assert_eq!(eval(&interpreter, &env, "n").await.unwrap(), Value::Number(5.0));

        let err = eval(&interpreter, &env, "setq(n, 'five')").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeError);
        assert!(matches!(
            eval(&interpreter, &env, "declare(y, 'Q')").await,
            Err(ChariotError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_block_scopes_do_not_leak() {
        let interpreter = interpreter();
        let env = global_env(&interpreter);
        let value = eval(
            &interpreter,
            &env,
            r#"
            declare(outer, 'N', 1)
            if (true) {
                declare(inner, 'N', 2)
                setq(outer, add(outer, inner))
            }
            outer
            "#,
        )
        .await
        .unwrap();
        assert_eq!(value, Value::Number(3.0));
        assert!(matches!(
            eval(&interpreter, &env, "inner").await,
            Err(ChariotError::UndefinedSymbol(ref m)) if m == "variable 'inner' not defined"
        ));
    }

    #[tokio::test]
    async fn test_loops_and_switch() {
        let interpreter = interpreter();
        let env = global_env(&interpreter);
        let value = eval(
            &interpreter,
            &env,
            r#"
            setq(i, 0)
            setq(total, 0)
            while (true) {
                setq(i, add(i, 1))
                if (equal(i, 3)) { continue() }
                if (bigger(i, 5)) { break() }
                setq(total, add(total, i))
            }
            total
            "#,
        )
        .await
        .unwrap();
        assert_eq!(value, Value::Number(12.0));

        let value = eval(
            &interpreter,
            &env,
            "switch (total) { case (1) { 'one' } case (12) { 'twelve' } default () { 'other' } }",
        )
        .await
        .unwrap();
        assert_eq!(value, Value::from("twelve"));
        let value = eval(
            &interpreter,
            &env,
            "switch () { case (false) { 1 } case (smaller(1, 2)) { 2 } }",
        )
        .await
        .unwrap();
        assert_eq!(value, Value::Number(2.0));

        assert!(matches!(
            eval(&interpreter, &env, "break()").await,
            Err(ChariotError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_and_or_short_circuit() {
        let interpreter = interpreter();
        let env = global_env(&interpreter);
        assert_eq!(
            eval(&interpreter, &env, "and(true, false, undefinedThing())").await.unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            eval(&interpreter, &env, "or(0, 'x', undefinedThing())").await.unwrap(),
            Value::Bool(true)
        );
    }

    #[tokio::test]
    async fn test_undefined_function_keeps_earlier_mutations() {
        let interpreter = interpreter();
        let env = global_env(&interpreter);
        let err = eval(
            &interpreter,
            &env,
            "declare(root, 'T') setAttribute(root, 'seen', true) foo()",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChariotError::UndefinedSymbol(ref m) if m == "function 'foo' not defined"));
        assert_eq!(
            eval(&interpreter, &env, "getAttribute(root, 'seen')").await.unwrap(),
            Value::Bool(true)
        );
    }

    #[tokio::test]
    async fn test_declare_targets_session_registry_and_global_moves() {
        let interpreter = interpreter();
        let local = Arc::new(RwLock::new(Arena::new(Space::Local)));
        let env = RunEnv::new(
            interpreter.store().handle(Some(local.clone())),
            ProgramId::named("session"),
        );

        eval(&interpreter, &env, "declare(draft, 'T')").await.unwrap();
        assert!(local.read().await.binding("draft").is_some());

        let published = eval(
            &interpreter,
            &env,
            "declare(doc, 'J', map('a', 1)) declareGlobal(shared, 'J', doc)",
        )
        .await
        .unwrap();
        let node = published.as_node().unwrap();
        assert_eq!(node.space, Space::Global);
        let global = interpreter.store().global().read().await;
        assert_eq!(global.get_attribute(node, "a").unwrap(), Value::Number(1.0));
        assert!(global.binding("shared").is_some());
    }

    #[tokio::test]
    async fn test_destroy() {
        let interpreter = interpreter();
        let env = global_env(&interpreter);
        eval(&interpreter, &env, "setq(tmp, 1) destroy(tmp)").await.unwrap();
        assert!(eval(&interpreter, &env, "tmp").await.is_err());
        assert_eq!(
            eval(&interpreter, &env, "destroy(tmp)").await.unwrap_err().kind(),
            ErrorKind::UndefinedSymbol
        );
    }

    #[tokio::test]
    async fn test_host_bindings_are_callable() {
        let interpreter = interpreter();
        let env = global_env(&interpreter);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.json");
        let source = format!(
            r#"
            declare(root, 'T')
            setAttribute(root, 'n', 7)
            treeSave(root, '{path}', 'text')
            setq(copy, treeLoad('{path}', 'text'))
            getAttribute(copy, 'n')
            "#,
            path = path.display()
        );
        assert_eq!(eval(&interpreter, &env, &source).await.unwrap(), Value::Number(7.0));

        let err = eval(&interpreter, &env, "treeLoad('/definitely/not/here', 'text')")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HostBindingError);
        assert!(err.to_string().contains("treeLoad"));

        let err = eval(&interpreter, &env, "treeSave(root, '/no/such/dir/x.bin')")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HostBindingError);
    }
}
