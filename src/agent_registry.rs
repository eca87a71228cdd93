//! Agents are not a separate store: an agent is a global root binding named
//! `...Agent` whose node has a json `rules` child. Every call re-validates
//! against the live registry.

use std::{collections::BTreeMap, sync::Arc};

use dashmap::DashMap;
use serde::Serialize;
use tokio::{
    sync::{broadcast, Notify},
    task::JoinHandle,
};

use crate::{
    ast::ProgramId,
    config::AgentConfig,
    eval::{Interpreter, RunEnv, Scope},
    event_bus::{ErrorEvent, Event, EventBus},
    tree::{arena::contains_local_ref, Arena, NodeKind, NodeRef},
    value::{Function, TypeCode, Value},
    ChariotError, ChariotResult, ErrorInfo,
};

const RULES: &str = "rules";
const PLANS: &str = "plans";
const BELIEFS: &str = "beliefs";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentInfo {
    pub name: String,
    pub attributes: Vec<String>,
    pub children: Vec<String>,
    pub rules: Vec<String>,
    pub plans: Vec<String>,
    pub beliefs: Vec<String>,
    pub running: bool,
}

/// Result of one plan instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub ran: bool,
    pub dropped_at: Option<usize>,
    pub value: Value,
}

struct Scheduler {
    handle: JoinHandle<()>,
    nudge: Arc<Notify>,
    shutdown_tx: broadcast::Sender<()>,
}

struct Plan {
    name: String,
    trigger: Option<Arc<Function>>,
    guard: Option<Arc<Function>>,
    steps: Vec<Arc<Function>>,
    drop: Option<Arc<Function>>,
}

impl Plan {
    fn from_value(agent: &str, key: &str, value: &Value) -> ChariotResult<Self> {
        let Value::Map(entries) = value else {
            return Err(ChariotError::Type(format!(
                "plan '{}' of {} is a {}, not a plan",
                key,
                agent,
                value.type_name()
            )));
        };
        let function = |field: &str| -> Option<Arc<Function>> {
            entries.get(field).and_then(|v| v.as_function()).cloned()
        };
        let steps = match entries.get("steps") {
            Some(Value::List(items)) => items
                .iter()
                .filter_map(|v| v.as_function().cloned())
                .collect(),
            _ => Vec::new(),
        };
        Ok(Self {
            name: entries
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or(key)
                .to_string(),
            trigger: function("trigger"),
            guard: function("guard"),
            steps,
            drop: function("drop"),
        })
    }
}

#[derive(Clone)]
pub struct AgentRegistry {
    interpreter: Arc<Interpreter>,
    events: Arc<EventBus>,
    config: AgentConfig,
    running: Arc<DashMap<String, Scheduler>>,
}

impl AgentRegistry {
    pub fn new(interpreter: Arc<Interpreter>, events: Arc<EventBus>, config: AgentConfig) -> Self {
        Self {
            interpreter,
            events,
            config,
            running: Arc::new(DashMap::new()),
        }
    }

    // --- queries ----------------------------------------------------------

    pub async fn list_agents(&self) -> Vec<String> {
        let global = self.interpreter.store().global().read().await;
        global
            .bindings()
            .keys()
            .filter(|name| resolve_agent(&global, name).is_ok())
            .cloned()
            .collect()
    }

    pub async fn get_agent_info(&self, name: &str) -> ChariotResult<AgentInfo> {
        let global = self.interpreter.store().global().read().await;
        let agent = resolve_agent(&global, name)?;
        let node = global.node(agent)?;
        let mut children = Vec::new();
        for child in global.children(agent)? {
            children.push(global.node(child)?.name.clone());
        }
        let rules = match global.child(agent, RULES)? {
            Some(rules) => global.attribute_names(rules)?,
            None => Vec::new(),
        };
        let plans = match global.child(agent, PLANS)? {
            Some(plans) => global.attribute_names(plans)?,
            None => Vec::new(),
        };
        let beliefs = match node.attributes.get(BELIEFS) {
            Some(Value::Map(entries)) => entries.keys().cloned().collect(),
            _ => Vec::new(),
        };
        Ok(AgentInfo {
            name: name.to_string(),
            attributes: node.attributes.keys().cloned().collect(),
            children,
            rules,
            plans,
            beliefs,
            running: self.running.contains_key(name),
        })
    }

    // --- rules and beliefs ------------------------------------------------

    /// Calls `rules[rule]` with `self` and every child of the agent bound by
    /// name in the call frame. Arguments past the rule's parameters are
    /// caller context the rule did not ask for and are dropped.
    pub async fn call_rule(
        &self,
        agent: &str,
        rule: &str,
        mut args: Vec<Value>,
    ) -> ChariotResult<Value> {
        let (function, extra) = {
            let global = self.interpreter.store().global().read().await;
            let node = resolve_agent(&global, agent)?;
            let rules = global.child(node, RULES)?.ok_or_else(|| {
                ChariotError::Declaration(format!("agent '{}' has no rules", agent))
            })?;
            let function = match global.get_attribute(rules, rule) {
                Ok(Value::Function(function)) => function,
                Ok(other) => {
                    return Err(ChariotError::Type(format!(
                        "rule '{}' of {} is a {}, not a function",
                        rule,
                        agent,
                        other.type_name()
                    )))
                }
                Err(_) => {
                    return Err(ChariotError::Declaration(format!(
                        "agent '{}' has no rule '{}'",
                        agent, rule
                    )))
                }
            };
            (function, agent_bindings(&global, node)?)
        };

        if args.len() > function.params.len() {
            let dropped = args.len() - function.params.len();
            tracing::trace!(agent, rule, dropped, "surplus rule arguments");
            args.truncate(function.params.len());
        }
        tracing::debug!(agent, rule, "calling rule");
        let env = self.env(agent, rule);
        self.interpreter
            .call_function(&function, args, &env, extra)
            .await
    }

    /// Upserts into the agent's `beliefs` map and nudges its scheduler.
    pub async fn set_belief(&self, agent: &str, key: &str, value: Value) -> ChariotResult<()> {
        if contains_local_ref(&value) {
            return Err(ChariotError::Type(format!(
                "belief '{}' cannot hold a session-local node",
                key
            )));
        }
        {
            let mut global = self.interpreter.store().global().write().await;
            let node = resolve_agent(&global, agent)?;
            let mut beliefs = match global.get_attribute(node, BELIEFS) {
                Ok(Value::Map(entries)) => entries,
                _ => BTreeMap::new(),
            };
            beliefs.insert(key.to_string(), value);
            global.set_attribute(node, BELIEFS, Value::Map(beliefs))?;
        }
        if let Some(scheduler) = self.running.get(agent) {
            scheduler.nudge.notify_one();
        }
        Ok(())
    }

    pub async fn get_beliefs(&self, agent: &str) -> ChariotResult<BTreeMap<String, Value>> {
        let global = self.interpreter.store().global().read().await;
        let node = resolve_agent(&global, agent)?;
        Ok(match global.get_attribute(node, BELIEFS) {
            Ok(Value::Map(entries)) => entries,
            _ => BTreeMap::new(),
        })
    }

    // --- lifecycle --------------------------------------------------------

    /// Declares a global agent root with empty `rules` and `plans` and starts
    /// its scheduler.
    pub async fn create_agent(&self, name: &str) -> ChariotResult<()> {
        if !name.ends_with("Agent") || name == "Agent" {
            return Err(ChariotError::invalid_argument(format!(
                "agent name '{}' must end in 'Agent'",
                name
            )));
        }
        {
            let mut global = self.interpreter.store().global().write().await;
            let root = global
                .declare(name, TypeCode::Tree, Value::Null)?
                .as_node()
                .ok_or_else(|| ChariotError::internal("agent root is not a node"))?;
            let rules = global.create_node(RULES, NodeKind::Json);
            global.add_child(root, rules)?;
            let plans = global.create_node(PLANS, NodeKind::Json);
            global.add_child(root, plans)?;
        }
        tracing::info!(agent = %name, "agent created");
        self.events
            .notify(Event::AgentCreated {
                agent: name.to_string(),
            })
            .await;
        self.start_agent(name).await
    }

    /// Starts the scheduler of an existing agent. A running one is left alone.
    pub async fn start_agent(&self, name: &str) -> ChariotResult<()> {
        {
            let global = self.interpreter.store().global().read().await;
            resolve_agent(&global, name)?;
        }
        if self.running.contains_key(name) {
            return Ok(());
        }

        let nudge = Arc::new(Notify::new());
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let registry = self.clone();
        let agent = name.to_string();
        let task_nudge = nudge.clone();
        let period = self.config.poll_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = task_nudge.notified() => {}
                    _ = shutdown_rx.recv() => {
                        tracing::debug!(agent = %agent, "scheduler stopped");
                        break;
                    }
                }
                registry.schedule(&agent).await;
            }
        });
        self.running.insert(
            name.to_string(),
            Scheduler {
                handle,
                nudge,
                shutdown_tx,
            },
        );
        Ok(())
    }

    /// Stops the scheduler. `false` if it was not running.
    pub async fn stop_agent(&self, name: &str) -> ChariotResult<bool> {
        let Some((_, scheduler)) = self.running.remove(name) else {
            return Ok(false);
        };
        if scheduler.shutdown_tx.send(()).is_err() {
            scheduler.handle.abort();
        } else if let Err(e) = scheduler.handle.await {
            if !e.is_cancelled() {
                tracing::warn!(agent = %name, "scheduler ended abnormally: {}", e);
            }
        }
        tracing::info!(agent = %name, "agent stopped");
        self.events
            .notify(Event::AgentStopped {
                agent: name.to_string(),
            })
            .await;
        Ok(true)
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Err(e) = self.stop_agent(&name).await {
                tracing::warn!(agent = %name, "failed to stop agent: {}", e);
            }
        }
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.contains_key(name)
    }

    /// Wakes the scheduler so it evaluates triggers now.
    pub async fn publish_agent(&self, name: &str) -> ChariotResult<()> {
        {
            let global = self.interpreter.store().global().read().await;
            resolve_agent(&global, name)?;
        }
        match self.running.get(name) {
            Some(scheduler) => scheduler.nudge.notify_one(),
            None => tracing::debug!(agent = %name, "publish to a stopped agent ignored"),
        }
        Ok(())
    }

    // --- plans ------------------------------------------------------------

    /// Runs one instance of `plans[plan]`: the guard must hold, `drop` is
    /// checked before every step, and all steps share one frame holding
    /// `self`, the agent's children and `args`.
    pub async fn run_plan_once(
        &self,
        agent: &str,
        plan: &str,
        args: BTreeMap<String, Value>,
    ) -> ChariotResult<PlanOutcome> {
        let (plan, frame) = self.instantiate(agent, plan, args).await?;
        self.execute_plan(agent, &plan, &frame).await
    }

    async fn instantiate(
        &self,
        agent: &str,
        plan: &str,
        args: BTreeMap<String, Value>,
    ) -> ChariotResult<(Plan, Arc<Scope>)> {
        let global = self.interpreter.store().global().read().await;
        let node = resolve_agent(&global, agent)?;
        let plans = global.child(node, PLANS)?.ok_or_else(|| {
            ChariotError::Declaration(format!("agent '{}' has no plans", agent))
        })?;
        let value = global.get_attribute(plans, plan).map_err(|_| {
            ChariotError::Declaration(format!("agent '{}' has no plan '{}'", agent, plan))
        })?;
        let plan = Plan::from_value(agent, plan, &value)?;
        let frame = Scope::new();
        for (name, value) in agent_bindings(&global, node)? {
            frame.bind(&name, value);
        }
        for (name, value) in args {
            frame.bind(&name, value);
        }
        Ok((plan, frame))
    }

    async fn execute_plan(&self, agent: &str, plan: &Plan, frame: &Arc<Scope>) -> ChariotResult<PlanOutcome> {
        let env = self.env(agent, &plan.name);
        if let Some(guard) = &plan.guard {
            if !self.holds(guard, frame, &env).await {
                return Ok(PlanOutcome {
                    ran: false,
                    dropped_at: None,
                    value: Value::Null,
                });
            }
        }

        tracing::debug!(agent, plan = %plan.name, steps = plan.steps.len(), "plan started");
        self.events
            .notify(Event::PlanStarted {
                agent: agent.to_string(),
                plan: plan.name.clone(),
            })
            .await;

        let mut value = Value::Null;
        for (index, step) in plan.steps.iter().enumerate() {
            if let Some(drop) = &plan.drop {
                if self.holds(drop, frame, &env).await {
                    tracing::debug!(agent, plan = %plan.name, step = index, "plan dropped");
                    self.events
                        .notify(Event::PlanDropped {
                            agent: agent.to_string(),
                            plan: plan.name.clone(),
                            step: index,
                        })
                        .await;
                    return Ok(PlanOutcome {
                        ran: index > 0,
                        dropped_at: Some(index),
                        value,
                    });
                }
            }
            value = match self.interpreter.call_in_frame(step, frame, &env).await {
                Ok(value) => value,
                Err(e) => {
                    self.events
                        .notify(Event::PlanFailed {
                            agent: agent.to_string(),
                            plan: plan.name.clone(),
                        })
                        .await;
                    return Err(e);
                }
            };
        }

        self.events
            .notify(Event::PlanFinished {
                agent: agent.to_string(),
                plan: plan.name.clone(),
            })
            .await;
        Ok(PlanOutcome {
            ran: true,
            dropped_at: None,
            value,
        })
    }

    /// One scheduler pass: runs every plan whose trigger holds. A plan
    /// without a trigger only runs through [`AgentRegistry::run_plan_once`].
    async fn schedule(&self, agent: &str) {
        let keys = {
            let global = self.interpreter.store().global().read().await;
            let plans = resolve_agent(&global, agent)
                .and_then(|node| global.child(node, PLANS))
                .ok()
                .flatten();
            match plans.map(|plans| global.attribute_names(plans)) {
                Some(Ok(keys)) => keys,
                _ => return,
            }
        };

        for key in keys {
            let (plan, frame) = match self.instantiate(agent, &key, BTreeMap::new()).await {
                Ok(instance) => instance,
                Err(e) => {
                    tracing::debug!(agent, plan = %key, "skipping plan: {}", e);
                    continue;
                }
            };
            let Some(trigger) = &plan.trigger else {
                continue;
            };
            let env = self.env(agent, &plan.name);
            if !self.holds(trigger, &frame, &env).await {
                continue;
            }
            if let Err(e) = self.execute_plan(agent, &plan, &frame).await {
                tracing::warn!(agent, plan = %plan.name, "plan failed: {}", e);
                if let Err(send) = self
                    .events
                    .publish_error(ErrorEvent {
                        source: format!("{}.{}", agent, plan.name),
                        error: ErrorInfo::from(&e),
                    })
                    .await
                {
                    tracing::trace!("plan failure not delivered: {}", send);
                }
            }
        }
    }

    /// Trigger, guard and drop conditions. Evaluation errors count as false.
    async fn holds(&self, condition: &Function, frame: &Arc<Scope>, env: &RunEnv) -> bool {
        match self.interpreter.call_in_frame(condition, frame, env).await {
            Ok(value) => value.is_truthy(),
            Err(e) => {
                tracing::debug!(program = %env.program, "condition failed: {}", e);
                false
            }
        }
    }

    fn env(&self, agent: &str, entry: &str) -> RunEnv {
        RunEnv::new(
            self.interpreter.store().handle(None),
            ProgramId::named(format!("{}.{}", agent, entry)),
        )
    }
}

/// The node bound to `name` if it is a valid agent.
fn resolve_agent(global: &Arena, name: &str) -> ChariotResult<NodeRef> {
    let not_found = || ChariotError::Declaration(format!("agent '{}' not found", name));
    if !name.ends_with("Agent") {
        return Err(not_found());
    }
    let node = global
        .binding(name)
        .and_then(|binding| binding.value.as_node())
        .ok_or_else(not_found)?;
    match global.child(node, RULES)? {
        Some(rules) if global.node(rules)?.kind == NodeKind::Json => Ok(node),
        _ => Err(not_found()),
    }
}

/// `self` plus every child of the agent by name.
fn agent_bindings(global: &Arena, node: NodeRef) -> ChariotResult<Vec<(String, Value)>> {
    let mut bindings = vec![("self".to_string(), Value::Node(node))];
    for child in global.children(node)? {
        bindings.push((global.node(child)?.name.clone(), Value::Node(child)));
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::PersistenceConfig, debugger::BreakpointTable, eval::HostBindings, tree::TreeStore,
    };
    use pretty_assertions::assert_eq;
    use tokio::sync::Mutex;

    struct EventCollector {
        events: Arc<Mutex<Vec<Event>>>,
        _task: JoinHandle<()>,
    }

    impl EventCollector {
        fn new(event_bus: &EventBus) -> Self {
            let events = Arc::new(Mutex::new(Vec::new()));
            let events_clone = events.clone();
            let (mut rx, _) = event_bus.subscribe();
            let task = tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    events_clone.lock().await.push(event);
                }
            });
            Self {
                events,
                _task: task,
            }
        }

        async fn get_events(&self) -> Vec<Event> {
            self.events.lock().await.clone()
        }
    }

    fn registry() -> AgentRegistry {
        let interpreter = Arc::new(Interpreter::new(
            TreeStore::new(),
            Arc::new(HostBindings::with_defaults()),
            Arc::new(BreakpointTable::new()),
            PersistenceConfig::default(),
        ));
        AgentRegistry::new(
            interpreter,
            Arc::new(EventBus::new(64)),
            AgentConfig {
                poll_interval: Duration::from_millis(20),
            },
        )
    }

    async fn eval(registry: &AgentRegistry, source: &str) -> Value {
        let env = RunEnv::new(
            registry.interpreter.store().handle(None),
            ProgramId::named("setup"),
        );
        registry
            .interpreter
            .eval_source(source, None, &env)
            .await
            .unwrap()
    }

    const USERS_AGENT: &str = r#"
        declare(usersAgent, 'T')
        addChild(usersAgent, jsonNode('rules'))
        setAttribute(getChild(usersAgent, 'rules'), 'userCount', func() {
            if (hasAttribute(self, "_users")) { length(getAttribute(self, "_users")) } else { 0 }
        })
    "#;

    #[tokio::test]
    async fn test_call_rule_binds_self() {
        let registry = registry();
        eval(&registry, USERS_AGENT).await;
        assert_eq!(registry.list_agents().await, vec!["usersAgent".to_string()]);

        let count = registry.call_rule("usersAgent", "userCount", vec![]).await.unwrap();
        assert_eq!(count, Value::Number(0.0));

        eval(&registry, "setAttribute(usersAgent, '_users', ['ann', 'bob', 'cy'])").await;
        let count = registry.call_rule("usersAgent", "userCount", vec![]).await.unwrap();
        assert_eq!(count, Value::Number(3.0));

        // a caller context the rule does not take is accepted
        let ctx = Value::Map([("caller".to_string(), Value::from("cli"))].into());
        let count = registry
            .call_rule("usersAgent", "userCount", vec![ctx])
            .await
            .unwrap();
        assert_eq!(count, Value::Number(3.0));
    }

    #[tokio::test]
    async fn test_call_rule_errors() {
        let registry = registry();
        eval(&registry, USERS_AGENT).await;
        eval(
            &registry,
            "setAttribute(getChild(usersAgent, 'rules'), 'answer', 42)",
        )
        .await;

        assert!(matches!(
            registry.call_rule("usersAgent", "missing", vec![]).await,
            Err(ChariotError::Declaration(_))
        ));
        assert!(matches!(
            registry.call_rule("ghostAgent", "userCount", vec![]).await,
            Err(ChariotError::Declaration(_))
        ));
        assert!(matches!(
            registry.call_rule("usersAgent", "answer", vec![]).await,
            Err(ChariotError::Type(_))
        ));
    }

    #[tokio::test]
    async fn test_not_an_agent_without_json_rules() {
        let registry = registry();
        eval(
            &registry,
            "declare(fakeAgent, 'T') addChild(fakeAgent, createNode('rules'))",
        )
        .await;
        assert!(registry.list_agents().await.is_empty());
        assert!(registry.get_agent_info("fakeAgent").await.is_err());
    }

    #[tokio::test]
    async fn test_beliefs_and_info() {
        let registry = registry();
        registry.create_agent("helloAgent").await.unwrap();
        registry
            .set_belief("helloAgent", "mood", Value::from("calm"))
            .await
            .unwrap();

        let beliefs = registry.get_beliefs("helloAgent").await.unwrap();
        assert_eq!(beliefs.get("mood"), Some(&Value::from("calm")));

        let info = registry.get_agent_info("helloAgent").await.unwrap();
        assert_eq!(info.children, vec!["rules".to_string(), "plans".to_string()]);
        assert_eq!(info.beliefs, vec!["mood".to_string()]);
        assert!(info.running);

        assert!(matches!(
            registry.create_agent("helloAgent").await,
            Err(ChariotError::Declaration(_))
        ));
        assert!(matches!(
            registry.create_agent("hello").await,
            Err(ChariotError::InvalidArgument(_))
        ));
        assert!(registry.stop_agent("helloAgent").await.unwrap());
        assert!(!registry.stop_agent("helloAgent").await.unwrap());
    }

    #[tokio::test]
    async fn test_run_plan_once_with_drop() {
        let registry = registry();
        registry.create_agent("countAgent").await.unwrap();
        registry.stop_agent("countAgent").await.unwrap();
        eval(
            &registry,
            r#"
            setAttribute(getChild(countAgent, 'plans'), 'count', plan(
                'count',
                null,
                func() { true },
                [
                    func() { setq(n, start) },
                    func() { setq(n, add(n, 1)) },
                    func() { setq(n, add(n, 1)) },
                    func() { n }
                ],
                func() { and(hasAttribute(self, 'halt'), getAttribute(self, 'halt')) }
            ))
            "#,
        )
        .await;

        let mut args = BTreeMap::new();
        args.insert("start".to_string(), Value::Number(10.0));
        let outcome = registry
            .run_plan_once("countAgent", "count", args.clone())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PlanOutcome {
                ran: true,
                dropped_at: None,
                value: Value::Number(12.0),
            }
        );

        eval(&registry, "setAttribute(countAgent, 'halt', true)").await;
        let outcome = registry
            .run_plan_once("countAgent", "count", args)
            .await
            .unwrap();
        assert_eq!(outcome.dropped_at, Some(0));
        assert!(!outcome.ran);
    }

    #[tokio::test]
    async fn test_guard_blocks_plan() {
        let registry = registry();
        registry.create_agent("idleAgent").await.unwrap();
        eval(
            &registry,
            "setAttribute(getChild(idleAgent, 'plans'), 'never', plan('never', null, func() { false }, func() { 1 }))",
        )
        .await;
        let outcome = registry
            .run_plan_once("idleAgent", "never", BTreeMap::new())
            .await
            .unwrap();
        assert!(!outcome.ran);
    }

    #[tokio::test]
    async fn test_scheduler_runs_triggered_plan() {
        let registry = registry();
        let collector = EventCollector::new(&registry.events);
        registry.create_agent("greeterAgent").await.unwrap();
        eval(
            &registry,
            r#"
            setAttribute(getChild(greeterAgent, 'plans'), 'greet', plan(
                'greet',
                func() { not(hasAttribute(self, 'greeted')) },
                null,
                [func() { setAttribute(self, 'greeted', true) }]
            ))
            "#,
        )
        .await;
        registry.publish_agent("greeterAgent").await.unwrap();

        let greeted = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let done = eval(&registry, "hasAttribute(greeterAgent, 'greeted')").await;
                if done.is_truthy() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(greeted.is_ok());
        registry.stop_all().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let events = collector.get_events().await;
        assert!(events.contains(&Event::PlanFinished {
            agent: "greeterAgent".to_string(),
            plan: "greet".to_string(),
        }));
        assert!(events.contains(&Event::AgentStopped {
            agent: "greeterAgent".to_string(),
        }));
    }
}
