use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::Stream;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};

use crate::{
    ast::{Program, ProgramId},
    config::SessionConfig,
    debugger::{Breakpoint, BreakpointTable, DebugController, DebugState, Variables},
    eval::{Interpreter, RunEnv},
    event_bus::{Event, EventBus},
    value::Value,
    ChariotError, ChariotResult, ErrorInfo,
};

use super::{
    context::{ExecutionContext, SessionInfo},
    logs::{LogRecord, LogSink},
    run::{ExecId, ExecOptions, ExecResult, Run},
};

/// Registry of execution contexts keyed by session token, plus every run
/// started in them.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<DashMap<String, Arc<ExecutionContext>>>,
    runs: Arc<DashMap<ExecId, Arc<Run>>>,
    // create and evict serialize here; lookups never take it
    structure: Arc<Mutex<()>>,
    interpreter: Arc<Interpreter>,
    events: Arc<EventBus>,
    config: SessionConfig,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SessionManager {
    pub fn new(interpreter: Arc<Interpreter>, events: Arc<EventBus>, config: SessionConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            sessions: Arc::new(DashMap::new()),
            runs: Arc::new(DashMap::new()),
            structure: Arc::new(Mutex::new(())),
            interpreter,
            events,
            config,
            sweeper: Arc::new(Mutex::new(None)),
            shutdown_tx,
        }
    }

    pub fn interpreter(&self) -> &Arc<Interpreter> {
        &self.interpreter
    }

    pub fn breakpoints(&self) -> &Arc<BreakpointTable> {
        self.interpreter.breakpoints()
    }

    // --- sessions ---------------------------------------------------------

    pub async fn new_session(
        &self,
        user_id: &str,
        token: &str,
        timeout: Option<Duration>,
    ) -> ChariotResult<Arc<ExecutionContext>> {
        let _structure = self.structure.lock().await;
        if self.sessions.contains_key(token) {
            return Err(ChariotError::Session(format!(
                "session '{}' already exists",
                token
            )));
        }
        let context = Arc::new(ExecutionContext::new(
            token,
            user_id,
            timeout.unwrap_or(self.config.timeout),
        ));
        self.sessions.insert(token.to_string(), context.clone());
        tracing::info!(session = %token, user = %user_id, "session created");
        self.events
            .notify(Event::SessionCreated {
                token: token.to_string(),
                user_id: user_id.to_string(),
            })
            .await;
        Ok(context)
    }

    /// Looks the session up and marks it active.
    pub async fn get_session(&self, token: &str) -> ChariotResult<Arc<ExecutionContext>> {
        let context = self
            .sessions
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ChariotError::Session(format!("unknown session '{}'", token)))?;
        context.touch().await;
        Ok(context)
    }

    /// Ends a session the way the sweeper would: `onExit`, then its runs.
    pub async fn end_session(&self, token: &str) -> ChariotResult<()> {
        let context = self.get_session(token).await?;
        self.evict(&context, false).await;
        Ok(())
    }

    pub async fn set_on_start(&self, token: &str, source: Option<String>) -> ChariotResult<()> {
        self.get_session(token).await?.set_on_start(source).await;
        Ok(())
    }

    pub async fn set_on_exit(&self, token: &str, source: Option<String>) -> ChariotResult<()> {
        self.get_session(token).await?.set_on_exit(source).await;
        Ok(())
    }

    /// Runs the session's `onStart` program. A session without one yields `Null`.
    pub async fn run_session(&self, token: &str) -> ChariotResult<ExecResult> {
        let context = self.get_session(token).await?;
        match context.on_start().await {
            Some(source) => self.execute_program(&source, token, Some("onStart")).await,
            None => Ok(ExecResult {
                value: Value::Null,
                error: None,
                logs: Vec::new(),
            }),
        }
    }

    pub fn active_sessions(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        tokens.sort();
        tokens
    }

    pub async fn session_info(&self, token: &str) -> ChariotResult<SessionInfo> {
        Ok(self.get_session(token).await?.info().await)
    }

    // --- execution --------------------------------------------------------

    /// Runs `source` in the session and waits for it. Breakpoints do not
    /// apply; program failures are reported in the result, not as `Err`.
    pub async fn execute(&self, source: &str, token: &str) -> ChariotResult<ExecResult> {
        self.execute_program(source, token, None).await
    }

    async fn execute_program(
        &self,
        source: &str,
        token: &str,
        name: Option<&str>,
    ) -> ChariotResult<ExecResult> {
        self.get_session(token).await?;
        let program = match self.interpreter.parse(source, name) {
            Ok(program) => program,
            Err(e) => return Ok(failed_before_start(&e)),
        };
        let run = self.launch(token, program, false, false).await?;
        let result = run.wait().await;
        // nobody can address a synchronous run afterwards
        self.runs.remove(&run.id);
        Ok(result)
    }

    /// Starts a debuggable run and returns immediately. The run begins paused
    /// at statement 0 when asked to or when its program has an enabled
    /// breakpoint.
    pub async fn execute_async(
        &self,
        source: &str,
        token: &str,
        options: ExecOptions,
    ) -> ChariotResult<ExecId> {
        self.get_session(token).await?;
        let program = self.interpreter.parse(source, options.program.as_deref())?;
        let stop_on_entry =
            options.stop_on_entry || self.breakpoints().has_enabled(&program.id);
        let run = self.launch(token, program, stop_on_entry, true).await?;
        Ok(run.id)
    }

    async fn launch(
        &self,
        token: &str,
        program: Arc<Program>,
        stop_on_entry: bool,
        breakpoints: bool,
    ) -> ChariotResult<Arc<Run>> {
        let context = self.get_session(token).await?;
        let id = ExecId::new();
        let mut controller =
            DebugController::new(id.to_string(), stop_on_entry).with_events(self.events.clone());
        if !breakpoints {
            controller = controller.without_breakpoints();
        }
        let run = Arc::new(Run::new(
            id,
            token,
            program.id.clone(),
            Arc::new(controller),
        ));
        self.runs.insert(id, run.clone());
        context.attach_run(id);

        tracing::debug!(exec_id = %id, session = %token, program = %program.id, stop_on_entry, "run started");
        self.events
            .notify(Event::RunStarted {
                exec_id: id.to_string(),
                session: Some(token.to_string()),
            })
            .await;

        let interpreter = self.interpreter.clone();
        let task_run = run.clone();
        tokio::spawn(async move {
            let _exclusive = context.lock_for_run().await;
            let env = RunEnv::new(
                interpreter.store().handle(Some(context.registry().clone())),
                program.id.clone(),
            )
            .with_session(context.token())
            .with_controller(task_run.controller().clone())
            .with_logs(task_run.logs().clone());

            let result = interpreter.run(&program, &env).await;
            let state = task_run.complete(result).await;
            context.detach_run(&task_run.id);
            context.touch().await;
            tracing::debug!(exec_id = %task_run.id, %state, "run finished");
        });
        Ok(run)
    }

    async fn run(&self, id: &ExecId) -> ChariotResult<Arc<Run>> {
        let run = self
            .runs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ChariotError::Session(format!("unknown run '{}'", id)))?;
        let context = self.sessions.get(&run.token).map(|e| e.value().clone());
        if let Some(context) = context {
            context.touch().await;
        }
        Ok(run)
    }

    /// `None` while the run is running or paused.
    pub async fn get_result(&self, id: &ExecId) -> ChariotResult<Option<ExecResult>> {
        Ok(self.run(id).await?.result().await)
    }

    pub async fn wait(&self, id: &ExecId) -> ChariotResult<ExecResult> {
        let run = self.run(id).await?;
        Ok(run.wait().await)
    }

    /// Ordered log records of the run: history first, then live records
    /// until the run stops.
    pub async fn stream_logs(
        &self,
        id: &ExecId,
    ) -> ChariotResult<impl Stream<Item = LogRecord> + Send + 'static> {
        let sink: Arc<LogSink> = self.run(id).await?.logs().clone();
        Ok(sink.stream())
    }

    /// Drops a stopped run's bookkeeping.
    pub async fn discard_run(&self, id: &ExecId) -> ChariotResult<()> {
        let run = self.run(id).await?;
        if !run.state().is_stopped() {
            return Err(ChariotError::DebugProtocol(format!(
                "run {} is {}; cancel it before discarding",
                id,
                run.state()
            )));
        }
        self.runs.remove(id);
        if let Some(context) = self.sessions.get(&run.token) {
            context.detach_run(id);
        }
        Ok(())
    }

    // --- debugging --------------------------------------------------------

    /// Breakpoints are keyed by program, so they apply to every later run of
    /// it and to runs of it that are already paused.
    pub fn set_breakpoint(
        &self,
        program: &ProgramId,
        statement: usize,
        condition: Option<String>,
    ) -> Breakpoint {
        self.breakpoints().set(program, statement, condition)
    }

    pub fn remove_breakpoint(&self, program: &ProgramId, statement: usize) -> bool {
        self.breakpoints().remove(program, statement)
    }

    pub fn enable_breakpoint(
        &self,
        program: &ProgramId,
        statement: usize,
        enabled: bool,
    ) -> ChariotResult<()> {
        self.breakpoints().enable(program, statement, enabled)
    }

    pub fn list_breakpoints(&self, program: Option<&ProgramId>) -> Vec<Breakpoint> {
        self.breakpoints().list(program)
    }

    /// The program a run executes.
    pub async fn run_program(&self, id: &ExecId) -> ChariotResult<ProgramId> {
        Ok(self.run(id).await?.program.clone())
    }

    pub async fn step(&self, id: &ExecId) -> ChariotResult<()> {
        self.run(id).await?.controller().step().await
    }

    pub async fn step_into(&self, id: &ExecId) -> ChariotResult<()> {
        self.run(id).await?.controller().step_into().await
    }

    pub async fn step_out(&self, id: &ExecId) -> ChariotResult<()> {
        self.run(id).await?.controller().step_out().await
    }

    pub async fn continue_run(&self, id: &ExecId) -> ChariotResult<()> {
        self.run(id).await?.controller().continue_run().await
    }

    pub async fn pause(&self, id: &ExecId) -> ChariotResult<()> {
        self.run(id).await?.controller().pause().await
    }

    pub async fn cancel(&self, id: &ExecId) -> ChariotResult<()> {
        self.run(id).await?.controller().cancel().await
    }

    pub async fn debug_state(&self, id: &ExecId) -> ChariotResult<DebugState> {
        Ok(self.run(id).await?.controller().debug_state().await)
    }

    pub async fn debug_variables(&self, id: &ExecId) -> ChariotResult<Variables> {
        Ok(self.run(id).await?.controller().variables().await)
    }

    // --- expiry -----------------------------------------------------------

    /// Evicts every context idle for longer than its timeout. Returns the
    /// evicted tokens.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let candidates: Vec<Arc<ExecutionContext>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        let mut evicted = Vec::new();
        for context in candidates {
            if context.is_expired().await && self.evict(&context, true).await {
                evicted.push(context.token().to_string());
            }
        }
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "expired sessions evicted");
        }
        evicted
    }

    /// Unregisters the context, then runs its `onExit` and expires its runs.
    /// Only the unregistering happens under the structure lock. Returns
    /// `false` when another caller got there first or, with `only_if_expired`,
    /// when the session was touched in the meantime.
    async fn evict(&self, context: &Arc<ExecutionContext>, only_if_expired: bool) -> bool {
        let token = context.token();
        {
            let _structure = self.structure.lock().await;
            if only_if_expired && !context.is_expired().await {
                return false;
            }
            let removed = self
                .sessions
                .remove_if(token, |_, current| Arc::ptr_eq(current, context));
            if removed.is_none() {
                return false;
            }
        }

        if let Some(source) = context.on_exit().await {
            self.run_on_exit(context, &source).await;
        }

        for id in context.runs() {
            if let Some((_, run)) = self.runs.remove(&id) {
                run.controller().expire(token).await;
                run.logs().close();
            }
            context.detach_run(&id);
        }

        tracing::info!(session = %token, user = %context.user_id(), "session evicted");
        self.events
            .notify(Event::SessionEvicted {
                token: token.to_string(),
            })
            .await;
        true
    }

    /// Best effort: failures and overruns are logged, never propagated.
    /// Runs without the run lock since a paused run may hold it.
    async fn run_on_exit(&self, context: &ExecutionContext, source: &str) {
        let token = context.token();
        let logs = Arc::new(LogSink::new());
        let env = RunEnv::new(
            self.interpreter
                .store()
                .handle(Some(context.registry().clone())),
            ProgramId::named("onExit"),
        )
        .with_session(token)
        .with_logs(logs.clone());

        let run = self.interpreter.eval_source(source, Some("onExit"), &env);
        match tokio::time::timeout(self.config.on_exit_timeout, run).await {
            Ok(Ok(_)) => tracing::debug!(session = %token, "onExit completed"),
            Ok(Err(e)) => tracing::warn!(session = %token, "onExit failed: {}", e),
            Err(_) => tracing::warn!(
                session = %token,
                timeout_ms = self.config.on_exit_timeout.as_millis() as u64,
                "onExit timed out"
            ),
        }
        logs.close();
    }

    /// Spawns the periodic sweep. Calling it twice keeps the first sweeper.
    pub async fn start_sweeper(&self) {
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_some() {
            return;
        }
        let manager = self.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = self.config.sweep_interval;
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.sweep_expired().await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("session sweeper stopped");
                        break;
                    }
                }
            }
        }));
    }

    /// Stops the sweeper. Sessions stay in place.
    pub async fn shutdown(&self) {
        let handle = self.sweeper.lock().await.take();
        if let Some(handle) = handle {
            if self.shutdown_tx.send(()).is_err() {
                handle.abort();
            } else if let Err(e) = handle.await {
                tracing::warn!("session sweeper ended abnormally: {}", e);
            }
        }
    }
}

fn failed_before_start(error: &ChariotError) -> ExecResult {
    ExecResult {
        value: Value::Null,
        error: Some(ErrorInfo::from(error)),
        logs: Vec::new(),
    }
}
