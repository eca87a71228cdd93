use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::{
    event_bus::{Event, EventBus},
    value::Value,
    ChariotError, ChariotResult, ErrorInfo,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
pub enum StopReason {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    Running,
    Paused,
    Stopped(StopReason),
}

impl RunState {
    pub fn is_stopped(&self) -> bool {
        matches!(self, RunState::Stopped(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Running => write!(f, "Running"),
            RunState::Paused => write!(f, "Paused"),
            RunState::Stopped(reason) => write!(f, "Stopped({})", reason),
        }
    }
}

/// Where a run is: top-level statement index, its source position and the
/// function call depth at the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub statement: usize,
    pub line: usize,
    pub column: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugState {
    pub run_state: RunState,
    pub position: Option<Position>,
}

/// Scope label (`frame[n]`, `session`, `global`) to variable values.
pub type Variables = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepMode {
    Free,
    Over,
    Into,
    Out { target: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    None,
    /// Paused on entry, first gate not reached yet.
    Pending,
    /// Resumed before the first gate; that gate must not pause again.
    Released,
}

struct Inner {
    mode: StepMode,
    entry: Entry,
    position: Option<Position>,
    variables: Variables,
    failure: Option<ErrorInfo>,
    expired: Option<String>,
}

/// Per-run pause/step/continue state machine. The interpreter blocks in
/// [`DebugController::gate`] while the run is paused; commands arrive from
/// other tasks.
pub struct DebugController {
    exec: String,
    state: watch::Sender<RunState>,
    inner: Mutex<Inner>,
    pause_requested: AtomicBool,
    cancel_requested: AtomicBool,
    stepping: AtomicBool,
    breakpoints: bool,
    events: Option<Arc<EventBus>>,
}

impl fmt::Debug for DebugController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugController")
            .field("exec", &self.exec)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl DebugController {
    pub fn new(exec: impl Into<String>, stop_on_entry: bool) -> Self {
        let initial = if stop_on_entry {
            RunState::Paused
        } else {
            RunState::Running
        };
        let (state, _) = watch::channel(initial);
        Self {
            exec: exec.into(),
            state,
            inner: Mutex::new(Inner {
                mode: StepMode::Free,
                entry: if stop_on_entry {
                    Entry::Pending
                } else {
                    Entry::None
                },
                position: stop_on_entry.then(Position::default),
                variables: Variables::new(),
                failure: None,
                expired: None,
            }),
            pause_requested: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            stepping: AtomicBool::new(false),
            breakpoints: true,
            events: None,
        }
    }

    /// A run that ignores the breakpoint table. Commands still apply.
    pub fn without_breakpoints(mut self) -> Self {
        self.breakpoints = false;
        self
    }

    pub fn honours_breakpoints(&self) -> bool {
        self.breakpoints
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn exec(&self) -> &str {
        &self.exec
    }

    async fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            if let Err(e) = events.publish(event).await {
                tracing::trace!(exec_id = %self.exec, "debug event not delivered: {}", e);
            }
        }
    }

    // --- interpreter side ------------------------------------------------

    /// True when gates inside nested blocks must be reported too.
    pub fn wants_fine_gates(&self) -> bool {
        self.stepping.load(Ordering::SeqCst)
            || self.pause_requested.load(Ordering::SeqCst)
            || self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Statement boundary. Records the position and variables, then blocks
    /// while the run is paused. Errors end the run.
    pub async fn gate(
        &self,
        position: Position,
        variables: Variables,
        breakpoint: bool,
    ) -> ChariotResult<()> {
        let mut inner = self.inner.lock().await;
        self.check_halted(&inner)?;
        inner.position = Some(position);
        inner.variables = variables;

        let pause = match inner.entry {
            Entry::Pending => {
                inner.entry = Entry::None;
                true
            }
            Entry::Released => {
                inner.entry = Entry::None;
                self.pause_requested.swap(false, Ordering::SeqCst)
            }
            Entry::None => {
                let requested = self.pause_requested.swap(false, Ordering::SeqCst);
                let stepped = match inner.mode {
                    StepMode::Free => false,
                    StepMode::Over => position.depth == 0,
                    StepMode::Into => true,
                    StepMode::Out { target } => position.depth <= target,
                };
                requested || stepped || breakpoint
            }
        };
        if !pause {
            return Ok(());
        }

        inner.mode = StepMode::Free;
        self.stepping.store(false, Ordering::SeqCst);
        self.state.send_replace(RunState::Paused);
        drop(inner);

        tracing::debug!(exec_id = %self.exec, statement = position.statement, depth = position.depth, "run paused");
        self.emit(Event::RunPaused {
            exec_id: self.exec.clone(),
            position,
        })
        .await;

        let mut rx = self.state.subscribe();
        rx.wait_for(|state| *state != RunState::Paused)
            .await
            .map_err(|_| ChariotError::internal("debug controller dropped while paused"))?;

        let inner = self.inner.lock().await;
        self.check_halted(&inner)
    }

    /// Non-blocking halt check for loops that run no statements.
    pub async fn checkpoint(&self) -> ChariotResult<()> {
        if !self.cancel_requested.load(Ordering::SeqCst) {
            return Ok(());
        }
        let inner = self.inner.lock().await;
        self.check_halted(&inner)
    }

    fn check_halted(&self, inner: &Inner) -> ChariotResult<()> {
        if let Some(token) = &inner.expired {
            return Err(ChariotError::SessionExpired(token.clone()));
        }
        if self.cancel_requested.load(Ordering::SeqCst) {
            return Err(ChariotError::Cancelled);
        }
        Ok(())
    }

    /// Records the outcome. A run already stopped (expired) keeps its state.
    pub async fn finish(&self, result: &ChariotResult<Value>) -> RunState {
        let mut inner = self.inner.lock().await;
        let current = *self.state.borrow();
        if current.is_stopped() {
            return current;
        }
        let state = match result {
            Ok(_) => RunState::Stopped(StopReason::Completed),
            Err(e) => {
                inner.failure = Some(ErrorInfo::from(e));
                RunState::Stopped(StopReason::Failed)
            }
        };
        self.stepping.store(false, Ordering::SeqCst);
        self.state.send_replace(state);
        drop(inner);

        tracing::debug!(exec_id = %self.exec, %state, "run stopped");
        self.emit(Event::RunStopped {
            exec_id: self.exec.clone(),
            state,
        })
        .await;
        state
    }

    // --- commands ---------------------------------------------------------

    fn not_paused(&self, command: &str) -> ChariotError {
        ChariotError::DebugProtocol(format!(
            "cannot {} run {}: it is {}",
            command,
            self.exec,
            *self.state.borrow()
        ))
    }

    async fn resume(&self, command: &str, mode: impl FnOnce(&Inner) -> StepMode) -> ChariotResult<()> {
        let mut inner = self.inner.lock().await;
        if *self.state.borrow() != RunState::Paused {
            return Err(self.not_paused(command));
        }
        let mode = mode(&inner);
        inner.mode = mode;
        if inner.entry == Entry::Pending {
            inner.entry = Entry::Released;
        }
        self.stepping.store(
            matches!(mode, StepMode::Into | StepMode::Out { .. }),
            Ordering::SeqCst,
        );
        self.state.send_replace(RunState::Running);
        drop(inner);

        tracing::debug!(exec_id = %self.exec, command, "run resumed");
        self.emit(Event::RunResumed {
            exec_id: self.exec.clone(),
        })
        .await;
        Ok(())
    }

    /// Runs to the next top-level statement.
    pub async fn step(&self) -> ChariotResult<()> {
        self.resume("step", |_| StepMode::Over).await
    }

    pub async fn step_into(&self) -> ChariotResult<()> {
        self.resume("step into", |_| StepMode::Into).await
    }

    pub async fn step_out(&self) -> ChariotResult<()> {
        self.resume("step out", |inner| StepMode::Out {
            target: inner
                .position
                .map_or(0, |p| p.depth.saturating_sub(1)),
        })
        .await
    }

    pub async fn continue_run(&self) -> ChariotResult<()> {
        self.resume("continue", |_| StepMode::Free).await
    }

    /// Pauses at the next statement boundary. No-op when already paused.
    pub async fn pause(&self) -> ChariotResult<()> {
        let _inner = self.inner.lock().await;
        let state = *self.state.borrow();
        match state {
            RunState::Paused => Ok(()),
            RunState::Stopped(_) => Err(self.not_paused("pause")),
            RunState::Running => {
                self.pause_requested.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    /// Aborts the run at its next statement boundary.
    pub async fn cancel(&self) -> ChariotResult<()> {
        let _inner = self.inner.lock().await;
        let state = *self.state.borrow();
        if state.is_stopped() {
            return Err(ChariotError::DebugProtocol(format!(
                "cannot cancel run {}: it is {}",
                self.exec, state
            )));
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        if state == RunState::Paused {
            self.state.send_replace(RunState::Running);
        }
        tracing::debug!(exec_id = %self.exec, "cancel requested");
        Ok(())
    }

    /// Stops the run because its session went away. A paused run wakes up and
    /// terminates; a running one terminates at its next boundary.
    pub async fn expire(&self, token: &str) {
        let mut inner = self.inner.lock().await;
        if self.state.borrow().is_stopped() {
            return;
        }
        let error = ChariotError::SessionExpired(token.to_string());
        inner.failure = Some(ErrorInfo::from(&error));
        inner.expired = Some(token.to_string());
        self.cancel_requested.store(true, Ordering::SeqCst);
        let state = RunState::Stopped(StopReason::Failed);
        self.state.send_replace(state);
        drop(inner);

        tracing::info!(exec_id = %self.exec, session = %token, "run expired with its session");
        self.emit(Event::RunStopped {
            exec_id: self.exec.clone(),
            state,
        })
        .await;
    }

    // --- queries ----------------------------------------------------------

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub async fn debug_state(&self) -> DebugState {
        let inner = self.inner.lock().await;
        DebugState {
            run_state: *self.state.borrow(),
            position: inner.position,
        }
    }

    pub async fn variables(&self) -> Variables {
        self.inner.lock().await.variables.clone()
    }

    pub async fn failure(&self) -> Option<ErrorInfo> {
        self.inner.lock().await.failure.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub async fn wait_for_state(&self, target: impl Fn(&RunState) -> bool) -> RunState {
        let mut rx = self.state.subscribe();
        let result = match rx.wait_for(|state| target(state)).await {
            Ok(state) => *state,
            Err(_) => *self.state.borrow(),
        };
        result
    }

    pub async fn wait_stopped(&self) -> RunState {
        self.wait_for_state(RunState::is_stopped).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn at(statement: usize, depth: usize) -> Position {
        Position {
            statement,
            line: statement + 1,
            column: 1,
            depth,
        }
    }

    #[tokio::test]
    async fn test_commands_require_paused() {
        let controller = DebugController::new("e1", false);
        for result in [
            controller.step().await,
            controller.step_into().await,
            controller.step_out().await,
            controller.continue_run().await,
        ] {
            assert!(matches!(result, Err(ChariotError::DebugProtocol(_))));
        }
        assert_eq!(controller.state(), RunState::Running);

        controller.finish(&Ok(Value::Null)).await;
        assert!(matches!(
            controller.pause().await,
            Err(ChariotError::DebugProtocol(_))
        ));
        assert!(matches!(
            controller.cancel().await,
            Err(ChariotError::DebugProtocol(_))
        ));
        assert_eq!(
            controller.state(),
            RunState::Stopped(StopReason::Completed)
        );
    }

    #[tokio::test]
    async fn test_entry_pause_then_continue() {
        let controller = Arc::new(DebugController::new("e2", true));
        assert_eq!(controller.state(), RunState::Paused);
        // pause while paused is a no-op
        controller.pause().await.unwrap();

        let gate = tokio::spawn({
            let controller = controller.clone();
            async move { controller.gate(at(0, 0), Variables::new(), false).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!gate.is_finished());

        controller.continue_run().await.unwrap();
        gate.await.unwrap().unwrap();
        assert_eq!(controller.state(), RunState::Running);
        // no further pause without breakpoints
        controller
            .gate(at(1, 0), Variables::new(), false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_continue_before_first_gate_does_not_pause_again() {
        let controller = DebugController::new("e3", true);
        controller.continue_run().await.unwrap();
        controller
            .gate(at(0, 0), Variables::new(), true)
            .await
            .unwrap();
        assert_eq!(controller.state(), RunState::Running);
    }

    #[tokio::test]
    async fn test_cancel_wakes_paused_gate() {
        let controller = Arc::new(DebugController::new("e4", true));
        let gate = tokio::spawn({
            let controller = controller.clone();
            async move { controller.gate(at(0, 0), Variables::new(), false).await }
        });
        tokio::task::yield_now().await;
        controller.cancel().await.unwrap();
        let result = gate.await.unwrap();
        assert!(matches!(result, Err(ChariotError::Cancelled)));

        let state = controller.finish(&result.map(|_| Value::Null)).await;
        assert_eq!(state, RunState::Stopped(StopReason::Failed));
        assert_eq!(
            controller.failure().await.map(|f| f.kind),
            Some(crate::ErrorKind::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_expire_is_sticky() {
        let controller = Arc::new(DebugController::new("e5", true));
        let gate = tokio::spawn({
            let controller = controller.clone();
            async move { controller.gate(at(0, 0), Variables::new(), false).await }
        });
        tokio::task::yield_now().await;
        controller.expire("tok").await;

        let result = gate.await.unwrap();
        assert!(matches!(result, Err(ChariotError::SessionExpired(_))));
        let state = controller.finish(&result.map(|_| Value::Null)).await;
        assert_eq!(state, RunState::Stopped(StopReason::Failed));
        assert_eq!(
            controller.failure().await.map(|f| f.kind),
            Some(crate::ErrorKind::SessionExpired)
        );
    }

    #[tokio::test]
    async fn test_step_out_targets_shallower_gate() {
        let controller = Arc::new(DebugController::new("e6", false));
        controller.pause().await.unwrap();
        let paused = tokio::spawn({
            let controller = controller.clone();
            async move { controller.gate(at(1, 2), Variables::new(), false).await }
        });
        controller
            .wait_for_state(|s| *s == RunState::Paused)
            .await;
        controller.step_out().await.unwrap();
        paused.await.unwrap().unwrap();

        // same depth: keeps running
        controller
            .gate(at(1, 2), Variables::new(), false)
            .await
            .unwrap();
        assert_eq!(controller.state(), RunState::Running);
        assert!(controller.wants_fine_gates());

        let paused = tokio::spawn({
            let controller = controller.clone();
            async move { controller.gate(at(1, 1), Variables::new(), false).await }
        });
        controller
            .wait_for_state(|s| *s == RunState::Paused)
            .await;
        assert_eq!(
            controller.debug_state().await.position.map(|p| p.depth),
            Some(1)
        );
        controller.continue_run().await.unwrap();
        paused.await.unwrap().unwrap();
        assert!(!controller.wants_fine_gates());
    }
}
