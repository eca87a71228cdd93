use std::{fmt, str::FromStr, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    ast::ProgramId,
    debugger::{DebugController, RunState},
    value::Value,
    ChariotError, ChariotResult, ErrorInfo,
};

use super::logs::{LogRecord, LogSink};

/// Identifier of one asynchronous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecId(Uuid);

impl ExecId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ExecId {
    type Err = ChariotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ChariotError::invalid_argument(format!("invalid exec id '{}': {}", s, e)))
    }
}

/// Options for [`SessionManager::execute_async`](super::SessionManager::execute_async).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    /// Stable program name; breakpoints are keyed by it. Defaults to a hash
    /// of the source.
    pub program: Option<String>,
    /// Start paused at statement 0 even without breakpoints.
    pub stop_on_entry: bool,
}

impl ExecOptions {
    pub fn named(program: impl Into<String>) -> Self {
        Self {
            program: Some(program.into()),
            ..Default::default()
        }
    }

    pub fn stop_on_entry(mut self, stop: bool) -> Self {
        self.stop_on_entry = stop;
        self
    }
}

/// Final outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub value: Value,
    pub error: Option<ErrorInfo>,
    pub logs: Vec<LogRecord>,
}

impl ExecResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Bookkeeping for one run: its controller, its log sink and, once the
/// interpreter returns, its value.
pub struct Run {
    pub id: ExecId,
    pub token: String,
    pub program: ProgramId,
    pub started_at: DateTime<Utc>,
    controller: Arc<DebugController>,
    logs: Arc<LogSink>,
    outcome: RwLock<Option<ChariotResult<Value>>>,
}

impl Run {
    pub fn new(
        id: ExecId,
        token: impl Into<String>,
        program: ProgramId,
        controller: Arc<DebugController>,
    ) -> Self {
        Self {
            id,
            token: token.into(),
            program,
            started_at: Utc::now(),
            controller,
            logs: Arc::new(LogSink::new()),
            outcome: RwLock::new(None),
        }
    }

    pub fn controller(&self) -> &Arc<DebugController> {
        &self.controller
    }

    pub fn logs(&self) -> &Arc<LogSink> {
        &self.logs
    }

    pub fn state(&self) -> RunState {
        self.controller.state()
    }

    /// Records the interpreter's result, stops the controller and closes the
    /// log stream, in that order.
    pub async fn complete(&self, result: ChariotResult<Value>) -> RunState {
        let mut outcome = self.outcome.write().await;
        let state = self.controller.finish(&result).await;
        *outcome = Some(result);
        drop(outcome);
        self.logs.close();
        state
    }

    /// `None` while the run is running or paused.
    pub async fn result(&self) -> Option<ExecResult> {
        if !self.state().is_stopped() {
            return None;
        }
        Some(self.collect().await)
    }

    /// Waits for the run to stop and returns its result.
    pub async fn wait(&self) -> ExecResult {
        self.controller.wait_stopped().await;
        self.collect().await
    }

    async fn collect(&self) -> ExecResult {
        // the controller keeps the failure that actually stopped the run,
        // which may be an expiry the interpreter never saw
        let error = self.controller.failure().await;
        let value = match (&error, &*self.outcome.read().await) {
            (None, Some(Ok(value))) => value.clone(),
            _ => Value::Null,
        };
        ExecResult {
            value,
            error,
            logs: self.logs.records().await,
        }
    }
}
