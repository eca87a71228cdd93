use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, OwnedMutexGuard, RwLock},
    time::Instant,
};

use crate::tree::{Arena, Space};

use super::run::ExecId;

/// One user's isolated, time-bounded workspace: a session-local registry,
/// lifecycle programs, and the runs currently using it.
pub struct ExecutionContext {
    token: String,
    user_id: String,
    created_at: DateTime<Utc>,
    last_active: Mutex<Instant>,
    timeout: Duration,
    on_start: RwLock<Option<String>>,
    on_exit: RwLock<Option<String>>,
    registry: Arc<RwLock<Arena>>,
    run_lock: Arc<Mutex<()>>,
    runs: DashSet<ExecId>,
}

/// Read-only summary of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(with = "crate::config::duration_ms")]
    pub idle: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub timeout: Duration,
    pub bindings: Vec<String>,
    pub active_runs: usize,
}

impl ExecutionContext {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            last_active: Mutex::new(Instant::now()),
            timeout,
            on_start: RwLock::new(None),
            on_exit: RwLock::new(None),
            registry: Arc::new(RwLock::new(Arena::new(Space::Local))),
            run_lock: Arc::new(Mutex::new(())),
            runs: DashSet::new(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn registry(&self) -> &Arc<RwLock<Arena>> {
        &self.registry
    }

    pub async fn touch(&self) {
        *self.last_active.lock().await = Instant::now();
    }

    pub async fn idle(&self) -> Duration {
        self.last_active.lock().await.elapsed()
    }

    pub async fn is_expired(&self) -> bool {
        self.idle().await > self.timeout
    }

    pub async fn on_start(&self) -> Option<String> {
        self.on_start.read().await.clone()
    }

    pub async fn set_on_start(&self, source: Option<String>) {
        *self.on_start.write().await = source;
    }

    pub async fn on_exit(&self) -> Option<String> {
        self.on_exit.read().await.clone()
    }

    pub async fn set_on_exit(&self, source: Option<String>) {
        *self.on_exit.write().await = source;
    }

    /// Held for the whole of a run so only one run mutates the context.
    pub async fn lock_for_run(&self) -> OwnedMutexGuard<()> {
        self.run_lock.clone().lock_owned().await
    }

    pub fn attach_run(&self, id: ExecId) {
        self.runs.insert(id);
    }

    pub fn detach_run(&self, id: &ExecId) {
        self.runs.remove(id);
    }

    pub fn runs(&self) -> Vec<ExecId> {
        let mut runs: Vec<ExecId> = self.runs.iter().map(|id| *id).collect();
        runs.sort();
        runs
    }

    pub async fn info(&self) -> SessionInfo {
        let bindings = self.registry.read().await.bindings().keys().cloned().collect();
        SessionInfo {
            token: self.token.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            idle: self.idle().await,
            timeout: self.timeout,
            bindings,
            active_runs: self.runs.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn test_idle_tracking() {
        let context = ExecutionContext::new("tok", "alice", Duration::from_secs(60));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(context.is_expired().await);

        context.touch().await;
        assert!(!context.is_expired().await);
        assert_eq!(context.idle().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_run_bookkeeping() {
        let context = ExecutionContext::new("tok", "alice", Duration::from_secs(60));
        let id = ExecId::new();
        context.attach_run(id);
        assert_eq!(context.runs(), vec![id]);
        assert_eq!(context.info().await.active_runs, 1);
        context.detach_run(&id);
        assert!(context.runs().is_empty());
    }
}
