use std::{path::Path, sync::Arc};

use crate::{
    agent_registry::AgentRegistry,
    ast::ProgramId,
    config::SystemConfig,
    debugger::BreakpointTable,
    eval::{HostBinding, HostBindings, Interpreter, RunEnv},
    event_bus::EventBus,
    session::SessionManager,
    tree::{serializer, RegistrySnapshot, TreeStore},
    value::Value,
    ChariotResult,
};

/// The whole runtime: one global store, one interpreter, and the session
/// and agent registries built on top of them.
pub struct System {
    config: SystemConfig,
    interpreter: Arc<Interpreter>,
    event_bus: Arc<EventBus>,
    sessions: SessionManager,
    agents: AgentRegistry,
}

impl System {
    pub fn new(config: SystemConfig) -> Self {
        let store = TreeStore::new();
        let bindings = Arc::new(HostBindings::with_defaults());
        let interpreter = Arc::new(Interpreter::new(
            store,
            bindings,
            Arc::new(BreakpointTable::new()),
            config.persistence.clone(),
        ));
        let event_bus = Arc::new(EventBus::new(config.event_capacity));
        let sessions = SessionManager::new(
            interpreter.clone(),
            event_bus.clone(),
            config.session.clone(),
        );
        let agents = AgentRegistry::new(
            interpreter.clone(),
            event_bus.clone(),
            config.agent.clone(),
        );
        Self {
            config,
            interpreter,
            event_bus,
            sessions,
            agents,
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn interpreter(&self) -> &Arc<Interpreter> {
        &self.interpreter
    }

    pub fn store(&self) -> &TreeStore {
        self.interpreter.store()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Adds a host binding next to the defaults. A binding with the same
    /// name is replaced.
    pub fn register_binding(&self, binding: Arc<dyn HostBinding>) {
        if let Some(old) = self.interpreter.bindings().register(binding) {
            tracing::debug!(binding = old.name(), "host binding replaced");
        }
    }

    /// Restores the persisted global registry, runs the bootstrap program
    /// outside any session and starts the session sweeper.
    pub async fn bootstrap(&self) -> ChariotResult<()> {
        if let Some(path) = &self.config.persistence.snapshot_path {
            if tokio::fs::try_exists(path).await? {
                let count = self.load_registry(path).await?;
                tracing::info!(path = %path.display(), roots = count, "global registry restored");
            } else {
                tracing::debug!(path = %path.display(), "no registry snapshot yet");
            }
        }

        if let Some(path) = &self.config.bootstrap_program {
            let source = tokio::fs::read_to_string(path).await?;
            self.eval_global(&source, "bootstrap").await?;
            tracing::info!(path = %path.display(), "bootstrap program ran");
        }

        self.sessions.start_sweeper().await;
        Ok(())
    }

    /// Runs a program against the global registry, outside any session.
    pub async fn eval_global(&self, source: &str, name: &str) -> ChariotResult<Value> {
        let env = RunEnv::new(self.store().handle(None), ProgramId::named(name));
        self.interpreter.eval_source(source, Some(name), &env).await
    }

    pub async fn save_registry(&self, path: impl AsRef<Path>) -> ChariotResult<()> {
        let persistence = &self.config.persistence;
        let snapshot = self
            .store()
            .snapshot_registry(persistence.function_policy)
            .await?;
        serializer::write_document(path, &snapshot, persistence.format).await
    }

    pub async fn load_registry(&self, path: impl AsRef<Path>) -> ChariotResult<usize> {
        let snapshot: RegistrySnapshot =
            serializer::read_document(path, self.config.persistence.format).await?;
        self.store().restore_registry(&snapshot).await
    }

    /// Stops agents and the sweeper, then flushes the global registry.
    pub async fn shutdown(&self) -> ChariotResult<()> {
        self.agents.stop_all().await;
        self.sessions.shutdown().await;
        if let Some(path) = &self.config.persistence.snapshot_path {
            self.save_registry(path).await?;
            tracing::info!(path = %path.display(), "global registry flushed");
        }
        Ok(())
    }
}
