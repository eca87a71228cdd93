#![allow(dead_code)]

use std::time::Duration;

use chariot::{
    config::SystemConfig,
    debugger::DebugState,
    session::{ExecId, SessionManager},
    System,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

pub fn system() -> System {
    System::new(SystemConfig::default())
}

pub async fn open_session(system: &System, token: &str) {
    system
        .sessions()
        .new_session("tester", token, None)
        .await
        .unwrap();
}

/// Polls the run until `done` holds. Panics after five seconds.
pub async fn wait_until(
    sessions: &SessionManager,
    id: &ExecId,
    done: impl Fn(&DebugState) -> bool,
) -> DebugState {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = sessions.debug_state(id).await.unwrap();
            if done(&state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("run did not reach the expected state")
}

pub fn paused_at(statement: usize) -> impl Fn(&DebugState) -> bool {
    move |state| {
        state.run_state == chariot::debugger::RunState::Paused
            && state.position.map(|p| p.statement) == Some(statement)
    }
}
