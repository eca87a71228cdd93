mod common;

use chariot::{
    ast::ProgramId,
    debugger::{RunState, StopReason},
    session::{ExecOptions, LogLevel},
    ChariotError, ErrorKind, Value,
};
use common::{open_session, paused_at, system, wait_until};
use pretty_assertions::assert_eq;
use tokio_stream::StreamExt;

const FIVE_STATEMENTS: &str = r#"
setq(n, 1)
setq(n, add(n, 1))
setq(n, add(n, 1))
log(n)
n
"#;

fn stopped(state: &chariot::debugger::DebugState) -> bool {
    state.run_state.is_stopped()
}

#[tokio::test]
async fn test_breakpoint_pauses_then_continue_completes() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();
    sessions.set_breakpoint(&ProgramId::named("five"), 2, None);

    let id = sessions
        .execute_async(FIVE_STATEMENTS, "s1", ExecOptions::named("five"))
        .await
        .unwrap();

    // an enabled breakpoint makes the run start paused
    wait_until(sessions, &id, paused_at(0)).await;
    assert_eq!(sessions.get_result(&id).await.unwrap(), None);

    sessions.continue_run(&id).await.unwrap();
    wait_until(sessions, &id, paused_at(2)).await;
    let variables = sessions.debug_variables(&id).await.unwrap();
    assert_eq!(variables["session"].get("n"), Some(&Value::Number(2.0)));

    sessions.continue_run(&id).await.unwrap();
    let state = wait_until(sessions, &id, stopped).await;
    assert_eq!(state.run_state, RunState::Stopped(StopReason::Completed));

    let result = sessions.wait(&id).await.unwrap();
    assert_eq!(result.value, Value::Number(3.0));
    assert_eq!(result.logs.len(), 1);
    assert_eq!(result.logs[0].message, "3");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_commands_outside_pause_are_rejected() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();

    let id = sessions
        .execute_async(
            "setq(i, 0) while (true) { setq(i, add(i, 1)) }",
            "s1",
            ExecOptions::default(),
        )
        .await
        .unwrap();

    for result in [
        sessions.step(&id).await,
        sessions.step_into(&id).await,
        sessions.step_out(&id).await,
        sessions.continue_run(&id).await,
    ] {
        assert!(matches!(result, Err(ChariotError::DebugProtocol(_))));
    }
    assert_eq!(
        sessions.debug_state(&id).await.unwrap().run_state,
        RunState::Running
    );

    sessions.cancel(&id).await.unwrap();
    let result = sessions.wait(&id).await.unwrap();
    assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::Cancelled));

    assert!(matches!(
        sessions.step(&id).await,
        Err(ChariotError::DebugProtocol(_))
    ));
    assert!(matches!(
        sessions.cancel(&id).await,
        Err(ChariotError::DebugProtocol(_))
    ));
    assert_eq!(
        sessions.debug_state(&id).await.unwrap().run_state,
        RunState::Stopped(StopReason::Failed)
    );
}

#[tokio::test]
async fn test_conditional_and_disabled_breakpoints() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();
    let program = ProgramId::named("counting");
    let source = "setq(i, 0) setq(i, 1) setq(i, 2) setq(i, 3) i";

    sessions.set_breakpoint(&program, 1, Some("equal(i, 7)".to_string()));
    sessions.set_breakpoint(&program, 3, Some("equal(i, 2)".to_string()));

    let id = sessions
        .execute_async(source, "s1", ExecOptions::named("counting"))
        .await
        .unwrap();
    wait_until(sessions, &id, paused_at(0)).await;
    sessions.continue_run(&id).await.unwrap();
    wait_until(sessions, &id, paused_at(3)).await;
    sessions.continue_run(&id).await.unwrap();
    assert_eq!(sessions.wait(&id).await.unwrap().value, Value::Number(3.0));

    // with every breakpoint disabled the run never pauses
    assert_eq!(sessions.run_program(&id).await.unwrap(), program);
    sessions.enable_breakpoint(&program, 1, false).unwrap();
    sessions.enable_breakpoint(&program, 3, false).unwrap();
    let listed = sessions.list_breakpoints(Some(&program));
    assert_eq!(
        listed.iter().map(|b| (b.statement, b.enabled)).collect::<Vec<_>>(),
        vec![(1, false), (3, false)]
    );
    let id = sessions
        .execute_async(source, "s1", ExecOptions::named("counting"))
        .await
        .unwrap();
    let result = sessions.wait(&id).await.unwrap();
    assert_eq!(result.value, Value::Number(3.0));
    assert!(sessions.remove_breakpoint(&program, 1));
    assert!(!sessions.remove_breakpoint(&program, 1));
}

#[tokio::test]
async fn test_synchronous_execute_ignores_breakpoints() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();
    sessions.set_breakpoint(&ProgramId::from_source(FIVE_STATEMENTS), 1, None);

    let result = sessions.execute(FIVE_STATEMENTS, "s1").await.unwrap();
    assert_eq!(result.value, Value::Number(3.0));
}

#[tokio::test]
async fn test_step_into_and_out_of_a_function() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();
    let source = r#"
setq(f, func() {
    setq(a, 1)
    setq(b, 2)
    add(a, b)
})
setq(r, f())
log(r)
"#;

    let id = sessions
        .execute_async(source, "s1", ExecOptions::default().stop_on_entry(true))
        .await
        .unwrap();
    wait_until(sessions, &id, paused_at(0)).await;

    sessions.step(&id).await.unwrap();
    let state = wait_until(sessions, &id, paused_at(1)).await;
    assert_eq!(state.position.map(|p| p.depth), Some(0));

    sessions.step_into(&id).await.unwrap();
    let state = wait_until(sessions, &id, |s| {
        s.run_state == RunState::Paused && s.position.map(|p| p.depth) == Some(1)
    })
    .await;
    assert_eq!(state.position.map(|p| p.statement), Some(1));

    sessions.step_out(&id).await.unwrap();
    let state = wait_until(sessions, &id, paused_at(2)).await;
    assert_eq!(state.position.map(|p| p.depth), Some(0));
    let variables = sessions.debug_variables(&id).await.unwrap();
    assert_eq!(variables["session"].get("r"), Some(&Value::Number(3.0)));

    sessions.continue_run(&id).await.unwrap();
    assert!(sessions.wait(&id).await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pause_a_running_loop_and_cancel() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();

    let id = sessions
        .execute_async(
            "setq(i, 0) while (true) { setq(i, add(i, 1)) }",
            "s1",
            ExecOptions::default(),
        )
        .await
        .unwrap();
    sessions.pause(&id).await.unwrap();
    let state = wait_until(sessions, &id, |s| s.run_state == RunState::Paused).await;
    // the request may land before the loop starts
    assert!(state.position.map_or(false, |p| p.statement <= 1));
    // pausing twice is harmless
    sessions.pause(&id).await.unwrap();

    sessions.cancel(&id).await.unwrap();
    let result = sessions.wait(&id).await.unwrap();
    assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::Cancelled));
    assert_eq!(result.value, Value::Null);

    sessions.discard_run(&id).await.unwrap();
    assert!(matches!(
        sessions.debug_state(&id).await,
        Err(ChariotError::Session(_))
    ));
}

#[tokio::test]
async fn test_log_stream_follows_run_and_ends_when_stopped() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();

    let id = sessions
        .execute_async(
            "log('one') log('warn', 'two') log('three')",
            "s1",
            ExecOptions::default().stop_on_entry(true),
        )
        .await
        .unwrap();
    let stream = sessions.stream_logs(&id).await.unwrap();
    let collector = tokio::spawn(async move { stream.collect::<Vec<_>>().await });

    wait_until(sessions, &id, paused_at(0)).await;
    sessions.continue_run(&id).await.unwrap();

    let records = collector.await.unwrap();
    let messages: Vec<(LogLevel, String)> = records
        .into_iter()
        .map(|r| (r.level, r.message))
        .collect();
    assert_eq!(
        messages,
        vec![
            (LogLevel::Info, "one".to_string()),
            (LogLevel::Warn, "two".to_string()),
            (LogLevel::Info, "three".to_string()),
        ]
    );

    // a late reader still gets the full history
    let late: Vec<_> = sessions
        .stream_logs(&id)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(late.len(), 3);
}

#[tokio::test]
async fn test_breakpoint_added_while_paused() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();

    let id = sessions
        .execute_async(
            FIVE_STATEMENTS,
            "s1",
            ExecOptions::named("late").stop_on_entry(true),
        )
        .await
        .unwrap();
    wait_until(sessions, &id, paused_at(0)).await;
    let program = sessions.run_program(&id).await.unwrap();
    let breakpoint = sessions.set_breakpoint(&program, 4, None);
    assert_eq!(breakpoint.program, ProgramId::named("late"));

    sessions.continue_run(&id).await.unwrap();
    wait_until(sessions, &id, paused_at(4)).await;
    sessions.continue_run(&id).await.unwrap();
    assert_eq!(sessions.wait(&id).await.unwrap().value, Value::Number(3.0));
}
