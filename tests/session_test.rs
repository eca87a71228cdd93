mod common;

use std::{sync::Arc, time::Duration};

use chariot::{
    config::SystemConfig,
    eval::HostFunction,
    event_bus::Event,
    session::LogLevel,
    BoxError, ChariotError, ErrorKind, System, Value,
};
use common::{open_session, system};
use pretty_assertions::assert_eq;
use tokio_stream::StreamExt;

#[tokio::test]
async fn test_execute_returns_last_value_and_logs() {
    let system = system();
    open_session(&system, "s1").await;

    let result = system
        .sessions()
        .execute(
            r#"
            log('starting')
            setq(total, 0)
            setq(total, add(total, 5))
            log('warn', 'total is', total)
            mul(total, 2)
            "#,
            "s1",
        )
        .await
        .unwrap();

    assert_eq!(result.value, Value::Number(10.0));
    assert_eq!(result.error, None);
    let messages: Vec<(LogLevel, &str)> = result
        .logs
        .iter()
        .map(|r| (r.level, r.message.as_str()))
        .collect();
    assert_eq!(
        messages,
        vec![
            (LogLevel::Info, "starting"),
            (LogLevel::Warn, "total is 5")
        ]
    );
}

#[tokio::test]
async fn test_undefined_function_fails_the_run_after_earlier_statements() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();

    let result = sessions
        .execute("declare(seen, 'N', 1) setq(seen, 2) foo() setq(seen, 3)", "s1")
        .await
        .unwrap();
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::UndefinedSymbol);
    assert!(error.message.contains("foo"));
    assert_eq!(result.value, Value::Null);

    let result = sessions.execute("seen", "s1").await.unwrap();
    assert_eq!(result.value, Value::Number(2.0));
}

#[tokio::test]
async fn test_parse_errors() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();

    let result = sessions.execute("add(1, ", "s1").await.unwrap();
    assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::ParseError));

    let err = sessions
        .execute_async("add(1, ", "s1", Default::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ParseError);
}

#[tokio::test]
async fn test_unknown_and_duplicate_sessions() {
    let system = system();
    let sessions = system.sessions();
    assert!(matches!(
        sessions.execute("1", "nobody").await,
        Err(ChariotError::Session(_))
    ));

    open_session(&system, "s1").await;
    assert!(matches!(
        sessions.new_session("other", "s1", None).await,
        Err(ChariotError::Session(_))
    ));
    assert_eq!(sessions.active_sessions(), vec!["s1".to_string()]);
}

#[tokio::test]
async fn test_on_start_runs_in_session_registry() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();

    let result = sessions.run_session("s1").await.unwrap();
    assert_eq!(result.value, Value::Null);

    sessions
        .set_on_start("s1", Some("declare(greeting, 'S', 'hi') greeting".to_string()))
        .await
        .unwrap();
    let result = sessions.run_session("s1").await.unwrap();
    assert_eq!(result.value, Value::from("hi"));

    let result = sessions.execute("concat(greeting, '!')", "s1").await.unwrap();
    assert_eq!(result.value, Value::from("hi!"));
    assert!(system.store().root_names().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_is_evicted_after_on_exit() {
    let system = system();
    let sessions = system.sessions();
    let mut events = Box::pin(system.event_bus().stream());

    sessions
        .new_session("u1", "idle", Some(Duration::from_secs(30 * 60)))
        .await
        .unwrap();
    sessions
        .new_session("u2", "busy", Some(Duration::from_secs(30 * 60)))
        .await
        .unwrap();
    sessions
        .set_on_exit("idle", Some("declareGlobal(farewell, 'S', 'bye')".to_string()))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(20 * 60)).await;
    sessions.get_session("busy").await.unwrap();
    tokio::time::advance(Duration::from_secs(11 * 60)).await;

    let evicted = sessions.sweep_expired().await;
    assert_eq!(evicted, vec!["idle".to_string()]);
    assert!(matches!(
        sessions.get_session("idle").await,
        Err(ChariotError::Session(_))
    ));
    assert!(sessions.get_session("busy").await.is_ok());

    let farewell = system.eval_global("farewell", "check").await.unwrap();
    assert_eq!(farewell, Value::from("bye"));

    let mut seen = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(10), events.next()).await
    {
        seen.push(event);
    }
    assert!(seen.contains(&Event::SessionEvicted {
        token: "idle".to_string()
    }));
}

#[tokio::test(start_paused = true)]
async fn test_failing_on_exit_does_not_block_eviction() {
    let system = system();
    let sessions = system.sessions();
    sessions
        .new_session("u1", "s1", Some(Duration::from_secs(60)))
        .await
        .unwrap();
    sessions
        .set_on_exit("s1", Some("missingCleanup()".to_string()))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(sessions.sweep_expired().await, vec!["s1".to_string()]);
    assert!(sessions.active_sessions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_evicts_idle_sessions_on_its_own() {
    let mut config = SystemConfig::default();
    config.session.timeout = Duration::from_secs(30 * 60);
    config.session.sweep_interval = Duration::from_secs(60);
    let system = System::new(config);
    let sessions = system.sessions();

    sessions.new_session("u1", "idle", None).await.unwrap();
    sessions
        .set_on_exit("idle", Some("declareGlobal(swept, 'L', true)".to_string()))
        .await
        .unwrap();
    sessions.start_sweeper().await;

    tokio::time::sleep(Duration::from_secs(29 * 60 + 30)).await;
    assert_eq!(sessions.active_sessions(), vec!["idle".to_string()]);

    tokio::time::sleep(Duration::from_secs(2 * 60)).await;
    assert!(sessions.active_sessions().is_empty());
    assert_eq!(
        system.eval_global("swept", "check").await.unwrap(),
        Value::Bool(true)
    );
    system.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_slow_on_exit_does_not_block_new_sessions() {
    let system = system();
    system.register_binding(Arc::new(HostFunction::new(
        "slowCleanup",
        |_args: Vec<Value>| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BoxError>(Value::Null)
        },
    )));
    let sessions = system.sessions().clone();
    sessions
        .new_session("u1", "old", Some(Duration::from_secs(60)))
        .await
        .unwrap();
    sessions
        .set_on_exit("old", Some("slowCleanup()".to_string()))
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;

    let sweep = {
        let sessions = sessions.clone();
        tokio::spawn(async move { sessions.sweep_expired().await })
    };
    // let the sweep get into onExit
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!sweep.is_finished());
    assert!(sessions.get_session("old").await.is_err());

    tokio::time::timeout(
        Duration::from_secs(1),
        sessions.new_session("u2", "fresh", None),
    )
    .await
    .expect("new_session waited for onExit")
    .unwrap();

    assert_eq!(sweep.await.unwrap(), vec!["old".to_string()]);
    assert_eq!(sessions.active_sessions(), vec!["fresh".to_string()]);
}

#[tokio::test]
async fn test_host_binding_failures_are_wrapped() {
    let system = system();
    system.register_binding(Arc::new(HostFunction::new(
        "fetchUser",
        |args: Vec<Value>| async move {
            match args.first() {
                Some(Value::Number(id)) if *id > 0.0 => {
                    Ok(Value::from(format!("user-{}", id)))
                }
                _ => Err(BoxError::from("backend down")),
            }
        },
    )));
    open_session(&system, "s1").await;
    let sessions = system.sessions();

    let result = sessions.execute("fetchUser(7)", "s1").await.unwrap();
    assert_eq!(result.value, Value::from("user-7"));

    let result = sessions.execute("fetchUser(0)", "s1").await.unwrap();
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::HostBindingError);
    assert!(error.message.contains("fetchUser"));
    assert!(error.message.contains("backend down"));
}

#[tokio::test]
async fn test_end_session_forgets_registry() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();
    sessions.execute("declare(x, 'N', 1)", "s1").await.unwrap();

    sessions.end_session("s1").await.unwrap();
    assert!(sessions.session_info("s1").await.is_err());

    open_session(&system, "s1").await;
    let result = sessions.execute("x", "s1").await.unwrap();
    assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::UndefinedSymbol));
}
