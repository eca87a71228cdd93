mod common;

use chariot::{
    config::{FunctionPolicy, SystemConfig},
    ErrorKind, System, Value,
};
use common::{open_session, system};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_add_child_keeps_a_single_owner() {
    let system = system();
    open_session(&system, "s1").await;

    let result = system
        .sessions()
        .execute(
            r#"
            declare(left, 'T')
            declare(right, 'T')
            setq(leaf, createNode('leaf'))
            addChild(left, leaf)
            addChild(right, leaf)
            list(length(left), length(right), nodeName(getChild(right, 'leaf')))
            "#,
            "s1",
        )
        .await
        .unwrap();

    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(
        result.value,
        Value::List(vec![
            Value::Number(0.0),
            Value::Number(1.0),
            Value::from("leaf")
        ])
    );
}

#[tokio::test]
async fn test_duplicate_declare_keeps_the_first_binding() {
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();

    sessions
        .execute("declare(limit, 'N', 10)", "s1")
        .await
        .unwrap();
    let result = sessions
        .execute("declare(limit, 'N', 99)", "s1")
        .await
        .unwrap();
    assert_eq!(
        result.error.map(|e| e.kind),
        Some(ErrorKind::DeclarationError)
    );

    let result = sessions.execute("limit", "s1").await.unwrap();
    assert_eq!(result.value, Value::Number(10.0));
}

#[tokio::test]
async fn test_session_registries_are_isolated() {
    let system = system();
    open_session(&system, "alice").await;
    open_session(&system, "bob").await;
    let sessions = system.sessions();

    sessions
        .execute("declare(cart, 'A', ['apple'])", "alice")
        .await
        .unwrap();
    system
        .eval_global("declareGlobal(shop, 'S', 'open')", "seed")
        .await
        .unwrap();

    let result = sessions.execute("cart", "bob").await.unwrap();
    assert_eq!(result.error.map(|e| e.kind), Some(ErrorKind::UndefinedSymbol));

    // the global registry is shared
    let result = sessions.execute("shop", "bob").await.unwrap();
    assert_eq!(result.value, Value::from("open"));
    let result = sessions.execute("length(cart)", "alice").await.unwrap();
    assert_eq!(result.value, Value::Number(1.0));
}

#[tokio::test]
async fn test_text_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.json");
    let system = system();
    open_session(&system, "s1").await;

    let source = format!(
        r#"
        declare(catalog, 'T')
        setAttribute(catalog, 'title', 'spring')
        setAttribute(catalog, 'tags', ['new', 'sale'])
        setq(item, createNode('item'))
        setAttribute(item, 'price', 12.5)
        setAttribute(item, 'meta', map('sku', 'A-1', 'stock', 3))
        addChild(catalog, item)
        addChild(item, parseJSON('{{"color": "red"}}', 'details'))
        treeSave(catalog, "{path}", 'text')
        setq(copy, treeLoad("{path}", 'text'))
        list(equal(toJSON(catalog), toJSON(copy)), getAttribute(getChild(copy, 'item'), 'price'))
        "#,
        path = path.display()
    );
    let result = system.sessions().execute(&source, "s1").await.unwrap();

    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(
        result.value,
        Value::List(vec![Value::Bool(true), Value::Number(12.5)])
    );
    let text = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(text.contains("spring"));
}

#[tokio::test]
async fn test_function_attributes_are_omitted_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("with_fn.bin");
    let system = system();
    open_session(&system, "s1").await;

    let source = format!(
        r#"
        declare(box, 'T')
        setAttribute(box, 'size', 3)
        setAttribute(box, 'open', func() {{ true }})
        treeSave(box, "{path}")
        setq(copy, treeLoad("{path}"))
        list(hasAttribute(copy, 'size'), hasAttribute(copy, 'open'))
        "#,
        path = path.display()
    );
    let result = system.sessions().execute(&source, "s1").await.unwrap();
    assert_eq!(
        result.value,
        Value::List(vec![Value::Bool(true), Value::Bool(false)])
    );
}

#[tokio::test]
async fn test_function_attributes_fail_the_save_under_fail_policy() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("with_fn.bin");
    let mut config = SystemConfig::default();
    config.persistence.function_policy = FunctionPolicy::Fail;
    let system = System::new(config);
    open_session(&system, "s1").await;

    let source = format!(
        r#"
        declare(box, 'T')
        setAttribute(box, 'open', func() {{ true }})
        treeSave(box, "{}")
        "#,
        path.display()
    );
    let result = system.sessions().execute(&source, "s1").await.unwrap();
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::HostBindingError);
    assert!(error.message.contains("function-valued"), "{}", error.message);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_reference_outside_saved_tree_fails_the_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("peer.json");
    let system = system();
    open_session(&system, "s1").await;

    let source = format!(
        r#"
        declare(a, 'T')
        declare(b, 'T')
        setAttribute(a, 'peer', b)
        treeSave(a, "{}", 'text')
        "#,
        path.display()
    );
    let result = system.sessions().execute(&source, "s1").await.unwrap();
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::HostBindingError);
    assert!(error.message.contains("outside the saved tree"), "{}", error.message);
    assert!(!path.exists());
}

#[tokio::test]
async fn test_tree_binding_failures_are_wrapped() {
    let dir = tempfile::tempdir().unwrap();
    let system = system();
    open_session(&system, "s1").await;
    let sessions = system.sessions();

    let result = sessions
        .execute("treeLoad('/definitely/not/here', 'text')", "s1")
        .await
        .unwrap();
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::HostBindingError);
    assert!(error.message.contains("treeLoad"));

    let missing_dir = dir.path().join("no").join("such").join("x.bin");
    let source = format!(
        "declare(r, 'T') treeSave(r, \"{}\")",
        missing_dir.display()
    );
    let result = sessions.execute(&source, "s1").await.unwrap();
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::HostBindingError);
    assert!(error.message.contains("treeSave"));
}

#[tokio::test]
async fn test_infinite_numbers_survive_a_text_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bounds.json");
    let system = system();
    open_session(&system, "s1").await;

    let source = format!(
        r#"
        declare(bounds, 'J')
        setAttribute(bounds, 'max', toNumber('inf'))
        treeSave(bounds, "{path}", 'text')
        setq(copy, treeLoad("{path}", 'text'))
        equal(getAttribute(copy, 'max'), toNumber('inf'))
        "#,
        path = path.display()
    );
    let result = system.sessions().execute(&source, "s1").await.unwrap();
    assert!(result.is_ok(), "{:?}", result.error);
    assert_eq!(result.value, Value::Bool(true));
}

#[tokio::test]
async fn test_registry_dump_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");
    let mut config = SystemConfig::default();
    config.persistence.format = chariot::config::Format::Text;

    let first = System::new(config.clone());
    first
        .eval_global(
            "declareGlobal(settings, 'J', map('theme', 'dark')) declareGlobal(visits, 'N', 41)",
            "seed",
        )
        .await
        .unwrap();
    first.save_registry(&path).await.unwrap();

    let second = System::new(config);
    assert_eq!(second.load_registry(&path).await.unwrap(), 2);
    let value = second
        .eval_global("list(getAttribute(settings, 'theme'), add(visits, 1))", "check")
        .await
        .unwrap();
    assert_eq!(
        value,
        Value::List(vec![Value::from("dark"), Value::Number(42.0)])
    );
}
