//! Integration tests for plan execution against an in-memory page

use std::fs;
use std::time::Duration;

use botintern::engine::{self, EngineOptions, FailedStep, NO_TESTS_EXECUTED, SERVER_FAILED, ServerOptions};
use botintern::page::{MockEffect, MockElement, MockPage, StyleProperty};
use botintern::plan::{CanonicalAction, TestPlan};

fn options() -> EngineOptions {
    EngineOptions::default()
        .network_timeout(Duration::from_millis(200))
        .server(ServerOptions::new(".").command(None))
}

fn plan(yaml: &str) -> TestPlan {
    TestPlan::from_yaml(yaml).expect("valid plan")
}

#[tokio::test]
async fn test_network_expectation_joins_with_click() {
    let mut page = MockPage::new().with_element(MockElement::text("Save").on_click(MockEffect::Respond {
        method: "POST".into(),
        url: "http://localhost:3000/api/items".into(),
        status: 200,
    }));

    let result = engine::run(
        &mut page,
        &plan(
            r#"
scenarios:
  - name: Save item
    path: /
    tests:
      - network: POST /api/items
      - click: Save
"#,
        ),
        &options(),
    )
    .await;

    assert!(result.success, "{:?}", result);
    // The listener itself is not counted
    assert_eq!((result.total_tests, result.passed_tests), (1, 1));
}

#[tokio::test]
async fn test_unmet_network_expectation_fails_the_trigger() {
    let mut page = MockPage::new()
        .with_element(MockElement::text("Save"))
        .with_element(MockElement::text("Saved"));

    let result = engine::run(
        &mut page,
        &plan(
            r#"
scenarios:
  - name: Save item
    tests:
      - network: POST /api/items
      - click: Save
      - see: Saved
"#,
        ),
        &options(),
    )
    .await;

    assert!(!result.success);
    assert_eq!((result.total_tests, result.passed_tests), (2, 1));
    assert_eq!(result.failures.len(), 1);
    assert!(matches!(&result.failures[0].action, FailedStep::Action(CanonicalAction::Click { value }) if value == "Save"));
    assert!(result.failures[0].error.starts_with("Timed out"), "{}", result.failures[0].error);
}

#[tokio::test]
async fn test_pending_expectation_blocks_before_assertion() {
    let mut page = MockPage::new().with_element(MockElement::text("Saved"));

    let result = engine::run(
        &mut page,
        &plan(
            r#"
scenarios:
  - name: Autosave
    tests:
      - network: POST /api/items
      - see: Saved
"#,
        ),
        &options(),
    )
    .await;

    // The text is visible, but the unmet response is charged to the `see` step
    assert_eq!((result.total_tests, result.passed_tests), (1, 0));
    assert!(matches!(&result.failures[0].action, FailedStep::Action(CanonicalAction::See { value }) if value == "Saved"));
    assert!(result.failures[0].error.starts_with("Timed out waiting for response"), "{}", result.failures[0].error);
}

#[tokio::test]
async fn test_second_expectation_is_awaited_before_next_step() {
    let mut page = MockPage::new()
        .with_element(MockElement::text("Save").on_click(MockEffect::Respond {
            method: "POST".into(),
            url: "http://localhost:3000/api/items".into(),
            status: 200,
        }))
        .with_element(MockElement::text("Saved"));

    let result = engine::run(
        &mut page,
        &plan(
            r#"
scenarios:
  - name: Save then refresh
    tests:
      - network: POST /api/items
      - click: Save
      - network: GET /api/items
      - see: Saved
"#,
        ),
        &options(),
    )
    .await;

    assert_eq!((result.total_tests, result.passed_tests), (2, 1));
    assert_eq!(result.failures.len(), 1);
    assert!(matches!(&result.failures[0].action, FailedStep::Action(CanonicalAction::See { .. })));
    assert!(result.failures[0].error.contains("GET"), "{}", result.failures[0].error);
}

#[tokio::test]
async fn test_network_expectation_joins_with_typed_input() {
    let mut page = MockPage::new().with_element(MockElement::labeled_input("Search").on_fill(MockEffect::Respond {
        method: "GET".into(),
        url: "http://localhost:3000/api/search?q=rust".into(),
        status: 200,
    }));

    let result = engine::run(
        &mut page,
        &plan(
            r#"
scenarios:
  - name: Live search
    tests:
      - network: /api/search
      - type: rust
        into: Search
"#,
        ),
        &options(),
    )
    .await;

    assert!(result.success, "{:?}", result);
    assert_eq!((result.total_tests, result.passed_tests), (1, 1));
    assert_eq!(page.input_value("Search"), Some("rust"));
}

#[tokio::test]
async fn test_navigation_failure_moves_to_next_scenario() {
    let mut page = MockPage::new()
        .unreachable("http://localhost:3000/broken")
        .with_element(MockElement::text("Dashboard"));

    let result = engine::run(
        &mut page,
        &plan(
            r#"
scenarios:
  - name: Broken page
    path: /broken
    tests:
      - see: Anything
  - name: Dashboard
    path: /dashboard
    tests:
      - see: Dashboard
"#,
        ),
        &options(),
    )
    .await;

    assert!(!result.success);
    assert_eq!((result.total_tests, result.passed_tests), (1, 1));
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].scenario, "Broken page");
    assert_eq!(result.failures[0].action, FailedStep::navigation());
    assert_eq!(result.failures[0].error, "Could not load /broken");
    assert!(page.history().contains(&"goto http://localhost:3000/dashboard".to_string()));
}

#[tokio::test]
async fn test_steps_continue_after_failures() {
    let mut page = MockPage::new()
        .with_element(MockElement::text("Title"))
        .with_element(MockElement::text("Hidden").hidden())
        .with_element(MockElement::text("Banner").style(StyleProperty::BackgroundColor, "rgb(255, 0, 0)"))
        .with_element(MockElement::labeled_input("Email"));

    let result = engine::run(
        &mut page,
        &plan(
            r#"
scenarios:
  - name: Mixed
    tests:
      - see: Hidden
      - see: Title
      - background: red on Banner
      - type: me@example.com
        into: Email
      - wait: 10
"#,
        ),
        &options(),
    )
    .await;

    assert_eq!((result.total_tests, result.passed_tests), (5, 4));
    assert_eq!(result.failures[0].error, "Text \"Hidden\" not found.");
    assert_eq!(page.input_value("Email"), Some("me@example.com"));
    assert!(page.history().contains(&"wait 10".to_string()));
}

#[tokio::test]
async fn test_missing_plan_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut page = MockPage::new();
    let result = engine::run_plan_file(&mut page, &dir.path().join("vibe.yaml"), &options()).await;

    assert!(!result.success);
    assert_eq!(result.total_tests, 0);
    assert!(result.error.as_deref().unwrap_or_default().contains("vibe.yaml"));
    assert!(page.history().is_empty());
}

#[tokio::test]
async fn test_plan_file_with_only_empty_scenarios() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vibe.yaml");
    fs::write(&path, "meta:\n  baseUrl: http://localhost:3000\nscenarios:\n  - name: Empty\n    path: /\n    tests: []\n").unwrap();

    let mut page = MockPage::new();
    let result = engine::run_plan_file(&mut page, &path, &options()).await;
    assert_eq!(result.error.as_deref(), Some(NO_TESTS_EXECUTED));
}

#[cfg(unix)]
#[tokio::test]
async fn test_server_autostart_when_port_opens() {
    // Stands in for a dev server that is already listening by the first poll
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let base = format!("http://127.0.0.1:{}", port);

    let mut page = MockPage::new()
        .failing_navigations(1)
        .with_element(MockElement::text("Hello"));
    let options = options().server(
        ServerOptions::new(".")
            .command(Some("true".into()))
            .startup_timeout(Duration::from_secs(5))
            .poll_interval(Duration::from_millis(50)),
    );

    let yaml = format!("meta:\n  baseUrl: {}\nscenarios:\n  - name: A\n    tests:\n      - see: Hello\n", base);
    let result = engine::run(&mut page, &plan(&yaml), &options).await;

    assert!(result.success, "{:?}", result);
    let gotos = page.history().iter().filter(|h| h.starts_with("goto")).count();
    // reachability check, retry after start, scenario
    assert_eq!(gotos, 3);
    drop(listener);
}

#[cfg(unix)]
#[tokio::test]
async fn test_server_that_never_listens_is_fatal() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let mut page = MockPage::new().failing_navigations(1);
    let options = options().server(
        ServerOptions::new(".")
            .command(Some("true".into()))
            .startup_timeout(Duration::from_millis(200))
            .poll_interval(Duration::from_millis(50)),
    );

    let yaml = format!("meta:\n  baseUrl: http://127.0.0.1:{}\nscenarios:\n  - name: A\n    tests:\n      - see: x\n", port);
    let result = engine::run(&mut page, &plan(&yaml), &options).await;
    assert_eq!(result.error.as_deref(), Some(SERVER_FAILED));
    assert!(result.failures.is_empty());
}
