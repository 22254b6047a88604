//! Plan execution engine.
//!
//! Runs every scenario of a [`TestPlan`] against a [`Page`] and folds step
//! outcomes into an [`ExecutionResult`]. Step faults never abort the run;
//! they become [`FailureRecord`]s and execution moves on to the next step.
//!
//! Network expectations use a single pending slot: a `network` step arms a
//! listener, and the next step either awaits it first or, for a click or a
//! typed input, runs concurrently with it.

pub mod server;
pub mod types;

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{self, Config};
use crate::page::{NetworkExpectation, Page, PageError, PageResult, ResponseWait, StyleProperty};
use crate::plan::{CanonicalAction, TestPlan, colors_match, normalize, normalize_color};

pub use server::{ServerError, ServerOptions};
pub use types::{ExecutionResult, FailedStep, FailureRecord};

/// Run-fatal reason when the application cannot be reached or started
pub const SERVER_FAILED: &str = "Server failed to start";

/// Run-fatal reason when no counted step ran
pub const NO_TESTS_EXECUTED: &str = "No tests executed";

/// Timing and server settings for a run
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Timeout for selector, click and URL waits
    pub step_timeout: Duration,
    /// Timeout for the first reachability check
    pub reach_timeout: Duration,
    /// Timeout for scenario navigation
    pub navigation_timeout: Duration,
    /// Timeout for a pending network expectation
    pub network_timeout: Duration,
    /// Dev server autostart
    pub server: ServerOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_millis(config::DEFAULT_STEP_TIMEOUT_MS),
            reach_timeout: Duration::from_millis(config::DEFAULT_REACH_TIMEOUT_MS),
            navigation_timeout: Duration::from_millis(config::DEFAULT_NETWORK_TIMEOUT_MS),
            network_timeout: Duration::from_millis(config::DEFAULT_NETWORK_TIMEOUT_MS),
            server: ServerOptions::default(),
        }
    }
}

impl EngineOptions {
    /// Options for a project directory, taking timings and commands from `config`
    pub fn from_config(config: &Config, project_dir: impl Into<PathBuf>) -> Self {
        let engine = &config.engine;
        Self {
            step_timeout: Duration::from_millis(engine.step_timeout_ms),
            reach_timeout: Duration::from_millis(engine.reach_timeout_ms),
            navigation_timeout: Duration::from_millis(engine.network_timeout_ms),
            network_timeout: Duration::from_millis(engine.network_timeout_ms),
            server: ServerOptions::new(project_dir)
                .command(Some(config.project.dev_command.clone()))
                .startup_timeout(Duration::from_secs(engine.server_timeout)),
        }
    }

    pub fn step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    pub fn server(mut self, server: ServerOptions) -> Self {
        self.server = server;
        self
    }
}

/// Load the plan at `path` and run it. Load errors become a fatal result.
pub async fn run_plan_file(page: &mut dyn Page, path: &Path, options: &EngineOptions) -> ExecutionResult {
    match TestPlan::from_file(path) {
        Ok(plan) => run(page, &plan, options).await,
        Err(e) => {
            warn!("{}", e);
            ExecutionResult::fatal(e.to_string())
        }
    }
}

/// Execute every scenario of `plan` against `page`
pub async fn run(page: &mut dyn Page, plan: &TestPlan, options: &EngineOptions) -> ExecutionResult {
    let base_url = plan.base_url();
    info!("Starting verification against {} ({})", base_url, page.source_type());

    if let Err(e) = ensure_reachable(page, base_url, options).await {
        warn!("{}", e);
        return ExecutionResult::fatal(SERVER_FAILED);
    }

    let mut result = ExecutionResult::default();
    let mut pending: Option<ResponseWait> = None;

    for scenario in &plan.scenarios {
        info!("Scenario: {}", scenario.name);

        let url = format!("{}{}", base_url, scenario.path);
        if let Err(e) = page.goto(&url, options.navigation_timeout).await {
            warn!("Could not load {}: {}", scenario.path, e);
            result.failures.push(FailureRecord {
                scenario: scenario.name.clone(),
                action: FailedStep::navigation(),
                error: format!("Could not load {}", scenario.path),
            });
            continue;
        }
        debug!("Arrived at {}", url);

        for raw in &scenario.tests {
            let action = normalize(raw);
            if action.is_counted() {
                result.total_tests += 1;
            }

            match execute(page, &action, &mut pending, options).await {
                Ok(()) => {
                    if action.is_counted() {
                        result.passed_tests += 1;
                        info!("  ok   {}", action.describe());
                    } else {
                        info!("  ..   {}", action.describe());
                    }
                }
                Err(e) => {
                    warn!("  FAIL {}: {}", action.describe(), e);
                    pending = None;
                    result.failures.push(FailureRecord {
                        scenario: scenario.name.clone(),
                        action: FailedStep::Action(action),
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    if result.total_tests == 0 {
        warn!("No tests were executed; check the plan's scenarios");
        result.success = false;
        result.error = Some(NO_TESTS_EXECUTED.to_string());
        return result;
    }

    result.success = result.failures.is_empty() && result.passed_tests == result.total_tests;
    if result.success {
        info!("All checks passed: {}/{}", result.passed_tests, result.total_tests);
    } else {
        warn!(
            "Verification failed: {} failures, {}/{} passed",
            result.failures.len(),
            result.passed_tests,
            result.total_tests
        );
    }
    result
}

/// Check the base URL; if it is down, start the dev server and retry once
async fn ensure_reachable(page: &mut dyn Page, base_url: &str, options: &EngineOptions) -> Result<(), String> {
    let unreachable = match page.goto(base_url, options.reach_timeout).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    warn!("{} is down ({}), auto-starting dev server", base_url, unreachable);

    server::start_and_wait(&options.server, base_url)
        .await
        .map_err(|e| e.to_string())?;

    page.goto(base_url, options.navigation_timeout)
        .await
        .map_err(|e| e.to_string())
}

/// Run one normalized step, honoring the pending network slot
async fn execute(
    page: &mut dyn Page,
    action: &CanonicalAction,
    pending: &mut Option<ResponseWait>,
    options: &EngineOptions,
) -> PageResult<()> {
    if !action.triggers_network() {
        if let Some(wait) = pending.take() {
            debug!("Waiting for pending network response");
            wait.await?;
        }
    }

    let timeout = options.step_timeout;
    match action {
        CanonicalAction::See { value } => {
            if page.is_text_visible(value).await? {
                Ok(())
            } else {
                Err(PageError::Assertion(format!("Text \"{}\" not found.", value)))
            }
        }
        CanonicalAction::AssertVisible { selector } => page.wait_for_selector(selector, timeout).await,
        CanonicalAction::AssertText { selector, value } => {
            let text = page.selector_text(selector, timeout).await?;
            if text.contains(value.as_str()) {
                Ok(())
            } else {
                Err(PageError::Assertion(format!("Expected \"{}\", found \"{}\"", value, text)))
            }
        }
        CanonicalAction::Click { value } => {
            with_pending(pending.take(), page.click_text(value, timeout)).await
        }
        CanonicalAction::TypeSmart { value, label } => {
            with_pending(pending.take(), type_smart(page, label, value)).await
        }
        CanonicalAction::TypeSelector { selector, value } => page.fill_selector(selector, value).await,
        CanonicalAction::AssertUrl { value } => page.wait_for_url(value, timeout).await,
        CanonicalAction::NetworkListen { method, url_part } => {
            let expectation = NetworkExpectation::new(method.clone(), url_part.clone());
            *pending = Some(page.expect_response(expectation, options.network_timeout).await?);
            Ok(())
        }
        CanonicalAction::AssertColor { color, element } => {
            assert_style(page, element, color, StyleProperty::Color, "Color", "color").await
        }
        CanonicalAction::AssertBackground { color, element } => {
            assert_style(
                page,
                element,
                color,
                StyleProperty::BackgroundColor,
                "Background",
                "background",
            )
            .await
        }
        CanonicalAction::AssertBorderColor { color, element } => {
            assert_style(
                page,
                element,
                color,
                StyleProperty::BorderColor,
                "Border color",
                "border color",
            )
            .await
        }
        CanonicalAction::Wait { ms } => page.wait(*ms).await,
        CanonicalAction::Unknown { original } => Err(PageError::Assertion(format!(
            "Unrecognized step: {}",
            serde_json::to_string(original).unwrap_or_default()
        ))),
    }
}

/// Run a triggering action, joined with the pending response wait if any
async fn with_pending<F>(pending: Option<ResponseWait>, action: F) -> PageResult<()>
where
    F: std::future::Future<Output = PageResult<()>>,
{
    match pending {
        Some(wait) => tokio::try_join!(wait, action).map(|_| ()),
        None => action.await,
    }
}

/// Fill by accessible label, falling back to placeholder text
async fn type_smart(page: &mut dyn Page, label: &str, value: &str) -> PageResult<()> {
    if page.count_by_label(label).await? > 0 {
        return page.fill_by_label(label, value).await;
    }
    if page.count_by_placeholder(label).await? > 0 {
        return page.fill_by_placeholder(label, value).await;
    }
    Err(PageError::NotFound(format!("Input \"{}\" not found.", label)))
}

async fn assert_style(
    page: &mut dyn Page,
    element: &str,
    color: &str,
    property: StyleProperty,
    check: &str,
    noun: &str,
) -> PageResult<()> {
    let outcome = match page.computed_style(element, property).await {
        Ok(actual) if colors_match(color, &actual) => return Ok(()),
        Ok(actual) => format!(
            "Expected {} \"{}\" ({}) but got \"{}\" ({})",
            noun,
            color,
            normalize_color(color),
            actual,
            normalize_color(&actual)
        ),
        Err(e) => e.to_string(),
    };
    Err(PageError::Assertion(format!(
        "{} check failed for \"{}\": {}",
        check, element, outcome
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{MockEffect, MockElement, MockPage};
    use pretty_assertions::assert_eq;

    fn plan(yaml: &str) -> TestPlan {
        TestPlan::from_yaml(yaml).unwrap()
    }

    fn options() -> EngineOptions {
        EngineOptions::default()
            .network_timeout(Duration::from_millis(100))
            .server(ServerOptions::new(".").command(None))
    }

    #[tokio::test]
    async fn counts_and_passes_simple_plan() {
        let mut page = MockPage::new()
            .with_element(MockElement::text("Welcome"))
            .with_element(MockElement::text("Go").on_click(MockEffect::Navigate(
                "http://localhost:3000/next".into(),
            )));
        let result = run(
            &mut page,
            &plan("scenarios:\n  - name: Home\n    path: /\n    tests:\n      - see: Welcome\n      - click: Go\n      - url: /next\n"),
            &options(),
        )
        .await;
        assert!(result.success, "{:?}", result);
        assert_eq!((result.total_tests, result.passed_tests), (3, 3));
    }

    #[tokio::test]
    async fn empty_plan_reports_no_tests() {
        let mut page = MockPage::new();
        let result = run(&mut page, &plan("scenarios: []"), &options()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(NO_TESTS_EXECUTED));
    }

    #[tokio::test]
    async fn listener_alone_counts_nothing() {
        let mut page = MockPage::new();
        let result = run(
            &mut page,
            &plan("scenarios:\n  - name: A\n    tests:\n      - network: GET /api\n"),
            &options(),
        )
        .await;
        assert_eq!(result.total_tests, 0);
        assert_eq!(result.error.as_deref(), Some(NO_TESTS_EXECUTED));
    }

    #[tokio::test]
    async fn unreachable_without_server_command_is_fatal() {
        let mut page = MockPage::new().failing_navigations(1);
        let result = run(
            &mut page,
            &plan("scenarios:\n  - name: A\n    tests:\n      - see: x\n"),
            &options(),
        )
        .await;
        assert_eq!(result.error.as_deref(), Some(SERVER_FAILED));
        assert_eq!(result.total_tests, 0);
        assert!(result.failures.is_empty());
    }

    #[tokio::test]
    async fn unknown_step_is_counted_and_fails() {
        let mut page = MockPage::new().with_element(MockElement::text("Hi"));
        let result = run(
            &mut page,
            &plan("scenarios:\n  - name: A\n    tests:\n      - see: Hi\n      - hover: Menu\n"),
            &options(),
        )
        .await;
        assert!(!result.success);
        assert_eq!((result.total_tests, result.passed_tests), (2, 1));
        assert!(result.failures[0].error.starts_with("Unrecognized step:"));
    }

    #[tokio::test]
    async fn type_smart_falls_back_to_placeholder() {
        let mut page = MockPage::new().with_element(MockElement::placeholder_input("Search"));
        let result = run(
            &mut page,
            &plan("scenarios:\n  - name: A\n    tests:\n      - type: rust\n        into: Search\n      - type: x\n        into: Missing\n"),
            &options(),
        )
        .await;
        assert_eq!(page.input_value("Search"), Some("rust"));
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].error, "Input \"Missing\" not found.");
    }

    #[tokio::test]
    async fn color_mismatch_message() {
        let mut page = MockPage::new()
            .with_element(MockElement::text("Delete").style(StyleProperty::Color, "rgb(0, 0, 255)"));
        let result = run(
            &mut page,
            &plan("scenarios:\n  - name: A\n    tests:\n      - color: red on Delete\n      - color: blue on Delete\n"),
            &options(),
        )
        .await;
        assert_eq!((result.total_tests, result.passed_tests), (2, 1));
        assert_eq!(
            result.failures[0].error,
            "Color check failed for \"Delete\": Expected color \"red\" (rgb(255, 0, 0)) but got \"rgb(0, 0, 255)\" (rgb(0, 0, 255))"
        );
    }
}
