//! Code-generation oracle: an LLM behind an OpenAI-compatible chat endpoint.
//!
//! The repair loop only sees the [`Oracle`] trait. [`HttpOracle`] talks to the
//! endpoint through `curl` with:
//! - Streaming responses (no total timeout, activity-based timeout)
//! - A non-streaming fallback for endpoints that ignore `stream`
//! - Connection health checks
//!
//! # Configuration
//!
//! - `BOTINTERN_ORACLE_ENDPOINT`: chat-completions URL
//! - `BOTINTERN_ORACLE_MODEL`: model name
//! - `BOTINTERN_API_KEY` (or `API_KEY`): bearer token
//! - `BOTINTERN_ORACLE_MAX_TOKENS`: max tokens in response
//! - `BOTINTERN_ORACLE_TIMEOUT`: activity timeout (seconds)
//! - `BOTINTERN_ORACLE_CONNECT_TIMEOUT`: connection timeout (seconds)

use async_trait::async_trait;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::config;

/// Result type for oracle operations
pub type OracleResult<T> = Result<T, OracleError>;

/// Errors that can occur while talking to the oracle
#[derive(Debug, Error)]
pub enum OracleError {
    /// Failed to connect to the endpoint
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No activity for too long during streaming
    #[error("No response for {0:?}")]
    ActivityTimeout(Duration),

    /// The endpoint answered with something unusable
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inputs for a single-file build fix
#[derive(Debug, Clone)]
pub struct BuildRepairContext {
    /// Combined build output
    pub logs: String,
    /// Current content of the broken file
    pub source: String,
    /// Dependency manifest (package.json)
    pub manifest: String,
}

/// Inputs for a multi-file fix after failing tests
#[derive(Debug, Clone)]
pub struct TestRepairContext {
    /// Numbered failure list
    pub failures: String,
    /// Current plan text
    pub plan: String,
    /// Concatenated project sources
    pub source_context: String,
    /// Rendered file tree
    pub file_tree: String,
    /// Dependency manifest (package.json)
    pub manifest: String,
    /// User instruction for this loop, if any
    pub instruction: Option<String>,
}

/// Inputs for plan generation
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub file_tree: String,
    pub source_context: String,
    /// Existing plan text (empty if none)
    pub current_plan: String,
    pub instruction: Option<String>,
}

/// Oracle capabilities used by the repair loop
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Full replacement for one broken file (may be fenced)
    async fn repair_file(&self, context: &BuildRepairContext) -> OracleResult<String>;

    /// Multi-file patch text in `--- FILE: path ---` format
    async fn repair_files(&self, context: &TestRepairContext) -> OracleResult<String>;

    /// Complete plan document (may be fenced)
    async fn generate_plan(&self, context: &PlanContext) -> OracleResult<String>;
}

/// Configuration for the HTTP oracle client
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name to use
    pub model: String,
    /// Bearer token
    pub api_key: Option<String>,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Timeout for initial connection (seconds)
    pub connection_timeout: u64,
    /// Timeout for inactivity during streaming (seconds)
    pub activity_timeout: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.oracle.endpoint.clone(),
            model: cfg.oracle.model.clone(),
            api_key: cfg.oracle.api_key.clone(),
            max_tokens: cfg.oracle.max_tokens,
            connection_timeout: cfg.oracle.connect_timeout,
            activity_timeout: cfg.oracle.activity_timeout,
        }
    }
}

impl OracleConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn activity_timeout(mut self, seconds: u64) -> Self {
        self.activity_timeout = seconds;
        self
    }
}

/// Progress update while a completion streams in
#[derive(Debug, Clone)]
pub enum OracleProgress {
    /// Connection established
    Connected,
    /// Receiving data (characters so far)
    Receiving(usize),
    /// Completion finished
    Complete(usize),
}

/// Check if the oracle endpoint is reachable (connection-only check).
///
/// Any HTTP status counts as reachable; only a failed connection does not.
pub fn check_health(endpoint: &str, timeout_secs: u64) -> OracleResult<bool> {
    let (scheme, rest) = endpoint.split_once("://").unwrap_or(("https", endpoint));
    let host_port = rest.split('/').next().unwrap_or_default();

    let output = Command::new("curl")
        .args([
            "-s",
            "-o", "/dev/null",
            "-w", "%{http_code}",
            "--connect-timeout", &timeout_secs.to_string(),
            "--max-time", &timeout_secs.to_string(),
            "-I",
            &format!("{}://{}", scheme, host_port),
        ])
        .output()?;

    let status = String::from_utf8_lossy(&output.stdout);
    // 000 means the connection failed entirely
    let code: u16 = status.trim().parse().unwrap_or(0);
    Ok(code > 0)
}

fn request_body(config: &OracleConfig, prompt: &str, stream: bool) -> OracleResult<String> {
    let mut request = serde_json::json!({
        "model": config.model,
        "messages": [{
            "role": "user",
            "content": prompt
        }],
        "max_tokens": config.max_tokens
    });
    if stream {
        request["stream"] = serde_json::Value::Bool(true);
    }
    serde_json::to_string(&request).map_err(|e| OracleError::InvalidResponse(e.to_string()))
}

/// Spawn curl posting `body` from stdin (prompts can exceed argv limits)
fn spawn_curl(config: &OracleConfig, body: &str, stream: bool) -> OracleResult<Child> {
    let connect_timeout = config.connection_timeout.to_string();
    let mut args: Vec<String> = vec!["-s".into()];
    if stream {
        args.push("-N".into());
    }
    args.extend(
        [
            "-X", "POST",
            config.endpoint.as_str(),
            "-H", "Content-Type: application/json",
            "--data-binary", "@-",
            "--connect-timeout", connect_timeout.as_str(),
        ]
        .map(String::from),
    );
    if let Some(key) = &config.api_key {
        args.push("-H".into());
        args.push(format!("Authorization: Bearer {}", key));
    }

    let mut child = Command::new("curl")
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| OracleError::Io(std::io::Error::other("Failed to capture stdin")))?;
    stdin.write_all(body.as_bytes())?;
    drop(stdin);
    Ok(child)
}

/// Kill and reap curl when a streaming read is abandoned
fn stop_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Run one text completion, streaming with an activity timeout
pub fn complete(config: &OracleConfig, prompt: &str) -> OracleResult<String> {
    complete_with_progress(config, prompt, |_| {})
}

/// Run one text completion with progress callbacks
pub fn complete_with_progress<F>(config: &OracleConfig, prompt: &str, mut on_progress: F) -> OracleResult<String>
where
    F: FnMut(OracleProgress),
{
    let body = request_body(config, prompt, true)?;
    let mut child = spawn_curl(config, &body, true)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| OracleError::Io(std::io::Error::other("Failed to capture stdout")))?;

    let (tx, rx) = mpsc::channel();
    let activity_timeout = Duration::from_secs(config.activity_timeout);

    thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });

    on_progress(OracleProgress::Connected);

    let mut full_content = String::new();
    let mut error_body = String::new();
    let mut last_activity = Instant::now();

    loop {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(line)) => {
                last_activity = Instant::now();

                let Some(data) = line.strip_prefix("data: ") else {
                    error_body.push_str(&line);
                    continue;
                };
                if data == "[DONE]" {
                    break;
                }
                if let Ok(json) = serde_json::from_str::<serde_json::Value>(data) {
                    if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
                        full_content.push_str(content);
                        on_progress(OracleProgress::Receiving(full_content.len()));
                    }
                }
            }
            Ok(Err(e)) => {
                stop_child(&mut child);
                return Err(OracleError::Io(e));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if last_activity.elapsed() > activity_timeout {
                    stop_child(&mut child);
                    return Err(OracleError::ActivityTimeout(activity_timeout));
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                break;
            }
        }
    }

    let status = child.wait()?;

    if !status.success() && full_content.is_empty() {
        return Err(OracleError::ConnectionFailed("curl process failed".to_string()));
    }

    if full_content.is_empty() {
        if let Some(message) = api_error(&error_body) {
            return Err(OracleError::InvalidResponse(message));
        }
        return complete_non_streaming(config, prompt);
    }

    on_progress(OracleProgress::Complete(full_content.len()));
    Ok(full_content)
}

/// `error.message` from a JSON error body, if that is what the endpoint sent
fn api_error(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    let json = match json {
        serde_json::Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    json["error"]["message"].as_str().map(String::from)
}

/// Fallback for endpoints that don't stream
fn complete_non_streaming(config: &OracleConfig, prompt: &str) -> OracleResult<String> {
    let body = request_body(config, prompt, false)?;
    let child = spawn_curl(config, &body, false)?;
    let output = child.wait_with_output()?;

    if !output.status.success() {
        return Err(OracleError::ConnectionFailed(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }

    let response: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| OracleError::InvalidResponse(e.to_string()))?;

    response["choices"][0]["message"]["content"]
        .as_str()
        .filter(|content| !content.is_empty())
        .map(String::from)
        .ok_or_else(|| OracleError::InvalidResponse("response has no message content".to_string()))
}

/// Prompt for a single-file build fix
pub fn build_fix_prompt(context: &BuildRepairContext) -> String {
    format!(
        r##"ROLE: You are a senior React engineer.
TASK: Fix the source file below so the build error is resolved.

1. SOURCE CODE:
{source}

2. ERROR LOG:
{logs}

3. INSTALLED PACKAGES (package.json):
{manifest}

RULES:
1. Return the FULL file content. Never truncate or use placeholders like "// ... rest of code".
2. Do not import packages missing from package.json, except built-in Node/React modules.
3. If an import is missing or broken, remove it or replace it with a valid alternative from package.json.
4. Return ONLY the code. No explanations. No markdown fences."##,
        source = context.source,
        logs = context.logs,
        manifest = context.manifest,
    )
}

/// Prompt for a multi-file fix after failing tests
pub fn build_repair_prompt(context: &TestRepairContext) -> String {
    format!(
        r##"ROLE: You are a senior React engineer.
TASK: The application fails its UI test plan. Change the application code so every test passes.

1. FAILURES:
{failures}

2. TEST PLAN:
{plan}

3. FILE TREE:
{tree}

4. SOURCE FILES:
{sources}

5. INSTALLED PACKAGES (package.json):
{manifest}

RULES:
1. Fix the application, not the test plan.
2. Return the FULL content of every file you change. Never truncate.
3. Do not import packages missing from package.json.
4. Format every changed file exactly like this, with paths relative to the project root:
--- FILE: app/page.tsx ---
<full file content>
--- FILE: lib/api.ts ---
<full file content>
5. No explanations outside the file blocks. No markdown fences.

USER INSTRUCTION (ignore if empty):
{instruction}"##,
        failures = context.failures,
        plan = context.plan,
        tree = context.file_tree,
        sources = context.source_context,
        manifest = context.manifest,
        instruction = context.instruction.as_deref().unwrap_or(""),
    )
}

/// Prompt for generating or updating the plan
pub fn build_plan_prompt(context: &PlanContext) -> String {
    let current = if context.current_plan.trim().is_empty() {
        "No existing plan."
    } else {
        context.current_plan.as_str()
    };
    format!(
        r##"ROLE: You are a QA architect.
TASK: Update the test plan, or write a new one if none exists.

The existing plan may use an old format (keys like 'actions', 'selector', 'assert_visible').
Rewrite everything in the syntax below and never output the old format.

SYNTAX:
- Top level: 'meta' (with 'baseUrl') and 'scenarios'.
- Each scenario has 'name', 'path' and a 'tests' list.
- Step keys:
  - see: "Text"
  - click: "Text"
  - type: "Value"
    into: "Label or placeholder"
  - url: "/path"
  - network: "METHOD /api/path"
  - wait: 500
  - color: "red on Text"
  - background: "#fff on Text"
  - border-color: "blue on Text"

FILE TREE:
{tree}

CURRENT PAGE SOURCE:
{sources}

EXISTING PLAN:
{current}

EXAMPLE:
meta:
  baseUrl: "http://localhost:3000"
scenarios:
  - name: "Login Flow"
    path: "/login"
    tests:
      - see: "Welcome Back"
      - type: "user@test.com"
        into: "Email Address"
      - network: "POST /api/login"
      - click: "Sign In"
      - url: "/dashboard"

Output the FULL, VALID YAML document only.
Change only what the user instruction asks for (ignore if empty):
{instruction}"##,
        tree = context.file_tree,
        sources = context.source_context,
        current = current,
        instruction = context.instruction.as_deref().unwrap_or(""),
    )
}

/// [`Oracle`] backed by an OpenAI-compatible chat endpoint
#[derive(Debug, Clone, Default)]
pub struct HttpOracle {
    config: OracleConfig,
}

impl HttpOracle {
    pub fn new(config: OracleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    async fn ask(&self, prompt: String) -> OracleResult<String> {
        let config = self.config.clone();
        debug!("Oracle request: {} chars to {}", prompt.len(), config.endpoint);
        tokio::task::spawn_blocking(move || {
            complete_with_progress(&config, &prompt, |progress| {
                if let OracleProgress::Complete(chars) = progress {
                    debug!("Oracle reply: {} chars", chars);
                }
            })
        })
        .await
        .map_err(|e| OracleError::Io(std::io::Error::other(e)))?
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn repair_file(&self, context: &BuildRepairContext) -> OracleResult<String> {
        self.ask(build_fix_prompt(context)).await
    }

    async fn repair_files(&self, context: &TestRepairContext) -> OracleResult<String> {
        self.ask(build_repair_prompt(context)).await
    }

    async fn generate_plan(&self, context: &PlanContext) -> OracleResult<String> {
        self.ask(build_plan_prompt(context)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OracleConfig {
        OracleConfig {
            endpoint: "http://localhost:8080/v1/chat/completions".into(),
            model: "m".into(),
            api_key: None,
            max_tokens: 100,
            connection_timeout: 1,
            activity_timeout: 1,
        }
    }

    #[test]
    fn test_oracle_config_builder() {
        let config = config()
            .model("gemini")
            .max_tokens(200)
            .activity_timeout(30)
            .api_key(Some("k".into()));

        assert_eq!(config.endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(config.model, "gemini");
        assert_eq!(config.max_tokens, 200);
        assert_eq!(config.activity_timeout, 30);
        assert_eq!(config.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_request_body_is_text_only() {
        let body: serde_json::Value = serde_json::from_str(&request_body(&config(), "hi", true).unwrap()).unwrap();
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["stream"], true);
        let body: serde_json::Value = serde_json::from_str(&request_body(&config(), "hi", false).unwrap()).unwrap();
        assert!(body.get("stream").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_child_reaps_process() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        stop_child(&mut child);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_api_error_extraction() {
        assert_eq!(
            api_error(r#"{"error":{"message":"API key not valid"}}"#).as_deref(),
            Some("API key not valid")
        );
        assert_eq!(
            api_error(r#"[{"error":{"message":"quota"}}]"#).as_deref(),
            Some("quota")
        );
        assert_eq!(api_error("not json"), None);
    }

    #[test]
    fn test_prompts_carry_context() {
        let fix = build_fix_prompt(&BuildRepairContext {
            logs: "Module not found: 'left-pad'".into(),
            source: "import x from 'left-pad'".into(),
            manifest: "{}".into(),
        });
        assert!(fix.contains("left-pad"));

        let repair = build_repair_prompt(&TestRepairContext {
            failures: "1. [Home] see \"Hi\": Text \"Hi\" not found.".into(),
            plan: "scenarios: []".into(),
            source_context: String::new(),
            file_tree: "app/".into(),
            manifest: "{}".into(),
            instruction: None,
        });
        assert!(repair.contains("--- FILE: app/page.tsx ---"));
        assert!(repair.contains("Text \"Hi\" not found."));

        let plan = build_plan_prompt(&PlanContext {
            file_tree: String::new(),
            source_context: String::new(),
            current_plan: "  ".into(),
            instruction: Some("add a signup test".into()),
        });
        assert!(plan.contains("No existing plan."));
        assert!(plan.contains("  - background: \"#fff on Text\""));
        assert!(plan.ends_with("add a signup test"));
    }
}
