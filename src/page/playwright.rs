//! Chromium page driven through a long-lived Node + Playwright bridge.
//!
//! The bridge is a small driver script run with `node -e` inside the project
//! directory, so `require('playwright')` resolves against the project's own
//! `node_modules`. Requests and replies are JSON objects, one per line:
//!
//! ```text
//! -> {"id":3,"op":"click","text":"Sign In","timeout":5000}
//! <- {"id":3,"ok":true,"value":null}
//! <- {"event":"response","id":2,"ok":true}
//! ```
//!
//! Response listeners are acknowledged immediately and resolved later by a
//! `response` event carrying the listener's request id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{NetworkExpectation, Page, PageError, PageResult, ResponseWait, StyleProperty};

const DEFAULT_SLOW_MO_MS: u64 = 50;
const DEFAULT_VIEWPORT: (u32, u32) = (1280, 720);
const DEFAULT_USER_AGENT: &str = "BotIntern-Vibe-Check/1.0";
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);
/// Margin on top of the driver-side timeout before the Rust side gives up
const REPLY_GRACE: Duration = Duration::from_secs(5);

const DRIVER_SCRIPT: &str = r#"
const readline = require('readline');
const { chromium } = require('playwright');
const cfg = JSON.parse(process.env.BOTINTERN_PAGE_CONFIG || '{}');
const send = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');
let browser, page;

const ops = {
  goto: (m) => page.goto(m.url, { waitUntil: 'networkidle', timeout: m.timeout }).then(() => null),
  isTextVisible: (m) => page.getByText(m.text).first().isVisible(),
  waitForSelector: (m) => page.waitForSelector(m.selector, { state: 'visible', timeout: m.timeout }).then(() => null),
  selectorText: async (m) => {
    const el = await page.waitForSelector(m.selector, { timeout: m.timeout });
    return (await el.textContent()) || '';
  },
  clickText: (m) => page.click(`text=${m.text}`, { timeout: m.timeout }).then(() => null),
  countByLabel: (m) => page.getByLabel(m.label).count(),
  fillByLabel: (m) => page.getByLabel(m.label).fill(m.value).then(() => null),
  countByPlaceholder: (m) => page.getByPlaceholder(m.placeholder).count(),
  fillByPlaceholder: (m) => page.getByPlaceholder(m.placeholder).fill(m.value).then(() => null),
  fillSelector: (m) => page.fill(m.selector, m.value).then(() => null),
  waitForUrl: (m) => page.waitForURL(`**${m.fragment}**`, { timeout: m.timeout }).then(() => null),
  computedStyle: (m) => page.getByText(m.text).first()
    .evaluate((el, prop) => window.getComputedStyle(el)[prop], m.property),
  waitMs: (m) => page.waitForTimeout(m.ms).then(() => null),
  listen: (m) => {
    page.waitForResponse((res) =>
      res.url().includes(m.urlPart) &&
      res.request().method() === m.method &&
      res.status() === m.status, { timeout: m.timeout })
      .then(() => send({ event: 'response', id: m.id, ok: true }),
            (e) => send({ event: 'response', id: m.id, ok: false, error: e.message }));
    return Promise.resolve(null);
  },
  close: async () => { await browser.close(); return null; },
};

(async () => {
  try {
    browser = await chromium.launch({ headless: cfg.headless, slowMo: cfg.slowMo, args: ['--no-sandbox'] });
    const context = await browser.newContext({
      viewport: { width: cfg.width, height: cfg.height },
      userAgent: cfg.userAgent,
    });
    page = await context.newPage();
    send({ event: 'ready', ok: true });
  } catch (e) {
    send({ event: 'ready', ok: false, error: e.message });
    process.exit(1);
  }
  const rl = readline.createInterface({ input: process.stdin });
  rl.on('line', (line) => {
    let m;
    try { m = JSON.parse(line); } catch (e) { return; }
    const op = ops[m.op];
    if (!op) { send({ id: m.id, ok: false, error: `unknown op ${m.op}` }); return; }
    op(m).then((value) => send({ id: m.id, ok: true, value: value === undefined ? null : value }),
               (e) => send({ id: m.id, ok: false, error: e.message }));
  });
  rl.on('close', () => browser.close().finally(() => process.exit(0)));
})();
"#;

/// Launch settings for [`PlaywrightPage`]
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Run without a visible window
    pub headless: bool,
    /// Delay between browser operations in milliseconds
    pub slow_mo_ms: u64,
    /// Viewport width in pixels
    pub viewport_width: u32,
    /// Viewport height in pixels
    pub viewport_height: u32,
    /// User agent sent with every request
    pub user_agent: String,
    /// Directory the bridge runs in (must see `node_modules/playwright`)
    pub project_dir: PathBuf,
    /// Run `npx playwright install chromium` once if the browser is missing
    pub auto_install: bool,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            headless: true,
            slow_mo_ms: DEFAULT_SLOW_MO_MS,
            viewport_width: DEFAULT_VIEWPORT.0,
            viewport_height: DEFAULT_VIEWPORT.1,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            project_dir: PathBuf::from("."),
            auto_install: true,
        }
    }
}

impl PlaywrightConfig {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            ..Default::default()
        }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn slow_mo(mut self, ms: u64) -> Self {
        self.slow_mo_ms = ms;
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport_width = width;
        self.viewport_height = height;
        self
    }

    pub fn auto_install(mut self, enabled: bool) -> Self {
        self.auto_install = enabled;
        self
    }

    fn driver_env(&self) -> String {
        json!({
            "headless": self.headless,
            "slowMo": self.slow_mo_ms,
            "width": self.viewport_width,
            "height": self.viewport_height,
            "userAgent": self.user_agent,
        })
        .to_string()
    }
}

/// One line from the bridge
#[derive(Debug, Deserialize, Serialize)]
struct Reply {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

impl Reply {
    fn into_result(self) -> PageResult<Value> {
        if self.ok {
            Ok(self.value)
        } else {
            Err(classify_error(self.error.unwrap_or_default()))
        }
    }
}

type ReplyMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Playwright's timeout errors read "Timeout 5000ms exceeded"; keep them distinct
fn classify_error(message: String) -> PageError {
    if message.contains("Timeout") && message.contains("exceeded") {
        PageError::Timeout(message)
    } else {
        PageError::Backend(message)
    }
}

fn take_sender(map: &ReplyMap, id: u64) -> Option<oneshot::Sender<Reply>> {
    map.lock().unwrap_or_else(|e| e.into_inner()).remove(&id)
}

fn insert_sender(map: &ReplyMap, id: u64, tx: oneshot::Sender<Reply>) {
    map.lock().unwrap_or_else(|e| e.into_inner()).insert(id, tx);
}

/// [`Page`] backed by headless Chromium
pub struct PlaywrightPage {
    child: Child,
    stdin: ChildStdin,
    replies: ReplyMap,
    listeners: ReplyMap,
    reader: JoinHandle<()>,
    next_id: u64,
}

impl PlaywrightPage {
    /// Start the bridge and wait until the browser is ready.
    ///
    /// If Chromium is not installed and `auto_install` is set, installs it
    /// once and retries.
    pub async fn launch(config: PlaywrightConfig) -> PageResult<Self> {
        match Self::spawn(&config).await {
            Err(PageError::Backend(message)) if config.auto_install && is_missing_browser(&message) => {
                info!("Chromium not installed, running `npx playwright install chromium`");
                let status = Command::new("npx")
                    .args(["playwright", "install", "chromium"])
                    .current_dir(&config.project_dir)
                    .status()
                    .await?;
                if !status.success() {
                    return Err(PageError::Backend(format!(
                        "browser install failed with {}",
                        status
                    )));
                }
                Self::spawn(&config).await
            }
            other => other,
        }
    }

    async fn spawn(config: &PlaywrightConfig) -> PageResult<Self> {
        debug!("Starting Playwright bridge in {}", config.project_dir.display());
        let mut child = Command::new("node")
            .arg("-e")
            .arg(DRIVER_SCRIPT)
            .env("BOTINTERN_PAGE_CONFIG", config.driver_env())
            .current_dir(&config.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PageError::Backend("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PageError::Backend("bridge stdout unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let ready = tokio::time::timeout(LAUNCH_TIMEOUT, lines.next_line())
            .await
            .map_err(|_| PageError::Timeout("waiting for the browser to launch".to_string()))??;
        let ready: Reply = match ready {
            Some(line) => serde_json::from_str(&line)
                .map_err(|e| PageError::Backend(format!("bad bridge handshake: {}", e)))?,
            None => {
                return Err(PageError::Backend(
                    "bridge exited before the browser launched (is playwright installed?)".to_string(),
                ));
            }
        };
        if !ready.ok {
            return Err(PageError::Backend(ready.error.unwrap_or_default()));
        }
        info!(
            "Chromium ready ({}x{}, headless={})",
            config.viewport_width, config.viewport_height, config.headless
        );

        let replies: ReplyMap = Arc::new(Mutex::new(HashMap::new()));
        let listeners: ReplyMap = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_replies(lines, replies.clone(), listeners.clone()));

        Ok(Self {
            child,
            stdin,
            replies,
            listeners,
            reader,
            next_id: 1,
        })
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn send(&mut self, id: u64, mut message: Value) -> PageResult<()> {
        message["id"] = json!(id);
        let mut line = message.to_string();
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Send a request and wait for its reply
    async fn call(&mut self, message: Value, timeout: Duration) -> PageResult<Value> {
        let id = self.allocate_id();
        let (tx, rx) = oneshot::channel();
        insert_sender(&self.replies, id, tx);
        if let Err(e) = self.send(id, message).await {
            take_sender(&self.replies, id);
            return Err(e);
        }
        match tokio::time::timeout(timeout + REPLY_GRACE, rx).await {
            Ok(Ok(reply)) => reply.into_result(),
            Ok(Err(_)) => Err(PageError::Backend("browser bridge exited".to_string())),
            Err(_) => {
                take_sender(&self.replies, id);
                Err(PageError::Timeout(format!("waiting for browser reply to request {}", id)))
            }
        }
    }

    async fn call_unit(&mut self, message: Value, timeout: Duration) -> PageResult<()> {
        self.call(message, timeout).await.map(|_| ())
    }
}

fn is_missing_browser(message: &str) -> bool {
    message.contains("Executable doesn't exist") || message.contains("not found")
}

async fn read_replies(mut lines: Lines<BufReader<ChildStdout>>, replies: ReplyMap, listeners: ReplyMap) {
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Browser bridge read failed: {}", e);
                break;
            }
        };
        let reply: Reply = match serde_json::from_str(&line) {
            Ok(reply) => reply,
            Err(_) => {
                debug!("bridge: {}", line);
                continue;
            }
        };
        let Some(id) = reply.id else { continue };
        let target = if reply.event.as_deref() == Some("response") {
            &listeners
        } else {
            &replies
        };
        if let Some(tx) = take_sender(target, id) {
            let _ = tx.send(reply);
        }
    }
    // Dropping the senders wakes every waiter with a closed-channel error.
    replies.lock().unwrap_or_else(|e| e.into_inner()).clear();
    listeners.lock().unwrap_or_else(|e| e.into_inner()).clear();
}

fn as_bool(value: Value) -> PageResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| PageError::Backend(format!("expected boolean, got {}", value)))
}

fn as_count(value: Value) -> PageResult<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| PageError::Backend(format!("expected count, got {}", value)))
}

fn as_string(value: Value) -> PageResult<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Null => Ok(String::new()),
        other => Err(PageError::Backend(format!("expected string, got {}", other))),
    }
}

fn millis(timeout: Duration) -> u64 {
    timeout.as_millis() as u64
}

/// Locator queries without their own timeout still wait on the bridge
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
impl Page for PlaywrightPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> PageResult<()> {
        self.call(json!({"op": "goto", "url": url, "timeout": millis(timeout)}), timeout)
            .await
            .map(|_| ())
            .map_err(|e| PageError::Navigation(e.to_string()))
    }

    async fn is_text_visible(&mut self, text: &str) -> PageResult<bool> {
        as_bool(self.call(json!({"op": "isTextVisible", "text": text}), QUERY_TIMEOUT).await?)
    }

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> PageResult<()> {
        self.call_unit(
            json!({"op": "waitForSelector", "selector": selector, "timeout": millis(timeout)}),
            timeout,
        )
        .await
    }

    async fn selector_text(&mut self, selector: &str, timeout: Duration) -> PageResult<String> {
        as_string(
            self.call(
                json!({"op": "selectorText", "selector": selector, "timeout": millis(timeout)}),
                timeout,
            )
            .await?,
        )
    }

    async fn click_text(&mut self, text: &str, timeout: Duration) -> PageResult<()> {
        self.call_unit(
            json!({"op": "clickText", "text": text, "timeout": millis(timeout)}),
            timeout,
        )
        .await
    }

    async fn count_by_label(&mut self, label: &str) -> PageResult<usize> {
        as_count(self.call(json!({"op": "countByLabel", "label": label}), QUERY_TIMEOUT).await?)
    }

    async fn fill_by_label(&mut self, label: &str, value: &str) -> PageResult<()> {
        self.call_unit(
            json!({"op": "fillByLabel", "label": label, "value": value}),
            QUERY_TIMEOUT,
        )
        .await
    }

    async fn count_by_placeholder(&mut self, placeholder: &str) -> PageResult<usize> {
        as_count(
            self.call(
                json!({"op": "countByPlaceholder", "placeholder": placeholder}),
                QUERY_TIMEOUT,
            )
            .await?,
        )
    }

    async fn fill_by_placeholder(&mut self, placeholder: &str, value: &str) -> PageResult<()> {
        self.call_unit(
            json!({"op": "fillByPlaceholder", "placeholder": placeholder, "value": value}),
            QUERY_TIMEOUT,
        )
        .await
    }

    async fn fill_selector(&mut self, selector: &str, value: &str) -> PageResult<()> {
        self.call_unit(
            json!({"op": "fillSelector", "selector": selector, "value": value}),
            QUERY_TIMEOUT,
        )
        .await
    }

    async fn wait_for_url(&mut self, fragment: &str, timeout: Duration) -> PageResult<()> {
        self.call_unit(
            json!({"op": "waitForUrl", "fragment": fragment, "timeout": millis(timeout)}),
            timeout,
        )
        .await
    }

    async fn computed_style(&mut self, text: &str, property: StyleProperty) -> PageResult<String> {
        as_string(
            self.call(
                json!({"op": "computedStyle", "text": text, "property": property.js_name()}),
                QUERY_TIMEOUT,
            )
            .await?,
        )
    }

    async fn expect_response(
        &mut self,
        expectation: NetworkExpectation,
        timeout: Duration,
    ) -> PageResult<ResponseWait> {
        let id = self.allocate_id();
        let (event_tx, event_rx) = oneshot::channel();
        insert_sender(&self.listeners, id, event_tx);

        // The ack arrives only after the driver has armed `waitForResponse`.
        let (ack_tx, ack_rx) = oneshot::channel();
        insert_sender(&self.replies, id, ack_tx);
        let request = json!({
            "op": "listen",
            "method": expectation.method,
            "urlPart": expectation.url_part,
            "status": expectation.status,
            "timeout": millis(timeout),
        });
        if let Err(e) = self.send(id, request).await {
            take_sender(&self.replies, id);
            take_sender(&self.listeners, id);
            return Err(e);
        }
        match tokio::time::timeout(QUERY_TIMEOUT, ack_rx).await {
            Ok(Ok(reply)) => {
                reply.into_result()?;
            }
            _ => {
                take_sender(&self.listeners, id);
                return Err(PageError::Backend(format!("listener for {} was not armed", expectation)));
            }
        }

        let label = expectation.to_string();
        Ok(Box::pin(async move {
            match tokio::time::timeout(timeout + REPLY_GRACE, event_rx).await {
                Ok(Ok(reply)) => reply
                    .into_result()
                    .map(|_| ())
                    .map_err(|e| match e {
                        PageError::Timeout(_) => PageError::Timeout(format!("waiting for response {}", label)),
                        other => other,
                    }),
                Ok(Err(_)) => Err(PageError::Backend("browser bridge exited".to_string())),
                Err(_) => Err(PageError::Timeout(format!("waiting for response {}", label))),
            }
        }))
    }

    async fn wait(&mut self, ms: u64) -> PageResult<()> {
        self.call_unit(
            json!({"op": "waitMs", "ms": ms}),
            Duration::from_millis(ms),
        )
        .await
    }

    async fn close(&mut self) -> PageResult<()> {
        if let Err(e) = self.call_unit(json!({"op": "close"}), QUERY_TIMEOUT).await {
            warn!("Browser close failed: {}", e);
        }
        let _ = self.child.kill().await;
        self.reader.abort();
        Ok(())
    }

    fn source_type(&self) -> &str {
        "playwright"
    }
}
