//! Playwright browser automation
//!
//! A small Node.js driver script owns the browser and speaks JSON lines over
//! stdin/stdout. Requests carry an `id` and an `op`; the driver answers with
//! `{id, ok, result | error}`. Page errors and console errors are pushed as
//! unsolicited `{event: "script_error"}` messages and land in the session's
//! [`ErrorLog`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::browser::{BrowserSession, Element, ErrorLog, SessionFactory};
use crate::error::{E2eError, E2eResult};

/// How long `close` waits for the driver before killing it
const DRIVER_EXIT_GRACE: Duration = Duration::from_secs(5);

const DRIVER_SCRIPT: &str = r#"
const readline = require('readline');
const send = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');
const text = (err) => String((err && err.message) || err);

let playwright;
try {
  playwright = require('playwright');
} catch (err) {
  send({ event: 'fatal', missing: true, message: text(err) });
  process.exit(3);
}

(async () => {
  let browser;
  try {
    browser = await playwright.chromium.launch({ headless: process.env.SHOPGUARD_HEADLESS !== '0' });
  } catch (err) {
    send({ event: 'fatal', missing: false, message: text(err) });
    process.exit(4);
  }
  const context = await browser.newContext({
    viewport: {
      width: parseInt(process.env.SHOPGUARD_VIEWPORT_WIDTH || '1920', 10),
      height: parseInt(process.env.SHOPGUARD_VIEWPORT_HEIGHT || '1080', 10),
    },
  });
  const page = await context.newPage();
  page.on('pageerror', (err) => send({ event: 'script_error', message: text(err) }));
  page.on('console', (msg) => {
    if (msg.type() === 'error') send({ event: 'script_error', message: msg.text() });
  });

  const handles = new Map();
  let nextHandle = 1;
  const lookup = (id) => {
    const el = handles.get(id);
    if (!el) throw new Error('stale element handle ' + id);
    return el;
  };
  const describe = async (el) => {
    const id = nextHandle++;
    handles.set(id, el);
    const info = await el.evaluate((node) => {
      const attributes = {};
      for (const a of node.attributes || []) attributes[a.name] = a.value;
      return {
        tag: node.tagName ? node.tagName.toLowerCase() : '',
        text: (node.innerText || node.textContent || '').trim().slice(0, 2000),
        value: 'value' in node && node.value != null ? String(node.value) : null,
        checked: !!node.checked,
        attributes,
      };
    });
    info.handle = id;
    info.visible = await el.isVisible();
    info.enabled = await el.isEnabled();
    return info;
  };

  const ops = {
    navigate: async (req) => {
      handles.clear();
      const resp = await page.goto(req.url, { waitUntil: 'domcontentloaded', timeout: req.timeout_ms });
      try { await page.waitForLoadState('networkidle', { timeout: 5000 }); } catch (_) {}
      return { status: resp ? resp.status() : null };
    },
    url: async () => page.url(),
    title: async () => page.title(),
    find: async (req) => {
      const root = req.within ? lookup(req.within) : page;
      const out = [];
      for (const el of await root.$$(req.selector)) out.push(await describe(el));
      return out;
    },
    click: async (req) => {
      await lookup(req.handle).click({ timeout: req.timeout_ms });
      return null;
    },
    fill: async (req) => {
      await lookup(req.handle).fill(req.value, { timeout: req.timeout_ms });
      return null;
    },
    evaluate: async (req) => {
      const value = await page.evaluate(req.script);
      return value === undefined ? null : value;
    },
    close: async () => null,
  };

  send({ event: 'ready' });
  const rl = readline.createInterface({ input: process.stdin });
  for await (const line of rl) {
    let req;
    try { req = JSON.parse(line); } catch (_) { continue; }
    try {
      const op = ops[req.op];
      if (!op) throw new Error('unknown op ' + req.op);
      send({ id: req.id, ok: true, result: await op(req) });
    } catch (err) {
      send({ id: req.id, ok: false, error: text(err) });
    }
    if (req.op === 'close') break;
  }
  try { await browser.close(); } catch (_) {}
  process.exit(0);
})();
"#;

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Directory holding `node_modules/playwright`, exported as NODE_PATH
    pub driver_dir: Option<PathBuf>,
    pub node_binary: PathBuf,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub startup_timeout: Duration,
    pub action_timeout: Duration,
    pub navigation_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            driver_dir: None,
            node_binary: PathBuf::from("node"),
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            startup_timeout: Duration::from_secs(60),
            action_timeout: Duration::from_secs(15),
            navigation_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum DriverEvent {
    Ready,
    ScriptError {
        message: String,
    },
    Fatal {
        message: String,
        #[serde(default)]
        missing: bool,
    },
}

#[derive(Debug)]
enum Inbound {
    Ready,
    Fatal { message: String, missing: bool },
    Reply(DriverReply),
}

/// One browser tab driven through the Node.js driver
pub struct PlaywrightSession {
    child: Child,
    stdin: ChildStdin,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    errors: ErrorLog,
    next_id: u64,
    config: PlaywrightConfig,
    closed: bool,
    _script_dir: tempfile::TempDir,
}

impl PlaywrightSession {
    /// Start the driver and wait until the browser is up
    pub async fn launch(config: PlaywrightConfig) -> E2eResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("shopguard-driver.js");
        std::fs::write(&script_path, DRIVER_SCRIPT)?;

        let mut cmd = Command::new(&config.node_binary);
        cmd.arg(&script_path)
            .env("SHOPGUARD_HEADLESS", if config.headless { "1" } else { "0" })
            .env("SHOPGUARD_VIEWPORT_WIDTH", config.viewport_width.to_string())
            .env("SHOPGUARD_VIEWPORT_HEIGHT", config.viewport_height.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.driver_dir {
            cmd.env("NODE_PATH", dir.join("node_modules"))
                .current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => E2eError::DriverNotFound,
            _ => E2eError::DriverStartup(format!(
                "failed to spawn {}: {}",
                config.node_binary.display(),
                e
            )),
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::DriverStartup("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::DriverStartup("driver stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[driver] {}", line);
                }
            });
        }

        let errors = ErrorLog::new();
        let (tx, inbound) = mpsc::unbounded_channel();
        tokio::spawn(read_driver_output(stdout, tx, errors.clone()));

        let mut session = Self {
            child,
            stdin,
            inbound,
            errors,
            next_id: 1,
            config,
            closed: false,
            _script_dir: script_dir,
        };
        session.wait_until_ready().await?;
        info!("Browser session started (headless: {})", session.config.headless);
        Ok(session)
    }

    async fn wait_until_ready(&mut self) -> E2eResult<()> {
        let deadline = tokio::time::Instant::now() + self.config.startup_timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.inbound.recv()).await {
                Err(_) => {
                    return Err(E2eError::DriverStartup(format!(
                        "browser not ready after {}s",
                        self.config.startup_timeout.as_secs()
                    )))
                }
                Ok(None) => {
                    return Err(E2eError::DriverStartup(
                        "driver exited during startup".to_string(),
                    ))
                }
                Ok(Some(Inbound::Ready)) => return Ok(()),
                Ok(Some(Inbound::Fatal { missing: true, .. })) => {
                    return Err(E2eError::DriverNotFound)
                }
                Ok(Some(Inbound::Fatal { message, .. })) => {
                    return Err(E2eError::DriverStartup(message))
                }
                Ok(Some(Inbound::Reply(_))) => {}
            }
        }
    }

    async fn request(&mut self, op: &str, mut payload: Value, timeout: Duration) -> E2eResult<Value> {
        if self.closed {
            return Err(E2eError::SessionClosed);
        }
        let id = self.next_id;
        self.next_id += 1;

        if let Value::Object(map) = &mut payload {
            map.insert("id".to_string(), json!(id));
            map.insert("op".to_string(), json!(op));
            map.insert("timeout_ms".to_string(), json!(timeout.as_millis() as u64));
        }
        let mut line = serde_json::to_string(&payload)?;
        line.push('\n');
        if self.stdin.write_all(line.as_bytes()).await.is_err() || self.stdin.flush().await.is_err()
        {
            return Err(E2eError::SessionClosed);
        }

        // Driver-side timeouts fire first; this only catches a hung driver.
        let deadline = tokio::time::Instant::now() + timeout + Duration::from_secs(5);
        loop {
            match tokio::time::timeout_at(deadline, self.inbound.recv()).await {
                Err(_) => return Err(E2eError::Timeout(format!("{} ({}ms)", op, timeout.as_millis()))),
                Ok(None) => return Err(E2eError::SessionClosed),
                Ok(Some(Inbound::Reply(reply))) if reply.id == id => {
                    return if reply.ok {
                        Ok(reply.result)
                    } else {
                        Err(E2eError::Driver(
                            reply.error.unwrap_or_else(|| format!("{} failed", op)),
                        ))
                    };
                }
                Ok(Some(Inbound::Fatal { message, .. })) => {
                    return Err(E2eError::Driver(message));
                }
                Ok(Some(_)) => {}
            }
        }
    }

    fn elements(value: Value) -> E2eResult<Vec<Element>> {
        if value.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(value)?)
    }
}

async fn read_driver_output(
    stdout: tokio::process::ChildStdout,
    tx: mpsc::UnboundedSender<Inbound>,
    errors: ErrorLog,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let value: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                debug!("[driver] {}", line);
                continue;
            }
        };
        let inbound = if value.get("event").is_some() {
            match serde_json::from_value::<DriverEvent>(value) {
                Ok(DriverEvent::ScriptError { message }) => {
                    debug!("Captured script error: {}", message);
                    errors.push(message);
                    continue;
                }
                Ok(DriverEvent::Ready) => Inbound::Ready,
                Ok(DriverEvent::Fatal { message, missing }) => Inbound::Fatal { message, missing },
                Err(e) => {
                    warn!("Unrecognized driver event: {}", e);
                    continue;
                }
            }
        } else {
            match serde_json::from_value::<DriverReply>(value) {
                Ok(reply) => Inbound::Reply(reply),
                Err(e) => {
                    warn!("Malformed driver reply: {}", e);
                    continue;
                }
            }
        };
        if tx.send(inbound).is_err() {
            break;
        }
    }
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn navigate(&mut self, url: &str) -> E2eResult<()> {
        let timeout = self.config.navigation_timeout;
        let result = self.request("navigate", json!({ "url": url }), timeout).await;
        match result {
            Ok(value) => {
                if let Some(status) = value.get("status").and_then(Value::as_u64) {
                    debug!("Navigated to {} ({})", url, status);
                }
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Err(E2eError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn current_url(&mut self) -> E2eResult<String> {
        let timeout = self.config.action_timeout;
        let value = self.request("url", json!({}), timeout).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn title(&mut self) -> E2eResult<String> {
        let timeout = self.config.action_timeout;
        let value = self.request("title", json!({}), timeout).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn find(&mut self, selector: &str) -> E2eResult<Vec<Element>> {
        let timeout = self.config.action_timeout;
        let value = self
            .request("find", json!({ "selector": selector }), timeout)
            .await?;
        Self::elements(value)
    }

    async fn find_within(&mut self, parent: &Element, selector: &str) -> E2eResult<Vec<Element>> {
        let timeout = self.config.action_timeout;
        let value = self
            .request(
                "find",
                json!({ "selector": selector, "within": parent.handle }),
                timeout,
            )
            .await?;
        Self::elements(value)
    }

    async fn click(&mut self, element: &Element) -> E2eResult<()> {
        let timeout = self.config.action_timeout;
        self.request("click", json!({ "handle": element.handle }), timeout)
            .await?;
        Ok(())
    }

    async fn fill(&mut self, element: &Element, value: &str) -> E2eResult<()> {
        let timeout = self.config.action_timeout;
        self.request(
            "fill",
            json!({ "handle": element.handle, "value": value }),
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> E2eResult<Value> {
        let timeout = self.config.action_timeout;
        self.request("evaluate", json!({ "script": script }), timeout)
            .await
    }

    async fn wait(&mut self, ms: u64) -> E2eResult<()> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }

    fn errors(&self) -> ErrorLog {
        self.errors.clone()
    }

    async fn close(&mut self) -> E2eResult<()> {
        if self.closed {
            return Ok(());
        }
        if let Err(e) = self
            .request("close", json!({}), Duration::from_secs(10))
            .await
        {
            debug!("Driver close request failed: {}", e);
        }
        self.closed = true;
        reap(&mut self.child, DRIVER_EXIT_GRACE).await;
        Ok(())
    }
}

/// Launches a fresh Playwright session per scenario
#[derive(Debug, Clone, Default)]
pub struct PlaywrightFactory {
    config: PlaywrightConfig,
}

impl PlaywrightFactory {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for PlaywrightFactory {
    async fn open(&self) -> E2eResult<Box<dyn BrowserSession>> {
        let session = PlaywrightSession::launch(self.config.clone()).await?;
        Ok(Box::new(session))
    }
}

/// Wait for the driver to exit, killing it after `grace`
async fn reap(child: &mut Child, grace: Duration) {
    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return;
    }
    warn!("Driver did not exit, killing it");
    if let Err(e) = child.kill().await {
        debug!("Failed to kill driver: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_reply_parsing() {
        let reply: DriverReply =
            serde_json::from_str(r#"{"id":4,"ok":false,"error":"Timeout 15000ms exceeded"}"#)
                .unwrap();
        assert_eq!(reply.id, 4);
        assert!(!reply.ok);
        assert!(reply.result.is_null());
    }

    #[test]
    fn test_driver_event_parsing() {
        let event: DriverEvent = serde_json::from_str(
            r#"{"event":"script_error","message":"ReferenceError: x is not defined"}"#,
        )
        .unwrap();
        assert!(matches!(event, DriverEvent::ScriptError { .. }));

        let event: DriverEvent =
            serde_json::from_str(r#"{"event":"fatal","missing":true,"message":"Cannot find module"}"#)
                .unwrap();
        assert!(matches!(event, DriverEvent::Fatal { missing: true, .. }));
    }

    #[test]
    fn test_element_snapshot_parsing() {
        let elements = PlaywrightSession::elements(json!([
            {"handle": 1, "tag": "button", "visible": true, "enabled": false,
             "checked": false, "text": "Add to cart", "value": null,
             "attributes": {"name": "add", "disabled": ""}}
        ]))
        .unwrap();
        assert_eq!(elements.len(), 1);
        assert!(!elements[0].is_actionable());
        assert_eq!(elements[0].attr("name"), Some("add"));
    }

    #[tokio::test]
    async fn test_reap_kills_a_driver_that_does_not_exit() {
        let mut child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        reap(&mut child, Duration::from_millis(100)).await;
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reap_leaves_an_exited_driver_alone() {
        let mut child = Command::new("true").spawn().unwrap();
        reap(&mut child, Duration::from_secs(5)).await;
        assert!(child.try_wait().unwrap().unwrap().success());
    }

    #[tokio::test]
    async fn test_missing_node_binary_is_driver_not_found() {
        let config = PlaywrightConfig {
            node_binary: PathBuf::from("/nonexistent/shopguard-node"),
            ..Default::default()
        };
        let err = PlaywrightSession::launch(config).await.err().unwrap();
        assert!(matches!(err, E2eError::DriverNotFound));
        assert!(err.is_fatal());
    }
}
