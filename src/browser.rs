//! Headless browser capability for functional checks.
//!
//! Sessions are opened lazily by the check runner, reused for every check of
//! one submission and closed before the runner returns.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Document state and completed resource count, polled to detect network idle.
pub const NETWORK_SNAPSHOT: &str =
    "[document.readyState, performance.getEntriesByType('resource').length]";

/// How long the snapshot must stay unchanged before the page counts as idle.
pub const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An open page in a browser.
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate and wait for the load event, failing after `timeout`.
    async fn goto(&mut self, url: &str, timeout: Duration) -> anyhow::Result<()>;

    /// Evaluate a JavaScript expression against the current page.
    /// A thrown exception is an error.
    async fn evaluate(&mut self, expression: &str) -> anyhow::Result<Value>;

    /// Wait until the document is complete and no new resource has finished
    /// loading for [`NETWORK_IDLE_WINDOW`]. Fails if that never happens
    /// within `timeout`.
    async fn wait_for_network_idle(&mut self, timeout: Duration) -> anyhow::Result<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut last = self.evaluate(NETWORK_SNAPSHOT).await?;
        let mut quiet_since = started;

        loop {
            let now = Instant::now();
            let complete = last.get(0).and_then(Value::as_str) == Some("complete");
            if complete && now.duration_since(quiet_since) >= NETWORK_IDLE_WINDOW {
                tracing::debug!(waited = ?now.duration_since(started), "Network idle");
                return Ok(());
            }
            if now >= deadline {
                anyhow::bail!("Network not idle after {:?} (last snapshot {})", timeout, last);
            }

            tokio::time::sleep(IDLE_POLL_INTERVAL.min(deadline - now)).await;
            let snapshot = self.evaluate(NETWORK_SNAPSHOT).await?;
            if snapshot != last {
                last = snapshot;
                quiet_since = Instant::now();
            }
        }
    }

    /// Release the page and anything launched for it.
    async fn close(self: Box<Self>);
}

/// Opens browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open(&self) -> anyhow::Result<Box<dyn BrowserSession>>;
}

/// Chromium over the DevTools protocol.
///
/// Connects to `cdp_url` when set (`google-chrome --remote-debugging-port=9222`),
/// otherwise launches a headless Chromium.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher {
    cdp_url: Option<String>,
}

impl ChromiumLauncher {
    pub fn new(cdp_url: Option<String>) -> Self {
        Self { cdp_url }
    }
}

struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    /// Launched by us, so closing the session shuts the browser down
    owned: bool,
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn open(&self) -> anyhow::Result<Box<dyn BrowserSession>> {
        let (browser, mut handler, owned) = match &self.cdp_url {
            Some(cdp_url) => {
                let (browser, handler) = Browser::connect(cdp_url).await.map_err(|e| {
                    anyhow::anyhow!("Failed to connect to Chrome at {}: {}", cdp_url, e)
                })?;
                (browser, handler, false)
            }
            None => {
                let config = BrowserConfig::builder()
                    .no_sandbox()
                    .build()
                    .map_err(|e| anyhow::anyhow!("Invalid browser config: {}", e))?;
                let (browser, handler) = Browser::launch(config)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to launch Chromium: {}", e))?;
                (browser, handler, true)
            }
        };

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("Browser event error: {}", e);
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(anyhow::anyhow!("Failed to open page: {}", e));
            }
        };

        tracing::debug!(owned, "Opened browser session");
        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler,
            owned,
        }))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&mut self, url: &str, timeout: Duration) -> anyhow::Result<()> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(anyhow::anyhow!("Navigation to {} failed: {}", url, e)),
            Err(_) => Err(anyhow::anyhow!(
                "Navigation to {} timed out after {:?}",
                url,
                timeout
            )),
        }
    }

    async fn evaluate(&mut self, expression: &str) -> anyhow::Result<Value> {
        let result = self.page.evaluate(expression).await?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn close(self: Box<Self>) {
        let ChromiumSession {
            mut browser,
            page,
            handler,
            owned,
        } = *self;

        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close page: {}", e);
        }
        if owned {
            if let Err(e) = browser.close().await {
                tracing::warn!("Failed to close browser: {}", e);
            }
            browser.wait().await.ok();
        }
        handler.abort();
        tracing::debug!("Closed browser session");
    }
}

/// JavaScript truthiness of an evaluation result.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
