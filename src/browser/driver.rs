// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Browser capability layer.
//!
//! The orchestrator only ever sees the `PageHandle`/`BrowserHandle` traits,
//! which keeps the CDP client in one place and makes test fakes viable. The
//! production implementation drives a headless browser over CDP; the
//! synchronous client runs on the blocking pool.

use crate::errors::{ValidatorError, ValidatorResult};
use crate::types::BrowserEngine;
use async_trait::async_trait;
use headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The page capability set the engine depends on. Every call carries an
/// explicit deadline; none may block indefinitely.
#[async_trait]
pub trait PageHandle: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> ValidatorResult<()>;

    /// Wait for an in-flight navigation to settle. Returns false on
    /// timeout, which is expected when a submission stays in-page.
    async fn wait_for_navigation(&self, timeout: Duration) -> ValidatorResult<bool>;

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> ValidatorResult<()>;
    async fn click(&self, selector: &str, timeout: Duration) -> ValidatorResult<()>;

    /// Focus `selector` and send a native key event
    async fn press(&self, selector: &str, key: &str, timeout: Duration) -> ValidatorResult<()>;

    async fn evaluate(&self, expression: &str) -> ValidatorResult<serde_json::Value>;
    async fn content(&self) -> ValidatorResult<String>;

    /// Install a script evaluated in every frame before document scripts run
    async fn add_init_script(&self, source: &str) -> ValidatorResult<()>;

    /// Replace the document with the given markup
    async fn set_content(&self, html: &str) -> ValidatorResult<()>;

    async fn cookies(&self) -> ValidatorResult<serde_json::Value>;
    async fn set_cookies(&self, cookies: serde_json::Value) -> ValidatorResult<()>;

    /// Cheap liveness probe for pool recycling
    async fn is_valid(&self) -> bool;

    async fn close(&self);
}

#[async_trait]
pub trait BrowserHandle: Send + Sync {
    fn engine(&self) -> BrowserEngine;
    async fn new_page(&self) -> ValidatorResult<Arc<dyn PageHandle>>;
    async fn close(&self);
}

/// Launches engines. Production is `CdpLauncher`; tests substitute fakes.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self, engine: BrowserEngine) -> ValidatorResult<Arc<dyn BrowserHandle>>;
}

/// Engine-specific launch flags. Headless, everything that adds RAM or GPU
/// overhead disabled, JS heap capped around 512 MiB.
fn launch_args() -> Vec<&'static OsStr> {
    [
        "--disable-extensions",
        "--mute-audio",
        "--disable-background-networking",
        "--disable-sync",
        "--disable-translate",
        "--disable-default-apps",
        "--disable-accelerated-2d-canvas",
        "--disable-gpu",
        "--no-zygote",
        "--no-first-run",
        "--js-flags=--max-old-space-size=512",
    ]
    .iter()
    .map(OsStr::new)
    .collect()
}

/// Locate a CDP-speaking executable for the engine. Chromium is resolved by
/// the client itself; Firefox must be on PATH; WebKit has no CDP build we
/// can drive.
fn resolve_executable(engine: BrowserEngine) -> ValidatorResult<Option<PathBuf>> {
    match engine {
        BrowserEngine::Chromium => Ok(None),
        BrowserEngine::Firefox => {
            for name in ["firefox", "firefox-esr"] {
                if let Some(path) = find_in_path(name) {
                    return Ok(Some(path));
                }
            }
            Err(ValidatorError::Environment {
                what: "Firefox executable not found".to_string(),
                remediation: "install Firefox (e.g. apt install firefox-esr) or use --browser chromium"
                    .to_string(),
            })
        }
        BrowserEngine::Webkit => Err(ValidatorError::Environment {
            what: "WebKit has no CDP-compatible build on this host".to_string(),
            remediation: "use --browser chromium or --browser firefox".to_string(),
        }),
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Production launcher backed by the CDP client
#[derive(Debug, Default, Clone)]
pub struct CdpLauncher;

impl CdpLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EngineLauncher for CdpLauncher {
    async fn launch(&self, engine: BrowserEngine) -> ValidatorResult<Arc<dyn BrowserHandle>> {
        let executable = resolve_executable(engine)?;

        let browser = tokio::task::spawn_blocking(move || {
            let options = LaunchOptions::default_builder()
                .headless(true)
                .sandbox(false)
                .args(launch_args())
                .path(executable)
                .idle_browser_timeout(Duration::from_secs(300))
                .build()
                .map_err(|e| ValidatorError::Browser(format!("launch options: {}", e)))?;

            Browser::new(options).map_err(|e| ValidatorError::Environment {
                what: format!("failed to launch {}: {}", engine, e),
                remediation: "install Chromium/Chrome (e.g. apt install chromium) and ensure it is on PATH"
                    .to_string(),
            })
        })
        .await
        .map_err(|e| ValidatorError::Browser(format!("launch task: {}", e)))??;

        debug!(engine = %engine, "Browser launched");
        Ok(Arc::new(CdpBrowser {
            engine,
            browser: Arc::new(browser),
        }))
    }
}

struct CdpBrowser {
    engine: BrowserEngine,
    browser: Arc<Browser>,
}

#[async_trait]
impl BrowserHandle for CdpBrowser {
    fn engine(&self) -> BrowserEngine {
        self.engine
    }

    async fn new_page(&self) -> ValidatorResult<Arc<dyn PageHandle>> {
        let browser = Arc::clone(&self.browser);
        let tab = tokio::task::spawn_blocking(move || {
            browser
                .new_tab()
                .map_err(|e| ValidatorError::Browser(format!("new tab: {}", e)))
        })
        .await
        .map_err(|e| ValidatorError::Browser(format!("new tab task: {}", e)))??;

        Ok(Arc::new(CdpPage { tab }))
    }

    async fn close(&self) {
        // The browser process is reaped when the last handle drops; nothing
        // to do beyond logging here.
        debug!(engine = %self.engine, "Browser handle closed");
    }
}

struct CdpPage {
    tab: Arc<Tab>,
}

/// Embed a Rust string as a JS string literal
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

impl CdpPage {
    async fn run_blocking<T, F>(&self, what: &'static str, f: F) -> ValidatorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Tab>) -> ValidatorResult<T> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || f(tab))
            .await
            .map_err(|e| ValidatorError::Browser(format!("{} task: {}", what, e)))?
    }

    async fn eval_bool(&self, expression: String, action: &'static str, selector: &str) -> ValidatorResult<()> {
        let found = self.evaluate(&expression).await?;
        if found.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(ValidatorError::Action {
                action,
                selector: selector.to_string(),
                reason: "element not found".to_string(),
            })
        }
    }
}

#[async_trait]
impl PageHandle for CdpPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> ValidatorResult<()> {
        let url = url.to_string();
        let navigated = self.run_blocking("navigate", move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url).map_err(|e| ValidatorError::Navigation {
                url: url.clone(),
                reason: e.to_string(),
            })?;
            tab.wait_until_navigated()
                .map_err(|e| ValidatorError::Navigation {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;
            Ok(())
        });

        match tokio::time::timeout(timeout + Duration::from_secs(1), navigated).await {
            Ok(result) => result,
            Err(_) => Err(ValidatorError::Timeout { duration: timeout }),
        }
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> ValidatorResult<bool> {
        let settled = self.run_blocking("wait_for_navigation", move |tab| {
            tab.set_default_timeout(timeout);
            Ok(tab.wait_until_navigated().is_ok())
        });

        match tokio::time::timeout(timeout + Duration::from_secs(1), settled).await {
            Ok(result) => result,
            // Post-submit timeout is an expected outcome, not an error
            Err(_) => Ok(false),
        }
    }

    async fn fill(&self, selector: &str, value: &str, timeout: Duration) -> ValidatorResult<()> {
        let expression = format!(
            r#"(function() {{
                const el = document.querySelector({selector});
                if (!el) return false;
                el.focus();
                el.value = {value};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            selector = js_string(selector),
            value = js_string(value),
        );

        match tokio::time::timeout(timeout, self.eval_bool(expression, "fill", selector)).await {
            Ok(result) => result,
            Err(_) => Err(ValidatorError::Timeout { duration: timeout }),
        }
    }

    async fn click(&self, selector: &str, timeout: Duration) -> ValidatorResult<()> {
        let expression = format!(
            r#"(function() {{
                const el = document.querySelector({selector});
                if (!el) return false;
                el.click();
                return true;
            }})()"#,
            selector = js_string(selector),
        );

        match tokio::time::timeout(timeout, self.eval_bool(expression, "click", selector)).await {
            Ok(result) => result,
            Err(_) => Err(ValidatorError::Timeout { duration: timeout }),
        }
    }

    async fn press(&self, selector: &str, key: &str, timeout: Duration) -> ValidatorResult<()> {
        let focus = format!(
            r#"(function() {{
                const el = document.querySelector({selector});
                if (!el) return false;
                el.focus();
                return true;
            }})()"#,
            selector = js_string(selector),
        );
        self.eval_bool(focus, "press", selector).await?;

        let key = key.to_string();
        let pressed = self.run_blocking("press", move |tab| {
            tab.press_key(&key)
                .map(|_| ())
                .map_err(|e| ValidatorError::Browser(format!("key press: {}", e)))
        });

        match tokio::time::timeout(timeout, pressed).await {
            Ok(result) => result,
            Err(_) => Err(ValidatorError::Timeout { duration: timeout }),
        }
    }

    async fn evaluate(&self, expression: &str) -> ValidatorResult<serde_json::Value> {
        let expression = expression.to_string();
        self.run_blocking("evaluate", move |tab| {
            let remote = tab.evaluate(&expression, false).map_err(|e| {
                let msg = e.to_string();
                if msg.contains("context") || msg.contains("destroyed") {
                    ValidatorError::PageGone(msg)
                } else {
                    ValidatorError::Browser(format!("evaluate: {}", msg))
                }
            })?;
            Ok(remote.value.unwrap_or(serde_json::Value::Null))
        })
        .await
    }

    async fn content(&self) -> ValidatorResult<String> {
        self.run_blocking("content", move |tab| {
            tab.get_content()
                .map_err(|e| ValidatorError::Browser(format!("content: {}", e)))
        })
        .await
    }

    async fn add_init_script(&self, source: &str) -> ValidatorResult<()> {
        let source = source.to_string();
        self.run_blocking("add_init_script", move |tab| {
            tab.call_method(AddScriptToEvaluateOnNewDocument {
                source,
                world_name: None,
                include_command_line_api: None,
                run_immediately: None,
            })
            .map(|_| ())
            .map_err(|e| ValidatorError::Browser(format!("init script: {}", e)))
        })
        .await
    }

    async fn set_content(&self, html: &str) -> ValidatorResult<()> {
        let expression = format!(
            r#"(function() {{
                document.open();
                document.write({html});
                document.close();
                return true;
            }})()"#,
            html = js_string(html),
        );
        self.evaluate(&expression).await.map(|_| ())
    }

    async fn cookies(&self) -> ValidatorResult<serde_json::Value> {
        self.run_blocking("cookies", move |tab| {
            let cookies = tab
                .get_cookies()
                .map_err(|e| ValidatorError::Browser(format!("cookies: {}", e)))?;
            // protocol types serialize to their camelCase wire form, which
            // is exactly the snapshot format CookieParam deserializes from
            serde_json::to_value(&cookies)
                .map_err(|e| ValidatorError::Store(format!("cookie snapshot: {}", e)))
        })
        .await
    }

    async fn set_cookies(&self, cookies: serde_json::Value) -> ValidatorResult<()> {
        let params: Vec<headless_chrome::protocol::cdp::Network::CookieParam> =
            serde_json::from_value(cookies)
                .map_err(|e| ValidatorError::Store(format!("cookie snapshot: {}", e)))?;

        self.run_blocking("set_cookies", move |tab| {
            tab.set_cookies(params)
                .map_err(|e| ValidatorError::Browser(format!("set cookies: {}", e)))
        })
        .await
    }

    async fn is_valid(&self) -> bool {
        matches!(
            self.evaluate("1 + 1").await,
            Ok(serde_json::Value::Number(n)) if n.as_i64() == Some(2)
        )
    }

    async fn close(&self) {
        let tab = Arc::clone(&self.tab);
        let closed = tokio::task::spawn_blocking(move || tab.close(false)).await;
        if let Err(e) = closed {
            warn!(error = %e, "Tab close task failed");
        }
    }
}
