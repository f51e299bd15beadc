// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Form discovery: drives a page once and extracts testable inputs with a
//! single in-page walk. Output is the `{url, selector, submitSelector}`
//! contract the orchestrator consumes.

use crate::browser::driver::{EngineLauncher, PageHandle};
use crate::errors::ValidatorResult;
use crate::types::{BrowserEngine, DiscoveredTarget};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub browser: BrowserEngine,
    pub navigation_timeout: Duration,
    pub max_targets: usize,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            browser: BrowserEngine::Chromium,
            navigation_timeout: Duration::from_secs(30),
            max_targets: 50,
        }
    }
}

const EXTRACT_FORMS: &str = r#"(function() {
    const targets = [];
    document.querySelectorAll('form').forEach(function(form) {
        const submitEl = form.querySelector('[type="submit"], button:not([type="button"])');
        let submitSelector = null;
        if (submitEl) {
            if (submitEl.id) { submitSelector = '#' + submitEl.id; }
            else if (submitEl.name) { submitSelector = '[name="' + submitEl.name + '"]'; }
            else { submitSelector = '[type="submit"]'; }
        }
        form.querySelectorAll('input:not([type=hidden]):not([type=submit]):not([type=button]):not([type=checkbox]):not([type=radio]):not([type=file]), textarea').forEach(function(el) {
            let selector = null;
            if (el.id) { selector = '#' + el.id; }
            else if (el.name) { selector = el.tagName.toLowerCase() + '[name="' + el.name + '"]'; }
            if (selector) {
                targets.push({ selector: selector, submitSelector: submitSelector });
            }
        });
    });
    // inputs outside any form are still injectable
    document.querySelectorAll('input:not([type=hidden]):not([type=submit]):not([type=button]):not([type=checkbox]):not([type=radio]):not([type=file])').forEach(function(el) {
        if (el.closest('form')) { return; }
        let selector = null;
        if (el.id) { selector = '#' + el.id; }
        else if (el.name) { selector = 'input[name="' + el.name + '"]'; }
        if (selector) {
            targets.push({ selector: selector, submitSelector: null });
        }
    });
    return JSON.stringify(targets);
})()"#;

/// Navigate once and enumerate testable inputs
pub async fn discover_targets(
    launcher: &Arc<dyn EngineLauncher>,
    url: &str,
    options: &CrawlOptions,
) -> ValidatorResult<Vec<DiscoveredTarget>> {
    let browser = launcher.launch(options.browser).await?;
    let page = browser.new_page().await?;

    let outcome = discover_on_page(&page, url, options).await;

    page.close().await;
    browser.close().await;
    outcome
}

async fn discover_on_page(
    page: &Arc<dyn PageHandle>,
    url: &str,
    options: &CrawlOptions,
) -> ValidatorResult<Vec<DiscoveredTarget>> {
    page.navigate(url, options.navigation_timeout).await?;

    let raw = page.evaluate(EXTRACT_FORMS).await?;
    let parsed: Vec<serde_json::Value> = match raw {
        serde_json::Value::String(text) => serde_json::from_str(&text).unwrap_or_default(),
        other => serde_json::from_value(other).unwrap_or_default(),
    };

    let mut targets = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for entry in parsed {
        let Some(selector) = entry.get("selector").and_then(|v| v.as_str()) else {
            continue;
        };
        if !seen.insert(selector.to_string()) {
            continue;
        }
        targets.push(DiscoveredTarget {
            url: url.to_string(),
            selector: selector.to_string(),
            submit_selector: entry
                .get("submitSelector")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        });
        if targets.len() >= options.max_targets {
            debug!(max = options.max_targets, "Target cap reached");
            break;
        }
    }

    info!(url = url, discovered = targets.len(), "Form discovery complete");
    Ok(targets)
}
