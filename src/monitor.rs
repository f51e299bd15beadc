// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! In-page execution monitor.
//!
//! The agent is a source-text blob installed as an init script so it runs in
//! every frame before document scripts. It writes a single state bag on the
//! window object; the host reads it with short evaluate queries and never
//! re-parses the blob. The state-bag shape is a versioned protocol between
//! the two sides.

use crate::browser::driver::PageHandle;
use crate::errors::ValidatorResult;
use crate::types::Severity;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Window property holding the state bag
pub const STATE_KEY: &str = "__pistin";

/// Sentinel returned from wrapped prompt() calls
pub const PROMPT_SENTINEL: &str = "pistin";

/// The monitor agent source. Idempotent per execution context.
pub const MONITOR_SOURCE: &str = r#"
(function() {
    if (window.__pistin) { return; }

    var bag = {
        dialogs: [],
        consoleCalls: [],
        scriptInjections: [],
        eventHandlerInjections: [],
        networkCalls: [],
        errors: [],
        cspViolations: [],
        reset: function() {
            bag.dialogs = [];
            bag.consoleCalls = [];
            bag.scriptInjections = [];
            bag.eventHandlerInjections = [];
            bag.networkCalls = [];
            bag.errors = [];
            bag.cspViolations = [];
        }
    };
    window.__pistin = bag;

    var dangerousAttrs = ['onload', 'onerror', 'onclick', 'onmouseover', 'onfocus', 'onblur'];

    function stackOf() {
        try { throw new Error(); } catch (e) { return String(e.stack || ''); }
    }

    // Dialog interception: record, then still invoke the originals so the
    // page behaves observably.
    var originalAlert = window.alert;
    var originalConfirm = window.confirm;
    var originalPrompt = window.prompt;

    window.alert = function(msg) {
        bag.dialogs.push({ kind: 'alert', message: String(msg), timestamp: performance.now(), stack: stackOf() });
        try { originalAlert.call(window, msg); } catch (e) {}
    };
    window.confirm = function(msg) {
        bag.dialogs.push({ kind: 'confirm', message: String(msg), timestamp: performance.now(), stack: stackOf() });
        try { originalConfirm.call(window, msg); } catch (e) {}
        return true;
    };
    window.prompt = function(msg, def) {
        bag.dialogs.push({ kind: 'prompt', message: String(msg), timestamp: performance.now(), stack: stackOf() });
        try { originalPrompt.call(window, msg, def); } catch (e) {}
        return 'pistin';
    };

    // console.log heuristics: only calls that look payload-driven
    var originalLog = console.log;
    console.log = function() {
        var args = Array.prototype.slice.call(arguments).map(String);
        var suspicious = args.some(function(a) { return /xss|alert|script/i.test(a); });
        if (suspicious) {
            bag.consoleCalls.push({ args: args, timestamp: performance.now() });
        }
        return originalLog.apply(console, arguments);
    };

    // DOM mutations: injected scripts and elements carrying dangerous
    // event-handler attributes.
    function inspectNode(node) {
        if (!node || node.nodeType !== 1) { return; }
        if (node.tagName === 'SCRIPT') {
            bag.scriptInjections.push({
                content: String(node.textContent || '').slice(0, 500),
                src: node.src || null,
                timestamp: performance.now()
            });
        }
        for (var i = 0; i < dangerousAttrs.length; i++) {
            var attr = dangerousAttrs[i];
            if (node.hasAttribute && node.hasAttribute(attr)) {
                bag.eventHandlerInjections.push({
                    tag: node.tagName.toLowerCase(),
                    attribute: attr,
                    value: String(node.getAttribute(attr)).slice(0, 200),
                    timestamp: performance.now()
                });
            }
        }
    }

    function startObserver() {
        var root = document.documentElement || document;
        var observer = new MutationObserver(function(mutations) {
            mutations.forEach(function(m) {
                if (m.type === 'childList') {
                    m.addedNodes.forEach(inspectNode);
                } else if (m.type === 'attributes') {
                    inspectNode(m.target);
                }
            });
        });
        observer.observe(root, {
            childList: true,
            subtree: true,
            attributes: true,
            attributeFilter: dangerousAttrs.concat(['src', 'href'])
        });
    }
    if (document.documentElement) {
        startObserver();
    } else {
        document.addEventListener('DOMContentLoaded', startObserver);
    }

    // Network egress
    var originalFetch = window.fetch;
    if (originalFetch) {
        window.fetch = function(input, init) {
            var target = String(input && input.url ? input.url : input);
            if (target !== 'about:blank') {
                bag.networkCalls.push({ url: target, method: (init && init.method) || 'GET', timestamp: performance.now() });
            }
            return originalFetch.apply(window, arguments);
        };
    }
    var originalOpen = XMLHttpRequest.prototype.open;
    XMLHttpRequest.prototype.open = function(method, target) {
        bag.networkCalls.push({ url: String(target), method: String(method), timestamp: performance.now() });
        return originalOpen.apply(this, arguments);
    };

    window.addEventListener('error', function(e) {
        bag.errors.push({
            message: String(e.message || ''),
            source: String(e.filename || ''),
            line: e.lineno || 0,
            col: e.colno || 0,
            stack: e.error && e.error.stack ? String(e.error.stack) : ''
        });
    });

    window.addEventListener('securitypolicyviolation', function(e) {
        bag.cspViolations.push({
            directive: String(e.violatedDirective || ''),
            blockedUri: String(e.blockedURI || ''),
            timestamp: performance.now()
        });
    });
})();
"#;

/// Clears the state bag between payloads
pub const RESET_EXPRESSION: &str =
    "(window.__pistin && window.__pistin.reset) ? (window.__pistin.reset(), true) : true";

/// Compact verdict read after the execution-verification wait
pub const VERDICT_EXPRESSION: &str = r#"(function() {
    var m = window.__pistin;
    if (!m) { return JSON.stringify({ executed: false, dialogs: 0, consoleCalls: 0, scriptInjections: 0, eventHandlerInjections: 0 }); }
    return JSON.stringify({
        executed: m.dialogs.length > 0 || m.consoleCalls.length > 0 || m.scriptInjections.length > 0 || m.eventHandlerInjections.length > 0,
        dialogs: m.dialogs.length,
        consoleCalls: m.consoleCalls.length,
        scriptInjections: m.scriptInjections.length,
        eventHandlerInjections: m.eventHandlerInjections.length
    });
})()"#;

/// Full state bag dump for the HTTP-API variant
pub const SNAPSHOT_EXPRESSION: &str =
    "window.__pistin ? JSON.stringify(window.__pistin) : JSON.stringify({})";

/// Aggregated booleans the orchestrator consumes per payload
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorVerdict {
    pub executed: bool,
    pub dialogs: usize,
    pub console_calls: usize,
    pub script_injections: usize,
    pub event_handler_injections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DialogRecord {
    pub kind: String,
    pub message: String,
    pub timestamp: f64,
    #[serde(default)]
    pub stack: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptInjection {
    pub content: String,
    pub src: Option<String>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EventHandlerInjection {
    pub tag: String,
    pub attribute: String,
    pub value: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkCall {
    pub url: String,
    pub method: String,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsoleCall {
    pub args: Vec<String>,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeError {
    pub message: String,
    pub source: String,
    pub line: u64,
    pub col: u64,
    #[serde(default)]
    pub stack: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CspViolation {
    pub directive: String,
    pub blocked_uri: String,
    pub timestamp: f64,
}

/// The whole state bag, used by the HTTP submission endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSnapshot {
    pub dialogs: Vec<DialogRecord>,
    pub console_calls: Vec<ConsoleCall>,
    pub script_injections: Vec<ScriptInjection>,
    pub event_handler_injections: Vec<EventHandlerInjection>,
    pub network_calls: Vec<NetworkCall>,
    pub errors: Vec<RuntimeError>,
    pub csp_violations: Vec<CspViolation>,
}

impl MonitorSnapshot {
    /// The verdict-contract predicate over the full bag
    pub fn executed(&self) -> bool {
        !self.dialogs.is_empty()
            || !self.console_calls.is_empty()
            || !self.script_injections.is_empty()
            || !self.event_handler_injections.is_empty()
    }

    pub fn has_dom_mutation(&self) -> bool {
        !self.script_injections.is_empty() || !self.event_handler_injections.is_empty()
    }

    /// Names of every detection method that fired (HTTP-API metadata)
    pub fn detection_methods(&self) -> Vec<String> {
        let mut methods = Vec::new();
        if !self.dialogs.is_empty() {
            methods.push("dialog".to_string());
        }
        if !self.console_calls.is_empty() {
            methods.push("console".to_string());
        }
        if !self.script_injections.is_empty() {
            methods.push("script-injection".to_string());
        }
        if !self.event_handler_injections.is_empty() {
            methods.push("event-handler-injection".to_string());
        }
        if self
            .network_calls
            .iter()
            .any(|call| call.url != "about:blank")
        {
            methods.push("network-egress".to_string());
        }
        if !self.csp_violations.is_empty() {
            methods.push("csp-violation".to_string());
        }
        methods
    }
}

/// Severity and clamped confidence for a single payload: the maximum across
/// all observed methods.
pub fn classify(reflected: bool, snapshot: &MonitorSnapshot) -> (Severity, f64) {
    let mut severity = Severity::Low;
    let mut confidence: f64 = 0.0;

    if reflected {
        severity = Severity::Low;
        confidence = confidence.max(0.6);
    }
    if snapshot.has_dom_mutation() {
        severity = Severity::Medium;
        confidence = confidence.max(0.8);
    }
    if snapshot.executed() {
        severity = Severity::High;
        confidence = confidence.max(0.95);
    }

    (severity, confidence.clamp(0.0, 1.0))
}

/// Host-side driver for the agent
#[derive(Debug, Default, Clone)]
pub struct ExecutionMonitor;

impl ExecutionMonitor {
    pub fn new() -> Self {
        Self
    }

    /// Install the agent for every future document load and into the
    /// current document.
    pub async fn install(&self, page: &Arc<dyn PageHandle>) -> ValidatorResult<()> {
        page.add_init_script(MONITOR_SOURCE).await?;
        page.evaluate(MONITOR_SOURCE).await?;
        debug!("Monitor agent installed");
        Ok(())
    }

    /// Re-evaluate into the current document (post-navigation belt for
    /// engines that drop init scripts on cross-document moves).
    pub async fn reinstall(&self, page: &Arc<dyn PageHandle>) -> ValidatorResult<()> {
        page.evaluate(MONITOR_SOURCE).await.map(|_| ())
    }

    pub async fn reset(&self, page: &Arc<dyn PageHandle>) -> ValidatorResult<()> {
        page.evaluate(RESET_EXPRESSION).await.map(|_| ())
    }

    pub async fn verdict(&self, page: &Arc<dyn PageHandle>) -> ValidatorResult<MonitorVerdict> {
        let raw = page.evaluate(VERDICT_EXPRESSION).await?;
        Ok(parse_embedded_json(&raw).unwrap_or_default())
    }

    pub async fn snapshot(&self, page: &Arc<dyn PageHandle>) -> ValidatorResult<MonitorSnapshot> {
        let raw = page.evaluate(SNAPSHOT_EXPRESSION).await?;
        Ok(parse_embedded_json(&raw).unwrap_or_default())
    }
}

/// Evaluate results arrive as a JSON string value; parse the embedded
/// document leniently.
fn parse_embedded_json<T: serde::de::DeserializeOwned>(value: &serde_json::Value) -> Option<T> {
    match value {
        serde_json::Value::String(raw) => serde_json::from_str(raw).ok(),
        other => serde_json::from_value(other.clone()).ok(),
    }
}
