// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Browser engine driving a detection job. Also the namespace key for
/// payload compatibility filtering and effectiveness scoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrowserEngine {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserEngine::Chromium => "chromium",
            BrowserEngine::Firefox => "firefox",
            BrowserEngine::Webkit => "webkit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "chromium" | "chrome" => Some(BrowserEngine::Chromium),
            "firefox" => Some(BrowserEngine::Firefox),
            "webkit" => Some(BrowserEngine::Webkit),
            _ => None,
        }
    }

    pub fn all() -> [BrowserEngine; 3] {
        [
            BrowserEngine::Chromium,
            BrowserEngine::Firefox,
            BrowserEngine::Webkit,
        ]
    }
}

impl std::fmt::Display for BrowserEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of testing one payload against one input field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub payload: String,
    pub reflected: bool,
    pub executed: bool,
    pub url: String,
    pub tested_at: String,
    #[serde(default)]
    pub from_cache: bool,
}

/// A named, described group of payloads carrying a compatibility set.
/// Categorized corpora are always arrays of these records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PayloadCategory {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "all_engines")]
    pub compatibility: Vec<BrowserEngine>,
    pub payloads: Vec<String>,
}

fn all_engines() -> Vec<BrowserEngine> {
    BrowserEngine::all().to_vec()
}

impl PayloadCategory {
    pub fn supports(&self, engine: BrowserEngine) -> bool {
        self.compatibility.contains(&engine)
    }

    /// Category is exclusive to one engine (used for engine-specific quirks)
    pub fn is_exclusive_to(&self, engine: BrowserEngine) -> bool {
        self.compatibility.len() == 1 && self.compatibility[0] == engine
    }
}

/// Payload input forms accepted by the orchestrator
#[derive(Debug, Clone)]
pub enum PayloadSet {
    /// Flat list used verbatim
    Flat(Vec<String>),
    /// Array of category records, filtered by engine compatibility
    Categorized(Vec<PayloadCategory>),
}

/// Injection context detected for an input field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InjectionContext {
    Html,
    Attribute,
    Js,
    Url,
    Css,
}

impl InjectionContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            InjectionContext::Html => "html",
            InjectionContext::Attribute => "attribute",
            InjectionContext::Js => "js",
            InjectionContext::Url => "url",
            InjectionContext::Css => "css",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "html" => Some(InjectionContext::Html),
            "attribute" => Some(InjectionContext::Attribute),
            "js" | "javascript" => Some(InjectionContext::Js),
            "url" => Some(InjectionContext::Url),
            "css" => Some(InjectionContext::Css),
            _ => None,
        }
    }
}

impl std::fmt::Display for InjectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an attribute-context injection point is delimited
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeKind {
    Unquoted,
    SingleQuoted,
    DoubleQuoted,
    EventHandler,
}

impl AttributeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Unquoted => "unquoted",
            AttributeKind::SingleQuoted => "single-quoted",
            AttributeKind::DoubleQuoted => "double-quoted",
            AttributeKind::EventHandler => "event-handler",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unquoted" => Some(AttributeKind::Unquoted),
            "single-quoted" | "single" => Some(AttributeKind::SingleQuoted),
            "double-quoted" | "double" => Some(AttributeKind::DoubleQuoted),
            "event-handler" | "event" => Some(AttributeKind::EventHandler),
            _ => None,
        }
    }
}

/// Full context analysis result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedContext {
    pub context: InjectionContext,
    pub attribute_kind: Option<AttributeKind>,
}

impl DetectedContext {
    pub fn new(context: InjectionContext) -> Self {
        Self {
            context,
            attribute_kind: None,
        }
    }

    pub fn attribute(kind: AttributeKind) -> Self {
        Self {
            context: InjectionContext::Attribute,
            attribute_kind: Some(kind),
        }
    }
}

/// Severity of a verified finding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    #[default]
    Low,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
        }
    }
}

/// A completed detection job: every positive result plus report artifacts
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRun {
    pub job_id: String,
    pub url: String,
    pub selector: String,
    pub browser: BrowserEngine,
    pub results: Vec<TestResult>,
    pub payloads_tested: usize,
    pub started_at: String,
    pub completed_at: String,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub report_paths: Vec<std::path::PathBuf>,
}

/// Output contract of the form-discovery crawler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredTarget {
    pub url: String,
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_selector: Option<String>,
}

/// Progress event emitted at the configured interval during a job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: String,
    pub tested: usize,
    pub total: usize,
    pub findings: usize,
    pub current_payload: String,
}

/// Cooperative cancellation signal, honored at every suspension point.
/// Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Shorthand for the `return Err(Cancelled)` dance at suspension points
    pub fn check(&self) -> crate::errors::ValidatorResult<()> {
        if self.is_cancelled() {
            Err(crate::errors::ValidatorError::Cancelled)
        } else {
            Ok(())
        }
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
