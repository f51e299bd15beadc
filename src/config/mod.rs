// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Pistin Configuration
 * Option registry, persisted defaults, merge semantics
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use crate::errors::{ValidatorError, ValidatorResult};
use crate::retry::RetryPolicy;
use crate::types::BrowserEngine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Distinct timeout knobs, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Timeouts {
    pub navigation: u64,
    pub action: u64,
    pub wait_for: u64,
    pub execution: u64,
    /// Whole-job ceiling. 0 disables the ceiling.
    pub global: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: 30_000,
            action: 10_000,
            wait_for: 5_000,
            execution: 2_000,
            global: 300_000,
        }
    }
}

impl Timeouts {
    pub fn navigation_duration(&self) -> Duration {
        Duration::from_millis(self.navigation)
    }
    pub fn action_duration(&self) -> Duration {
        Duration::from_millis(self.action)
    }
    pub fn wait_for_duration(&self) -> Duration {
        Duration::from_millis(self.wait_for)
    }
    pub fn execution_duration(&self) -> Duration {
        Duration::from_millis(self.execution)
    }
    pub fn global_duration(&self) -> Option<Duration> {
        (self.global > 0).then(|| Duration::from_millis(self.global))
    }
}

/// Declarative login recipe. Failure is logged, never fatal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthOptions {
    pub url: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    pub username: String,
    pub password: String,
    /// Optional JS expression evaluated in-page; truthy means logged in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_logged_in_check: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
    /// Named session to borrow from the registry; None means one-shot
    pub id: Option<String>,
    /// Restore a persisted storage-state snapshot on first use
    pub reuse: bool,
    /// Persist the storage-state snapshot at teardown
    pub save: bool,
    /// Close the named session at teardown
    pub close_after: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            id: None,
            reuse: false,
            save: false,
            close_after: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheOptions {
    pub enabled: bool,
    /// Maximum entry age in milliseconds. 0 keeps entries forever.
    pub max_age: u64,
    pub verbose: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age: 3_600_000,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EffectivenessOptions {
    pub track: bool,
    pub use_effective_payloads: bool,
    pub limit: usize,
    /// Document location override; defaults next to the payload bank
    pub path: Option<PathBuf>,
}

impl Default for EffectivenessOptions {
    fn default() -> Self {
        Self {
            track: true,
            use_effective_payloads: false,
            limit: 20,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SmartSelectionOptions {
    pub enabled: bool,
    pub limit: usize,
}

impl Default for SmartSelectionOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: 15,
        }
    }
}

/// Passed opaquely to the report writer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportOptions {
    pub format: String,
    pub output_dir: Option<PathBuf>,
    /// Per-run timestamped filenames are never persisted back
    pub filename: Option<String>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
            output_dir: None,
            filename: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingOptions {
    pub verbose: bool,
    pub show_progress: bool,
    /// Emit a progress event every N payloads
    pub progress_update_interval: usize,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            show_progress: true,
            progress_update_interval: 5,
        }
    }
}

/// The authoritative option registry for a detection job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct DetectOptions {
    pub browser: BrowserEngine,
    pub submit_selector: Option<String>,
    pub verify_execution: bool,
    /// With verifyExecution, drop reflected-but-not-executed results from
    /// the returned list. Stores still record them.
    pub require_execution: bool,
    pub timeouts: Timeouts,
    pub retry: RetryPolicy,
    pub auth: Option<AuthOptions>,
    pub session: SessionOptions,
    pub cache: CacheOptions,
    pub effectiveness: EffectivenessOptions,
    pub smart_payload_selection: SmartSelectionOptions,
    pub report: ReportOptions,
    pub logging: LoggingOptions,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            browser: BrowserEngine::default(),
            submit_selector: None,
            verify_execution: true,
            require_execution: false,
            timeouts: Timeouts::default(),
            retry: RetryPolicy::default(),
            auth: None,
            session: SessionOptions::default(),
            cache: CacheOptions::default(),
            effectiveness: EffectivenessOptions::default(),
            smart_payload_selection: SmartSelectionOptions::default(),
            report: ReportOptions::default(),
            logging: LoggingOptions::default(),
        }
    }
}

impl DetectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overlay a partial JSON patch over these options. Unknown keys are
    /// rejected so a typo never silently reverts to a default.
    pub fn merged_with_patch(&self, patch: &serde_json::Value) -> ValidatorResult<DetectOptions> {
        let mut base = serde_json::to_value(self)?;
        deep_merge(&mut base, patch);
        serde_json::from_value(base)
            .map_err(|e| ValidatorError::Configuration(format!("invalid options: {}", e)))
    }
}

/// Recursive JSON object merge; non-object values in the patch replace the
/// base value wholesale.
pub fn deep_merge(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                deep_merge(base_map.entry(key.clone()).or_insert(serde_json::Value::Null), value);
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

/// Directory for persisted defaults, created on demand
pub fn config_dir() -> ValidatorResult<PathBuf> {
    let dir = dirs::config_dir()
        .ok_or_else(|| ValidatorError::Configuration("no user config directory".to_string()))?
        .join("pistin");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Directory for on-disk state (payload bank, effectiveness, cache, sessions)
pub fn data_dir() -> ValidatorResult<PathBuf> {
    let dir = dirs::data_dir()
        .ok_or_else(|| ValidatorError::Configuration("no user data directory".to_string()))?
        .join("pistin");
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn config_path() -> ValidatorResult<PathBuf> {
    Ok(config_dir()?.join("config.json"))
}

/// Load persisted defaults, falling back to built-ins on any problem
pub fn load_persisted() -> DetectOptions {
    match try_load_persisted() {
        Ok(Some(opts)) => opts,
        Ok(None) => DetectOptions::new(),
        Err(e) => {
            warn!(error = %e, "Failed to load persisted config, using defaults");
            DetectOptions::new()
        }
    }
}

fn try_load_persisted() -> ValidatorResult<Option<DetectOptions>> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    let opts = serde_json::from_str(&raw)
        .map_err(|e| ValidatorError::Configuration(format!("corrupt config file: {}", e)))?;
    Ok(Some(opts))
}

/// Persist options as the new defaults. Per-run report filenames are
/// stripped so a timestamped name never becomes sticky.
pub fn persist(options: &DetectOptions) -> ValidatorResult<PathBuf> {
    let mut to_store = options.clone();
    to_store.report.filename = None;

    let path = config_path()?;
    let raw = serde_json::to_string_pretty(&to_store)?;
    std::fs::write(&path, raw)?;
    debug!(path = %path.display(), "Persisted configuration");
    Ok(path)
}

pub fn reset() -> ValidatorResult<PathBuf> {
    let path = config_path()?;
    if path.exists() {
        std::fs::remove_file(&path)?;
    }
    Ok(path)
}
