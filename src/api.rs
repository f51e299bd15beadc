// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - HTTP Submission Endpoint
 * Validation server consumed by the Burp extension and other integrators
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use crate::browser::driver::{BrowserHandle, EngineLauncher};
use crate::config::DetectOptions;
use crate::errors::{ValidatorError, ValidatorResult};
use crate::metrics::{MetricsSnapshot, ValidatorMetrics};
use crate::monitor::{classify, ExecutionMonitor, MonitorSnapshot};
use crate::types::BrowserEngine;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

pub const DEFAULT_PORT: u16 = 8093;
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub port: u16,
    pub max_concurrent_pages: usize,
    pub rate_limit_per_minute: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_concurrent_pages: 4,
            rate_limit_per_minute: 120,
        }
    }
}

/// Submission body. Byte fields arrive base64-encoded.
#[derive(Debug, Deserialize)]
struct SubmissionRequest {
    #[serde(rename = "http-response")]
    http_response: String,
    #[serde(rename = "http-url")]
    http_url: String,
    #[serde(rename = "http-headers", default)]
    #[allow(dead_code)]
    http_headers: Option<String>,
    payload: String,
    #[serde(default)]
    browser: Option<String>,
    #[serde(default)]
    options: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EnhancedResult {
    detected: bool,
    executed: bool,
    severity: String,
    confidence: f64,
    messages: Vec<String>,
    detection_methods: Vec<String>,
    context: serde_json::Value,
    timing: serde_json::Value,
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct SubmissionResponse {
    value: u8,
    msg: String,
    enhanced: EnhancedResult,
}

struct RateWindow {
    window_start: Instant,
    count: u32,
}

/// Shared endpoint state: per-engine browser pool, capacity semaphore,
/// fixed-window rate limiter, counters.
pub struct ApiState {
    launcher: Arc<dyn EngineLauncher>,
    metrics: ValidatorMetrics,
    monitor: ExecutionMonitor,
    capacity: Semaphore,
    rate: Mutex<RateWindow>,
    browsers: Mutex<HashMap<BrowserEngine, Arc<dyn BrowserHandle>>>,
    started: Instant,
    active_requests: AtomicU64,
    defaults: DetectOptions,
    config: ApiConfig,
}

impl ApiState {
    pub fn new(launcher: Arc<dyn EngineLauncher>, defaults: DetectOptions, config: ApiConfig) -> Self {
        Self {
            launcher,
            metrics: ValidatorMetrics::new(),
            monitor: ExecutionMonitor::new(),
            capacity: Semaphore::new(config.max_concurrent_pages),
            rate: Mutex::new(RateWindow {
                window_start: Instant::now(),
                count: 0,
            }),
            browsers: Mutex::new(HashMap::new()),
            started: Instant::now(),
            active_requests: AtomicU64::new(0),
            defaults,
            config,
        }
    }

    /// Fixed one-minute window. Returns seconds until reset when exceeded.
    async fn check_rate(&self) -> Result<(), u64> {
        let mut window = self.rate.lock().await;
        let elapsed = window.window_start.elapsed();
        if elapsed.as_secs() >= 60 {
            window.window_start = Instant::now();
            window.count = 0;
        }
        if window.count >= self.config.rate_limit_per_minute {
            return Err(60u64.saturating_sub(elapsed.as_secs()).max(1));
        }
        window.count += 1;
        Ok(())
    }

    async fn browser_for(&self, engine: BrowserEngine) -> ValidatorResult<Arc<dyn BrowserHandle>> {
        let mut browsers = self.browsers.lock().await;
        if let Some(handle) = browsers.get(&engine) {
            return Ok(Arc::clone(handle));
        }
        let handle = self.launcher.launch(engine).await?;
        browsers.insert(engine, Arc::clone(&handle));
        Ok(handle)
    }

    async fn pool_summary(&self) -> serde_json::Value {
        let browsers = self.browsers.lock().await;
        let mut summary = serde_json::Map::new();
        for engine in BrowserEngine::all() {
            summary.insert(
                engine.as_str().to_string(),
                json!({ "contexts": if browsers.contains_key(&engine) { 1 } else { 0 } }),
            );
        }
        serde_json::Value::Object(summary)
    }
}

/// Engines this host can actually drive
pub fn available_engines() -> Vec<BrowserEngine> {
    // Chromium resolution is delegated to the CDP client; Firefox needs a
    // binary on PATH and WebKit is never available.
    let mut engines = vec![BrowserEngine::Chromium];
    if std::env::split_paths(&std::env::var_os("PATH").unwrap_or_default())
        .any(|dir| dir.join("firefox").is_file() || dir.join("firefox-esr").is_file())
    {
        engines.push(BrowserEngine::Firefox);
    }
    engines
}

fn rss_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status.lines().find_map(|line| {
                line.strip_prefix("VmRSS:").and_then(|rest| {
                    rest.trim()
                        .split_whitespace()
                        .next()
                        .and_then(|kb| kb.parse::<u64>().ok())
                        .map(|kb| kb * 1024)
                })
            })
        })
        .unwrap_or(0)
}

fn decode_b64(field: &str, value: &str) -> Result<String, String> {
    let bytes = BASE64
        .decode(value.trim())
        .map_err(|e| format!("{} is not valid base64: {}", field, e))?;
    String::from_utf8(bytes).map_err(|e| format!("{} is not valid UTF-8: {}", field, e))
}

async fn submit_handler(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SubmissionRequest>,
) -> impl IntoResponse {
    state.metrics.record_request();

    if let Err(retry_after) = state.check_rate().await {
        state.metrics.record_rate_limited();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "value": 0, "msg": "rate limit exceeded", "retryAfter": retry_after })),
        );
    }

    let Ok(_permit) = state.capacity.try_acquire() else {
        state.metrics.record_capacity_rejected();
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "value": 0, "msg": "validation capacity exceeded" })),
        );
    };

    let html = match decode_b64("http-response", &request.http_response) {
        Ok(html) => html,
        Err(msg) => {
            state.metrics.record_validation_error();
            return (StatusCode::BAD_REQUEST, Json(json!({ "value": 0, "msg": msg })));
        }
    };
    let url = match decode_b64("http-url", &request.http_url) {
        Ok(url) => url,
        Err(msg) => {
            state.metrics.record_validation_error();
            return (StatusCode::BAD_REQUEST, Json(json!({ "value": 0, "msg": msg })));
        }
    };
    if request.payload.is_empty() {
        state.metrics.record_validation_error();
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "value": 0, "msg": "payload must not be empty" })),
        );
    }

    let engine = match &request.browser {
        Some(name) => match BrowserEngine::parse(name) {
            Some(engine) => engine,
            None => {
                state.metrics.record_validation_error();
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "value": 0, "msg": format!("unknown browser '{}'", name) })),
                );
            }
        },
        None => state.defaults.browser,
    };

    let options = match &request.options {
        Some(patch) => match state.defaults.merged_with_patch(patch) {
            Ok(options) => options,
            Err(e) => {
                state.metrics.record_validation_error();
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "value": 0, "msg": e.to_string() })),
                );
            }
        },
        None => state.defaults.clone(),
    };

    state.active_requests.fetch_add(1, Ordering::Relaxed);
    let started = Instant::now();
    let outcome = validate_response(&state, engine, &html, &request.payload, &options).await;
    state.active_requests.fetch_sub(1, Ordering::Relaxed);

    match outcome {
        Ok((reflected, mut snapshot)) => {
            // with execution verification off the endpoint reports pure
            // reflection analysis
            if !options.verify_execution {
                snapshot = MonitorSnapshot::default();
            }
            let executed = snapshot.executed();
            let detected = reflected || executed || snapshot.has_dom_mutation();
            let (severity, confidence) = classify(reflected, &snapshot);

            let mut messages = Vec::new();
            for dialog in &snapshot.dialogs {
                messages.push(format!("{}({})", dialog.kind, dialog.message));
            }
            if reflected {
                messages.push("payload reflected in response body".to_string());
            }

            if detected {
                state.metrics.record_found();
            } else {
                state.metrics.record_clean();
            }

            let response = SubmissionResponse {
                value: detected as u8,
                msg: if detected {
                    "XSS detected".to_string()
                } else {
                    "no XSS detected".to_string()
                },
                enhanced: EnhancedResult {
                    detected,
                    executed,
                    severity: severity.to_string(),
                    confidence,
                    messages,
                    detection_methods: snapshot.detection_methods(),
                    context: json!({
                        "url": url,
                        "browser": engine.as_str(),
                        "responseBytes": html.len(),
                    }),
                    timing: json!({
                        "totalMs": started.elapsed().as_millis() as u64,
                        "executionWaitMs": options.timeouts.execution,
                    }),
                    metadata: json!({
                        "version": VERSION,
                        "payloadLength": request.payload.len(),
                    }),
                },
            };

            let status = if detected {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            (
                status,
                Json(serde_json::to_value(response).unwrap_or_else(|_| json!({ "value": 0 }))),
            )
        }
        Err(e) => {
            warn!(error = %e, "Validation request failed");
            state.metrics.record_internal_error();
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "value": 0, "msg": e.to_string() })),
            )
        }
    }
}

/// Render the submitted response body in an instrumented page and observe.
async fn validate_response(
    state: &ApiState,
    engine: BrowserEngine,
    html: &str,
    payload: &str,
    options: &DetectOptions,
) -> ValidatorResult<(bool, MonitorSnapshot)> {
    let browser = state.browser_for(engine).await?;
    let page = browser.new_page().await?;

    let outcome = async {
        state.monitor.install(&page).await?;
        page.set_content(html).await?;
        tokio::time::sleep(options.timeouts.execution_duration()).await;

        let reflected = html.contains(payload);
        let snapshot = state.monitor.snapshot(&page).await?;
        Ok::<(bool, MonitorSnapshot), ValidatorError>((reflected, snapshot))
    }
    .await;

    page.close().await;
    outcome
}

async fn health_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let body = json!({
        "status": "healthy",
        "version": VERSION,
        "uptime": state.started.elapsed().as_secs_f64(),
        "memory": rss_bytes(),
        "activeRequests": state.active_requests.load(Ordering::Relaxed),
        "maxConcurrentPages": state.config.max_concurrent_pages,
        "availableBrowsers": available_engines()
            .iter()
            .map(|engine| engine.as_str())
            .collect::<Vec<_>>(),
        "metrics": state.metrics.snapshot(),
        "browserPool": state.pool_summary().await,
    });
    (StatusCode::OK, Json(body))
}

async fn metrics_handler(State(state): State<Arc<ApiState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", post(submit_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Bind and serve until the process exits
pub async fn serve(state: Arc<ApiState>) -> ValidatorResult<()> {
    let port = state.config.port;
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ValidatorError::Configuration(format!("cannot bind {}: {}", addr, e)))?;
    info!(addr = %addr, "Validation endpoint listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| ValidatorError::General(format!("server error: {}", e)))
}
