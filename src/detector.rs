// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - XSS Detection Orchestrator
 * Drives one (url, input, payloads, options) job through the browser
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use crate::browser::driver::{EngineLauncher, PageHandle};
use crate::browser::session::{PageLease, Session, SessionManager};
use crate::cache::{fingerprint, FingerprintOptions, ResultCache};
use crate::config::{self, DetectOptions};
use crate::context;
use crate::effectiveness::EffectivenessStore;
use crate::errors::{ValidatorError, ValidatorResult};
use crate::monitor::ExecutionMonitor;
use crate::payloads;
use crate::retry::{retry_operation, RetryOperation};
use crate::selector::{self, SelectionInputs};
use crate::types::{
    now_rfc3339, CancelToken, DetectionRun, PayloadSet, ProgressEvent, TestResult,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Orchestrates detection jobs against shared stores and the session
/// registry. One instance serves many jobs; each job drives one page.
pub struct XssDetector {
    launcher: Arc<dyn EngineLauncher>,
    sessions: Arc<SessionManager>,
    effectiveness: Arc<EffectivenessStore>,
    cache: Arc<ResultCache>,
    monitor: ExecutionMonitor,
    progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    /// Skip persisting merged options back to disk (HTTP API, tests)
    persist_options: bool,
}

/// Exclusive page plus the handles needed to tear it down correctly
enum AcquiredPage {
    Session {
        session: Arc<Session>,
        lease: Option<PageLease>,
    },
    OneShot {
        browser: Arc<dyn crate::browser::driver::BrowserHandle>,
        lease: Option<PageLease>,
    },
}

impl AcquiredPage {
    fn page(&self) -> Arc<dyn PageHandle> {
        let lease = match self {
            AcquiredPage::Session { lease, .. } => lease,
            AcquiredPage::OneShot { lease, .. } => lease,
        };
        Arc::clone(lease.as_ref().expect("page accessed after teardown").page())
    }
}

impl XssDetector {
    pub fn new(
        launcher: Arc<dyn EngineLauncher>,
        sessions: Arc<SessionManager>,
        effectiveness: Arc<EffectivenessStore>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            launcher,
            sessions,
            effectiveness,
            cache,
            monitor: ExecutionMonitor::new(),
            progress: None,
            persist_options: true,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn without_option_persistence(mut self) -> Self {
        self.persist_options = false;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Run one detection job. Per-payload failures are isolated; only
    /// launch, target navigation, and monitor installation are fatal.
    /// Cancellation (explicit or via the global ceiling) returns the
    /// partial result list with `cancelled` set.
    pub async fn detect(
        &self,
        url: &str,
        input_selector: &str,
        payload_input: Option<PayloadSet>,
        options: DetectOptions,
        cancel: CancelToken,
    ) -> ValidatorResult<DetectionRun> {
        validate_inputs(url, input_selector)?;

        if self.persist_options {
            if let Err(e) = config::persist(&options) {
                warn!(error = %e, "Could not persist options");
            }
        }

        // Global ceiling trips the shared cancel token; the job unwinds at
        // its next suspension point and returns partial results.
        let watchdog = options.timeouts.global_duration().map(|ceiling| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(ceiling).await;
                warn!(ceiling_ms = ceiling.as_millis(), "Global job ceiling reached, cancelling");
                cancel.cancel();
            })
        });

        let outcome = self
            .run_job(url, input_selector, payload_input, &options, &cancel)
            .await;

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        outcome
    }

    async fn run_job(
        &self,
        url: &str,
        input_selector: &str,
        payload_input: Option<PayloadSet>,
        options: &DetectOptions,
        cancel: &CancelToken,
    ) -> ValidatorResult<DetectionRun> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let started_at = now_rfc3339();
        info!(job = %job_id, url = url, selector = input_selector, browser = %options.browser, "Detection job started");

        let mut run = DetectionRun {
            job_id: job_id.clone(),
            url: url.to_string(),
            selector: input_selector.to_string(),
            browser: options.browser,
            results: Vec::new(),
            payloads_tested: 0,
            started_at,
            completed_at: String::new(),
            cancelled: false,
            report_paths: Vec::new(),
        };

        let mut acquired = self.acquire_page(options).await?;
        let page = acquired.page();

        // Cancellation never errors the job: unwind with what we have
        if cancel.is_cancelled() {
            self.teardown(acquired, &page, options, false).await;
            run.cancelled = true;
            run.completed_at = now_rfc3339();
            return Ok(run);
        }

        if let Some(auth) = &options.auth {
            self.authenticate(&page, auth, options).await;
        }

        // Fatal after retry exhaustion: without the target there is no job
        let nav_timeout = options.timeouts.navigation_duration();
        retry_operation(&options.retry, RetryOperation::Navigation, "navigate", || {
            page.navigate(url, nav_timeout)
        })
        .await?;

        self.monitor.install(&page).await?;

        if let AcquiredPage::Session { session, .. } = &acquired {
            if options.session.reuse {
                if let Err(e) = session.hydrate_origin_storage(&page, url).await {
                    warn!(error = %e, "Storage-state hydration failed");
                }
            }
        }

        let selected = self
            .choose_payloads(&page, url, input_selector, payload_input, options)
            .await;
        info!(job = %job_id, payloads = selected.len(), "Payload selection complete");

        let total = selected.len();
        let mut page = page;
        let mut page_dirty = false;

        for (index, payload) in selected.iter().enumerate() {
            if cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }

            match self
                .test_payload(&page, url, input_selector, payload, options, cancel)
                .await
            {
                Ok(Some(result)) => {
                    if result.reflected || result.executed {
                        run.results.push(result);
                    }
                }
                Ok(None) => {}
                Err(ValidatorError::Cancelled) => {
                    run.cancelled = true;
                    break;
                }
                Err(ValidatorError::PageGone(reason)) => {
                    warn!(job = %job_id, payload = payload.as_str(), reason = %reason, "Page lost mid-test");
                    match self.replace_page(&mut acquired, url, options).await {
                        Ok(fresh) => {
                            page = fresh;
                            page_dirty = false;
                        }
                        Err(e) => {
                            warn!(job = %job_id, error = %e, "Could not obtain a fresh page, ending job early");
                            page_dirty = true;
                            break;
                        }
                    }
                }
                Err(e) => {
                    // Isolated: recorded, never fatal for the job
                    debug!(job = %job_id, payload = payload.as_str(), error = %e, "Payload test failed");
                }
            }

            run.payloads_tested = index + 1;
            self.emit_progress(&job_id, index + 1, total, run.results.len(), payload, options);
        }

        if !run.cancelled {
            run.payloads_tested = total;
        }

        self.teardown(acquired, &page, options, page_dirty).await;

        if options.verify_execution && options.require_execution {
            run.results.retain(|result| result.executed);
        }

        run.completed_at = now_rfc3339();
        info!(
            job = %job_id,
            tested = run.payloads_tested,
            findings = run.results.len(),
            cancelled = run.cancelled,
            "Detection job finished"
        );
        Ok(run)
    }

    async fn acquire_page(&self, options: &DetectOptions) -> ValidatorResult<AcquiredPage> {
        match &options.session.id {
            Some(name) => {
                let (session, existed) = self
                    .sessions
                    .get_session(name, options.browser, options.session.reuse)
                    .await?;
                let lease = session.acquire_page().await?;
                if !existed && options.session.reuse {
                    if let Err(e) = session.apply_cookies(lease.page()).await {
                        warn!(session = name.as_str(), error = %e, "Cookie restore failed");
                    }
                }
                Ok(AcquiredPage::Session {
                    session,
                    lease: Some(lease),
                })
            }
            None => {
                let browser = self.launcher.launch(options.browser).await?;
                let page = browser.new_page().await?;
                Ok(AcquiredPage::OneShot {
                    browser,
                    lease: Some(PageLease::unpooled(page)),
                })
            }
        }
    }

    /// Fresh page after the old one died. Only possible with a session.
    async fn replace_page(
        &self,
        acquired: &mut AcquiredPage,
        url: &str,
        options: &DetectOptions,
    ) -> ValidatorResult<Arc<dyn PageHandle>> {
        match acquired {
            AcquiredPage::Session { session, lease } => {
                if let Some(dead) = lease.take() {
                    dead.discard().await;
                }
                let fresh = session.acquire_page().await?;
                let page = Arc::clone(fresh.page());
                *lease = Some(fresh);

                page.navigate(url, options.timeouts.navigation_duration())
                    .await?;
                self.monitor.install(&page).await?;
                Ok(page)
            }
            AcquiredPage::OneShot { .. } => Err(ValidatorError::PageGone(
                "one-shot page lost and no session to draw from".to_string(),
            )),
        }
    }

    /// Best-effort declarative login. Failure is logged, never fatal.
    async fn authenticate(
        &self,
        page: &Arc<dyn PageHandle>,
        auth: &crate::config::AuthOptions,
        options: &DetectOptions,
    ) {
        let action = options.timeouts.action_duration();
        let outcome: ValidatorResult<()> = async {
            page.navigate(&auth.url, options.timeouts.navigation_duration())
                .await?;
            page.fill(&auth.username_selector, &auth.username, action)
                .await?;
            page.fill(&auth.password_selector, &auth.password, action)
                .await?;
            page.click(&auth.submit_selector, action).await?;
            // settling is best-effort; an in-page login never navigates
            let _ = page
                .wait_for_navigation(options.timeouts.wait_for_duration())
                .await;

            if let Some(check) = &auth.is_logged_in_check {
                let value = page.evaluate(check).await?;
                let logged_in = value.as_bool().unwrap_or(false)
                    || value.as_str().map(|s| !s.is_empty()).unwrap_or(false);
                if !logged_in {
                    return Err(ValidatorError::Authentication(
                        "login probe returned falsy".to_string(),
                    ));
                }
            }
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => info!(url = auth.url.as_str(), "Authenticated"),
            Err(e) => warn!(url = auth.url.as_str(), error = %e, "Authentication failed, continuing unauthenticated"),
        }
    }

    /// Payload choice precedence: smart selection, effectiveness top-K,
    /// caller categories, caller flat list, built-in defaults.
    async fn choose_payloads(
        &self,
        page: &Arc<dyn PageHandle>,
        url: &str,
        input_selector: &str,
        payload_input: Option<PayloadSet>,
        options: &DetectOptions,
    ) -> Vec<String> {
        if options.smart_payload_selection.enabled {
            let detected = context::analyze(page, url, input_selector).await;
            debug!(context = %detected.context, "Injection context detected");

            let scores = if options.effectiveness.use_effective_payloads {
                Some(self.effectiveness.score_snapshot(options.browser).await)
            } else {
                None
            };
            let corpus = payloads::categorized_bank();
            return selector::select(&SelectionInputs {
                context: detected,
                engine: options.browser,
                corpus: &corpus,
                custom: payload_input.as_ref(),
                scores: scores.as_ref(),
                limit: options.smart_payload_selection.limit,
            });
        }

        if options.effectiveness.use_effective_payloads {
            let ranked = self
                .effectiveness
                .top_k(options.effectiveness.limit, Some(options.browser))
                .await;
            if !ranked.is_empty() {
                return ranked.into_iter().map(|entry| entry.payload).collect();
            }
        }

        match payload_input {
            Some(PayloadSet::Categorized(categories)) => categories
                .into_iter()
                .filter(|category| category.supports(options.browser))
                .flat_map(|category| category.payloads)
                .collect(),
            Some(PayloadSet::Flat(list)) => list,
            None => payloads::default_payloads(),
        }
    }

    /// One payload, start to finish. Ok(None) means the test ran but the
    /// payload neither reflected nor executed (already recorded).
    async fn test_payload(
        &self,
        page: &Arc<dyn PageHandle>,
        url: &str,
        input_selector: &str,
        payload: &str,
        options: &DetectOptions,
        cancel: &CancelToken,
    ) -> ValidatorResult<Option<TestResult>> {
        let fp = fingerprint(
            url,
            input_selector,
            payload,
            &FingerprintOptions {
                browser: options.browser,
                verify_execution: options.verify_execution,
                submit_selector: options.submit_selector.as_deref(),
            },
        );

        if options.cache.enabled && self.cache.exists(&fp, options.cache.max_age).await {
            if let Some(hit) = self.cache.get(&fp).await {
                if options.cache.verbose {
                    info!(fingerprint = fp.as_str(), "Cache hit");
                }
                return Ok(Some(TestResult {
                    payload: payload.to_string(),
                    reflected: hit.detected,
                    executed: hit.executed,
                    url: url.to_string(),
                    tested_at: now_rfc3339(),
                    from_cache: true,
                }));
            }
        }

        cancel.check()?;

        // Monitor state must be clean before injection: re-assert the agent
        // (cross-document moves can shed it) and clear the bag.
        self.monitor.reinstall(page).await?;
        self.monitor.reset(page).await?;

        let action = options.timeouts.action_duration();
        retry_operation(&options.retry, RetryOperation::Input, "fill", || {
            page.fill(input_selector, payload, action)
        })
        .await?;

        self.submit(page, input_selector, options).await?;

        // Timeout here is the normal case for forms handled in-page
        let _ = page
            .wait_for_navigation(options.timeouts.wait_for_duration())
            .await;

        let reflected = page.content().await?.contains(payload);

        let executed = if options.verify_execution {
            cancel.check()?;
            tokio::time::sleep(options.timeouts.execution_duration()).await;
            self.monitor.verdict(page).await?.executed
        } else {
            false
        };

        if options.effectiveness.track {
            if let Err(e) = self
                .effectiveness
                .record(payload, reflected, executed, options.browser)
                .await
            {
                warn!(error = %e, "Effectiveness update lost");
            }
        }
        if options.cache.enabled {
            if let Err(e) = self.cache.put(&fp, reflected, executed).await {
                warn!(error = %e, "Cache write failed, degrading to pass-through");
            }
        }

        Ok(Some(TestResult {
            payload: payload.to_string(),
            reflected,
            executed,
            url: url.to_string(),
            tested_at: now_rfc3339(),
            from_cache: false,
        }))
    }

    /// Submission fallback chain: configured selector click, ENTER on the
    /// input, the enclosing form's submit method, a bubbling change event.
    async fn submit(
        &self,
        page: &Arc<dyn PageHandle>,
        input_selector: &str,
        options: &DetectOptions,
    ) -> ValidatorResult<()> {
        let action = options.timeouts.action_duration();
        let mut last_error: Option<ValidatorError> = None;

        if let Some(submit_selector) = &options.submit_selector {
            match retry_operation(&options.retry, RetryOperation::Submission, "submit-click", || {
                page.click(submit_selector, action)
            })
            .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(error = %e, "Submit click failed, falling back");
                    last_error = Some(e);
                }
            }
        }

        match retry_operation(&options.retry, RetryOperation::Submission, "submit-enter", || {
            page.press(input_selector, "Enter", action)
        })
        .await
        {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(error = %e, "ENTER submission failed, falling back");
                last_error = Some(e);
            }
        }

        let form_submit = format!(
            r#"(function() {{
                const el = document.querySelector({selector});
                if (!el) return false;
                const form = el.closest('form');
                if (!form) return false;
                form.submit();
                return true;
            }})()"#,
            selector = serde_json::to_string(input_selector)
                .unwrap_or_else(|_| "\"\"".to_string()),
        );
        match retry_operation(&options.retry, RetryOperation::Submission, "submit-form", || async {
            let value = page.evaluate(&form_submit).await?;
            if value.as_bool() == Some(true) {
                Ok(())
            } else {
                Err(ValidatorError::Action {
                    action: "form-submit",
                    selector: input_selector.to_string(),
                    reason: "no enclosing form found".to_string(),
                })
            }
        })
        .await
        {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(error = %e, "form.submit() failed, falling back");
                last_error = Some(e);
            }
        }

        let change_event = format!(
            r#"(function() {{
                const el = document.querySelector({selector});
                if (!el) return false;
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            selector = serde_json::to_string(input_selector)
                .unwrap_or_else(|_| "\"\"".to_string()),
        );
        match retry_operation(&options.retry, RetryOperation::Submission, "submit-change", || async {
            let value = page.evaluate(&change_event).await?;
            if value.as_bool() == Some(true) {
                Ok(())
            } else {
                Err(ValidatorError::Action {
                    action: "change-event",
                    selector: input_selector.to_string(),
                    reason: "element not found".to_string(),
                })
            }
        })
        .await
        {
            Ok(()) => Ok(()),
            Err(e) => Err(last_error.unwrap_or(e)),
        }
    }

    async fn teardown(
        &self,
        acquired: AcquiredPage,
        page: &Arc<dyn PageHandle>,
        options: &DetectOptions,
        page_dirty: bool,
    ) {
        match acquired {
            AcquiredPage::Session { session, lease } => {
                if options.session.save {
                    if let Some(name) = &options.session.id {
                        match self.sessions.save_storage_state(name, page).await {
                            Ok(path) => debug!(path = %path.display(), "Storage state persisted"),
                            Err(e) => warn!(error = %e, "Storage-state save failed"),
                        }
                    }
                }

                if let Some(lease) = lease {
                    if page_dirty {
                        lease.discard().await;
                    } else {
                        lease.release().await;
                    }
                }

                if options.session.close_after {
                    self.sessions.close_session(&session.name).await;
                }
            }
            AcquiredPage::OneShot { browser, lease } => {
                if let Some(lease) = lease {
                    lease.discard().await;
                }
                browser.close().await;
            }
        }
    }

    fn emit_progress(
        &self,
        job_id: &str,
        tested: usize,
        total: usize,
        findings: usize,
        payload: &str,
        options: &DetectOptions,
    ) {
        let interval = options.logging.progress_update_interval.max(1);
        if tested % interval != 0 && tested != total {
            return;
        }
        if options.logging.show_progress {
            info!(job = job_id, tested = tested, total = total, findings = findings, "Progress");
        }
        if let Some(tx) = &self.progress {
            let _ = tx.send(ProgressEvent {
                job_id: job_id.to_string(),
                tested,
                total,
                findings,
                current_payload: payload.to_string(),
            });
        }
    }
}

fn validate_inputs(url: &str, input_selector: &str) -> ValidatorResult<()> {
    let parsed = url::Url::parse(url)?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidatorError::Configuration(format!(
            "target URL must be http(s), got {}",
            parsed.scheme()
        )));
    }
    if input_selector.trim().is_empty() {
        return Err(ValidatorError::Configuration(
            "input selector must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_validation() {
        assert!(validate_inputs("https://t.example/", "input[name=q]").is_ok());
        assert!(validate_inputs("ftp://t.example/", "input").is_err());
        assert!(validate_inputs("nonsense", "input").is_err());
        assert!(validate_inputs("https://t.example/", "  ").is_err());
    }
}
