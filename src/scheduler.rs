// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Fan-out driver: contiguous batches of detection jobs with optional
//! session sharing and early stop on the first verified vulnerability.

use crate::config::DetectOptions;
use crate::detector::XssDetector;
use crate::errors::ValidatorResult;
use crate::types::{CancelToken, DetectionRun, PayloadSet};
use futures::future::join_all;
use tracing::{debug, info};

/// One unit of work for the scheduler
#[derive(Debug, Clone)]
pub struct DetectJob {
    pub url: String,
    pub selector: String,
    pub submit_selector: Option<String>,
    pub payloads: Option<PayloadSet>,
}

#[derive(Debug, Clone)]
pub struct ParallelOptions {
    pub concurrency: usize,
    pub stop_on_first_vulnerability: bool,
    /// All jobs adopt one synthetic session, closed after the last batch
    pub share_session: bool,
    pub base: DetectOptions,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            concurrency: 2,
            stop_on_first_vulnerability: false,
            share_session: false,
            base: DetectOptions::new(),
        }
    }
}

#[derive(Debug)]
pub struct JobOutcome {
    pub url: String,
    pub selector: String,
    pub outcome: ValidatorResult<DetectionRun>,
}

impl JobOutcome {
    pub fn findings(&self) -> usize {
        self.outcome
            .as_ref()
            .map(|run| run.results.len())
            .unwrap_or(0)
    }
}

/// Process jobs in contiguous batches of `concurrency`. A batch settles
/// fully before the next begins; per-job failures are isolated into their
/// outcome slot. With `stop_on_first_vulnerability`, a batch containing a
/// finding still completes but later batches are skipped.
pub async fn run_parallel(
    detector: &XssDetector,
    jobs: Vec<DetectJob>,
    options: ParallelOptions,
    cancel: CancelToken,
) -> Vec<JobOutcome> {
    let concurrency = options.concurrency.max(1);
    let total = jobs.len();

    let shared_session = options.share_session.then(|| {
        format!("parallel-{}", &uuid::Uuid::new_v4().to_string()[..8])
    });

    info!(
        jobs = total,
        concurrency = concurrency,
        shared_session = shared_session.as_deref().unwrap_or("-"),
        "Parallel run starting"
    );

    let mut outcomes: Vec<JobOutcome> = Vec::with_capacity(total);
    let mut stop = false;

    for (batch_index, batch) in jobs.chunks(concurrency).enumerate() {
        if stop || cancel.is_cancelled() {
            debug!(batch = batch_index, "Skipping remaining batches");
            break;
        }

        let futures: Vec<_> = batch
            .iter()
            .map(|job| {
                let mut job_options = options.base.clone();
                job_options.submit_selector = job.submit_selector.clone();
                if let Some(name) = &shared_session {
                    job_options.session.id = Some(name.clone());
                    // lifecycle belongs to the scheduler, not any one job
                    job_options.session.close_after = false;
                }
                let cancel = cancel.clone();
                async move {
                    let outcome = detector
                        .detect(
                            &job.url,
                            &job.selector,
                            job.payloads.clone(),
                            job_options,
                            cancel,
                        )
                        .await;
                    JobOutcome {
                        url: job.url.clone(),
                        selector: job.selector.clone(),
                        outcome,
                    }
                }
            })
            .collect();

        // batch barrier: everything launched in this batch settles here
        let batch_outcomes = join_all(futures).await;

        if options.stop_on_first_vulnerability
            && batch_outcomes.iter().any(|outcome| outcome.findings() > 0)
        {
            info!(batch = batch_index, "Vulnerability found, stopping after this batch");
            stop = true;
        }

        outcomes.extend(batch_outcomes);
    }

    if let Some(name) = shared_session {
        detector.sessions().close_session(&name).await;
    }

    info!(
        completed = outcomes.len(),
        skipped = total - outcomes.len(),
        "Parallel run finished"
    );
    outcomes
}
