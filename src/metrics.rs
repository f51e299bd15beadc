// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Counters for the HTTP submission endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ValidatorMetrics {
    requests_total: AtomicU64,
    xss_found: AtomicU64,
    clean: AtomicU64,
    validation_errors: AtomicU64,
    rate_limited: AtomicU64,
    capacity_rejected: AtomicU64,
    internal_errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub xss_found: u64,
    pub clean: u64,
    pub validation_errors: u64,
    pub rate_limited: u64,
    pub capacity_rejected: u64,
    pub internal_errors: u64,
    pub success_rate: f64,
}

impl ValidatorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_found(&self) {
        self.xss_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clean(&self) {
        self.clean.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_error(&self) {
        self.validation_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capacity_rejected(&self) {
        self.capacity_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_internal_error(&self) {
        self.internal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let found = self.xss_found.load(Ordering::Relaxed);
        let clean = self.clean.load(Ordering::Relaxed);
        let settled = found + clean;

        MetricsSnapshot {
            requests_total,
            xss_found: found,
            clean,
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            capacity_rejected: self.capacity_rejected.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            success_rate: if requests_total > 0 {
                settled as f64 / requests_total as f64
            } else {
                0.0
            },
        }
    }
}
