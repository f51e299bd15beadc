// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Payload Effectiveness Store
 * Persistent per-payload success counters with per-browser namespaces
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use crate::errors::ValidatorResult;
use crate::types::{now_rfc3339, BrowserEngine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::warn;

/// Counters shared by the payload scope and each per-browser scope.
/// Monotonically non-decreasing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Counters {
    pub total_tests: u64,
    pub reflected_count: u64,
    pub executed_count: u64,
}

impl Counters {
    fn record(&mut self, reflected: bool, executed: bool) {
        self.total_tests += 1;
        if reflected {
            self.reflected_count += 1;
        }
        if executed {
            self.executed_count += 1;
        }
    }

    pub fn reflection_score(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.reflected_count as f64 / self.total_tests as f64
        }
    }

    pub fn execution_score(&self) -> f64 {
        if self.total_tests == 0 {
            0.0
        } else {
            self.executed_count as f64 / self.total_tests as f64
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EffectivenessRecord {
    #[serde(flatten)]
    pub counters: Counters,
    pub last_tested: Option<String>,
    /// Same counters keyed by browser-id
    pub browsers: BTreeMap<String, Counters>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreMetadata {
    pub last_updated: Option<String>,
    pub total_tests: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct EffectivenessDocument {
    payloads: BTreeMap<String, EffectivenessRecord>,
    metadata: StoreMetadata,
}

/// Scores derived from a record, in the optional per-browser namespace
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PayloadScore {
    pub reflection_score: f64,
    pub execution_score: f64,
    pub total_tests: u64,
}

/// One ranked entry from `top_k`
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RankedPayload {
    pub payload: String,
    #[serde(flatten)]
    pub score: PayloadScore,
}

/// JSON-document store. All mutation is read-modify-write of the whole
/// document under an exclusive async lock; readers snapshot for ranking.
pub struct EffectivenessStore {
    path: PathBuf,
    doc: Mutex<EffectivenessDocument>,
}

impl EffectivenessStore {
    /// Open (or create) the document at `path`. Load errors degrade to an
    /// empty document so a corrupt file never takes testing down.
    pub fn open(path: PathBuf) -> ValidatorResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let doc = if path.exists() {
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
            {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt effectiveness document, starting empty");
                    EffectivenessDocument::default()
                }
            }
        } else {
            EffectivenessDocument::default()
        };

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Record one observation for a payload under a browser namespace.
    /// Atomic against the document as a whole.
    pub async fn record(
        &self,
        payload: &str,
        reflected: bool,
        executed: bool,
        browser: BrowserEngine,
    ) -> ValidatorResult<()> {
        let mut doc = self.doc.lock().await;
        let now = now_rfc3339();

        let record = doc.payloads.entry(payload.to_string()).or_default();
        record.counters.record(reflected, executed);
        record.last_tested = Some(now.clone());
        record
            .browsers
            .entry(browser.as_str().to_string())
            .or_default()
            .record(reflected, executed);

        doc.metadata.last_updated = Some(now);
        doc.metadata.total_tests += 1;

        self.flush(&doc).await
    }

    fn flush_blocking(path: &PathBuf, doc: &EffectivenessDocument) -> ValidatorResult<()> {
        let raw = serde_json::to_string_pretty(doc)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    async fn flush(&self, doc: &EffectivenessDocument) -> ValidatorResult<()> {
        // Document stays small (one record per distinct payload); a
        // synchronous write under the lock keeps writers linearized.
        Self::flush_blocking(&self.path, doc)
    }

    /// Scores for one payload, optionally scoped to a browser
    pub async fn score(&self, payload: &str, browser: Option<BrowserEngine>) -> PayloadScore {
        let doc = self.doc.lock().await;
        let counters = doc
            .payloads
            .get(payload)
            .map(|record| match browser {
                Some(engine) => record
                    .browsers
                    .get(engine.as_str())
                    .copied()
                    .unwrap_or_default(),
                None => record.counters,
            })
            .unwrap_or_default();

        PayloadScore {
            reflection_score: counters.reflection_score(),
            execution_score: counters.execution_score(),
            total_tests: counters.total_tests,
        }
    }

    /// Top payloads ordered by (execution score desc, reflection score desc)
    pub async fn top_k(&self, limit: usize, browser: Option<BrowserEngine>) -> Vec<RankedPayload> {
        let snapshot: Vec<(String, Counters)> = {
            let doc = self.doc.lock().await;
            doc.payloads
                .iter()
                .map(|(payload, record)| {
                    let counters = match browser {
                        Some(engine) => record
                            .browsers
                            .get(engine.as_str())
                            .copied()
                            .unwrap_or_default(),
                        None => record.counters,
                    };
                    (payload.clone(), counters)
                })
                .collect()
        };

        let mut ranked: Vec<RankedPayload> = snapshot
            .into_iter()
            .filter(|(_, counters)| counters.total_tests > 0)
            .map(|(payload, counters)| RankedPayload {
                payload,
                score: PayloadScore {
                    reflection_score: counters.reflection_score(),
                    execution_score: counters.execution_score(),
                    total_tests: counters.total_tests,
                },
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .execution_score
                .partial_cmp(&a.score.execution_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.score
                        .reflection_score
                        .partial_cmp(&a.score.reflection_score)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        ranked.truncate(limit);
        ranked
    }

    pub async fn metadata(&self) -> StoreMetadata {
        self.doc.lock().await.metadata.clone()
    }

    /// A snapshot of all scores in a browser namespace, for the selector's
    /// stable sort without holding the lock across ranking.
    pub async fn score_snapshot(
        &self,
        browser: BrowserEngine,
    ) -> BTreeMap<String, PayloadScore> {
        let doc = self.doc.lock().await;
        doc.payloads
            .iter()
            .map(|(payload, record)| {
                let counters = record
                    .browsers
                    .get(browser.as_str())
                    .copied()
                    .unwrap_or_default();
                (
                    payload.clone(),
                    PayloadScore {
                        reflection_score: counters.reflection_score(),
                        execution_score: counters.execution_score(),
                        total_tests: counters.total_tests,
                    },
                )
            })
            .collect()
    }
}

impl std::fmt::Debug for EffectivenessStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectivenessStore")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, EffectivenessStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = EffectivenessStore::open(dir.path().join("effectiveness.json")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_counters_accumulate() {
        let (_dir, store) = store();
        let payload = "<b>hi</b>";

        store
            .record(payload, true, false, BrowserEngine::Chromium)
            .await
            .unwrap();

        let score = store.score(payload, Some(BrowserEngine::Chromium)).await;
        assert_eq!(score.total_tests, 1);
        assert_eq!(score.reflection_score, 1.0);
        assert_eq!(score.execution_score, 0.0);

        // different namespace starts at zero
        let firefox = store.score(payload, Some(BrowserEngine::Firefox)).await;
        assert_eq!(firefox.total_tests, 0);
    }

    #[tokio::test]
    async fn test_invariants_reflected_and_executed_bounded_by_total() {
        let (_dir, store) = store();
        let payload = "<script>alert(1)</script>";

        for (reflected, executed) in [(true, true), (false, true), (true, false), (false, false)] {
            store
                .record(payload, reflected, executed, BrowserEngine::Chromium)
                .await
                .unwrap();
        }

        let score = store.score(payload, None).await;
        assert_eq!(score.total_tests, 4);
        // reflected=2, executed=2 out of 4; executed > reflected is legal
        assert!(score.reflection_score <= 1.0);
        assert!(score.execution_score <= 1.0);
    }

    #[tokio::test]
    async fn test_top_k_ordering() {
        let (_dir, store) = store();

        // executes every time
        for _ in 0..2 {
            store
                .record("exec", true, true, BrowserEngine::Chromium)
                .await
                .unwrap();
        }
        // reflects only
        for _ in 0..2 {
            store
                .record("reflect", true, false, BrowserEngine::Chromium)
                .await
                .unwrap();
        }
        // dead payload
        store
            .record("dud", false, false, BrowserEngine::Chromium)
            .await
            .unwrap();

        let top = store.top_k(10, Some(BrowserEngine::Chromium)).await;
        assert_eq!(top[0].payload, "exec");
        assert_eq!(top[1].payload, "reflect");
        assert_eq!(top[2].payload, "dud");

        let top1 = store.top_k(1, Some(BrowserEngine::Chromium)).await;
        assert_eq!(top1.len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("effectiveness.json");

        {
            let store = EffectivenessStore::open(path.clone()).unwrap();
            store
                .record("<svg onload=alert(1)>", true, true, BrowserEngine::Webkit)
                .await
                .unwrap();
        }

        let reopened = EffectivenessStore::open(path).unwrap();
        let score = reopened
            .score("<svg onload=alert(1)>", Some(BrowserEngine::Webkit))
            .await;
        assert_eq!(score.total_tests, 1);
        assert_eq!(reopened.metadata().await.total_tests, 1);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_linearized() {
        let (_dir, store) = store();
        let store = std::sync::Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = std::sync::Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .record("racer", true, false, BrowserEngine::Chromium)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let score = store.score("racer", None).await;
        assert_eq!(score.total_tests, 16);
        assert_eq!(store.metadata().await.total_tests, 16);
    }
}
