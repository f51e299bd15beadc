// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Test Result Cache
 * File-per-fingerprint memoization with an in-memory front
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use crate::errors::ValidatorResult;
use crate::types::BrowserEngine;
use md5::{Digest, Md5};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// The subset of options that affect a test's outcome. Anything else must
/// not influence the fingerprint.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintOptions<'a> {
    pub browser: BrowserEngine,
    pub verify_execution: bool,
    pub submit_selector: Option<&'a str>,
}

/// Canonical md5-hex fingerprint over (url, selector, payload, result-affecting
/// options). serde_json maps are key-sorted, so the hash is stable under key
/// reordering of the source structures.
pub fn fingerprint(
    url: &str,
    selector: &str,
    payload: &str,
    options: &FingerprintOptions<'_>,
) -> String {
    let canonical = json!({
        "url": url,
        "selector": selector,
        "payload": payload,
        "options": {
            "browser": options.browser.as_str(),
            "verifyExecution": options.verify_execution,
            "submitSelector": options.submit_selector,
        },
    });

    let mut hasher = Md5::new();
    hasher.update(canonical.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Memoized outcome of one fingerprinted test
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CachedResult {
    pub detected: bool,
    pub executed: bool,
    /// Milliseconds since the Unix epoch
    pub cached_at: i64,
}

impl CachedResult {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.cached_at)
    }
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub count: usize,
    pub total_bytes: u64,
    pub oldest: Option<i64>,
    pub newest: Option<i64>,
    pub average_bytes: u64,
}

/// Persistent result cache: one JSON file per fingerprint under `dir`, with
/// a bounded in-memory layer in front. Writers are serialized; expired
/// entries are pruned on read.
pub struct ResultCache {
    dir: PathBuf,
    mem: Cache<String, CachedResult>,
    write_lock: Mutex<()>,
}

impl ResultCache {
    pub fn new(dir: PathBuf) -> ValidatorResult<Self> {
        std::fs::create_dir_all(&dir)?;
        let mem = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(24 * 3600))
            .build();
        Ok(Self {
            dir,
            mem,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn entry_path(&self, fp: &str) -> PathBuf {
        self.dir.join(format!("{}.json", fp))
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// True when a non-expired entry exists. `max_age_ms` of 0 means no
    /// expiry; expired entries are removed as a side effect.
    pub async fn exists(&self, fp: &str, max_age_ms: u64) -> bool {
        match self.get(fp).await {
            Some(entry) => {
                if max_age_ms > 0 && entry.age_ms(Self::now_ms()) > max_age_ms as i64 {
                    let _ = self.remove(fp).await;
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    pub async fn get(&self, fp: &str) -> Option<CachedResult> {
        if let Some(hit) = self.mem.get(fp).await {
            return Some(hit);
        }

        let path = self.entry_path(fp);
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str::<CachedResult>(&raw) {
            Ok(entry) => {
                self.mem.insert(fp.to_string(), entry).await;
                Some(entry)
            }
            Err(e) => {
                debug!(fingerprint = fp, error = %e, "Dropping corrupt cache entry");
                let _ = tokio::fs::remove_file(&path).await;
                None
            }
        }
    }

    /// Write an entry; positive and negative outcomes are both cached.
    pub async fn put(&self, fp: &str, detected: bool, executed: bool) -> ValidatorResult<()> {
        let entry = CachedResult {
            detected,
            executed,
            cached_at: Self::now_ms(),
        };

        let _guard = self.write_lock.lock().await;
        let raw = serde_json::to_string(&entry)?;
        tokio::fs::write(self.entry_path(fp), raw).await?;
        self.mem.insert(fp.to_string(), entry).await;
        Ok(())
    }

    async fn remove(&self, fp: &str) -> ValidatorResult<()> {
        let _guard = self.write_lock.lock().await;
        self.mem.invalidate(fp).await;
        let path = self.entry_path(fp);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    /// Remove the given fingerprints, or everything when None
    pub async fn clear(&self, fingerprints: Option<&[String]>) -> ValidatorResult<usize> {
        match fingerprints {
            Some(list) => {
                let mut removed = 0;
                for fp in list {
                    if self.entry_path(fp).exists() {
                        self.remove(fp).await?;
                        removed += 1;
                    }
                }
                Ok(removed)
            }
            None => {
                let _guard = self.write_lock.lock().await;
                self.mem.invalidate_all();
                let mut removed = 0;
                let mut entries = tokio::fs::read_dir(&self.dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    if entry.path().extension().is_some_and(|e| e == "json") {
                        tokio::fs::remove_file(entry.path()).await?;
                        removed += 1;
                    }
                }
                Ok(removed)
            }
        }
    }

    pub async fn stats(&self) -> ValidatorResult<CacheStats> {
        let mut stats = CacheStats::default();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            let Ok(cached) = serde_json::from_str::<CachedResult>(&raw) else {
                continue;
            };
            stats.count += 1;
            stats.total_bytes += raw.len() as u64;
            stats.oldest = Some(match stats.oldest {
                Some(oldest) => oldest.min(cached.cached_at),
                None => cached.cached_at,
            });
            stats.newest = Some(match stats.newest {
                Some(newest) => newest.max(cached.cached_at),
                None => cached.cached_at,
            });
        }

        if stats.count > 0 {
            stats.average_bytes = stats.total_bytes / stats.count as u64;
        }
        Ok(stats)
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache").field("dir", &self.dir).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> FingerprintOptions<'static> {
        FingerprintOptions {
            browser: BrowserEngine::Chromium,
            verify_execution: true,
            submit_selector: Some("#go"),
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = fingerprint("https://t.example/", "input[name=q]", "<b>x</b>", &opts());
        let b = fingerprint("https://t.example/", "input[name=q]", "<b>x</b>", &opts());
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_ignores_irrelevant_options() {
        // Only browser, verifyExecution and submitSelector participate; two
        // calls with identical relevant inputs must agree regardless of how
        // the caller assembled them.
        let base = fingerprint("https://t.example/", "input", "p", &opts());
        let same = fingerprint(
            "https://t.example/",
            "input",
            "p",
            &FingerprintOptions {
                submit_selector: Some("#go"),
                verify_execution: true,
                browser: BrowserEngine::Chromium,
            },
        );
        assert_eq!(base, same);
    }

    #[test]
    fn test_fingerprint_varies_on_relevant_inputs() {
        let base = fingerprint("https://t.example/", "input", "p", &opts());
        let other_payload = fingerprint("https://t.example/", "input", "q", &opts());
        let other_browser = fingerprint(
            "https://t.example/",
            "input",
            "p",
            &FingerprintOptions {
                browser: BrowserEngine::Firefox,
                ..opts()
            },
        );
        let no_submit = fingerprint(
            "https://t.example/",
            "input",
            "p",
            &FingerprintOptions {
                submit_selector: None,
                ..opts()
            },
        );
        assert_ne!(base, other_payload);
        assert_ne!(base, other_browser);
        assert_ne!(base, no_submit);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path().to_path_buf()).unwrap();

        let fp = fingerprint("https://t.example/", "input", "p", &opts());
        cache.put(&fp, true, false).await.unwrap();

        assert!(cache.exists(&fp, 0).await);
        let entry = cache.get(&fp).await.unwrap();
        assert!(entry.detected);
        assert!(!entry.executed);
    }

    #[tokio::test]
    async fn test_expiry_prunes_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path().to_path_buf()).unwrap();

        let fp = fingerprint("https://t.example/", "input", "p", &opts());
        cache.put(&fp, true, true).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!cache.exists(&fp, 10).await);
        // pruned, not merely hidden
        assert!(cache.get(&fp).await.is_none());
        assert!(!cache.dir().join(format!("{}.json", fp)).exists());
    }

    #[tokio::test]
    async fn test_clear_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResultCache::new(dir.path().to_path_buf()).unwrap();

        for i in 0..3 {
            let fp = fingerprint("https://t.example/", "input", &format!("p{}", i), &opts());
            cache.put(&fp, i % 2 == 0, false).await.unwrap();
        }

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.count, 3);
        assert!(stats.total_bytes > 0);
        assert!(stats.oldest <= stats.newest);

        let removed = cache.clear(None).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(cache.stats().await.unwrap().count, 0);
    }
}
