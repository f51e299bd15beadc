// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Browser Session Manager
 * Named sessions with page pooling and storage-state persistence
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use crate::browser::driver::{BrowserHandle, EngineLauncher, PageHandle};
use crate::errors::{ValidatorError, ValidatorResult};
use crate::types::BrowserEngine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Pages recycled per session; anything beyond this is closed
const MAX_POOL_PAGES: usize = 5;

const BLANK_URL: &str = "about:blank";

/// Serialized cookies + web storage for one session
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageState {
    pub cookies: serde_json::Value,
    /// Origin whose web storage was captured
    pub origin: Option<String>,
    pub local_storage: HashMap<String, String>,
    pub session_storage: HashMap<String, String>,
    pub saved_at: Option<String>,
}

/// A live named session: one browser, its page pool, its snapshot file
pub struct Session {
    pub name: String,
    pub engine: BrowserEngine,
    browser: Arc<dyn BrowserHandle>,
    pool: Mutex<Vec<Arc<dyn PageHandle>>>,
    /// Snapshot loaded at creation, applied lazily to pages
    storage_state: Mutex<Option<StorageState>>,
}

impl Session {
    /// Exclusive page for one in-flight test. Pops from the pool or opens a
    /// fresh page.
    pub async fn acquire_page(self: &Arc<Self>) -> ValidatorResult<PageLease> {
        let pooled = self.pool.lock().await.pop();
        let page = match pooled {
            Some(page) => page,
            None => self.browser.new_page().await?,
        };
        Ok(PageLease {
            session: Some(Arc::clone(self)),
            page: Some(page),
        })
    }

    /// Return a page to the pool: probe, reset, push below cap; close on
    /// any failure or overflow.
    pub async fn release_page(&self, page: Arc<dyn PageHandle>) {
        if !page.is_valid().await {
            debug!(session = %self.name, "Released page failed validity probe, closing");
            page.close().await;
            return;
        }

        let reset = async {
            page.navigate(BLANK_URL, Duration::from_secs(5)).await?;
            page.evaluate("try { localStorage.clear(); sessionStorage.clear(); } catch (e) {} true")
                .await?;
            Ok::<(), ValidatorError>(())
        };

        if let Err(e) = reset.await {
            debug!(session = %self.name, error = %e, "Page reset failed, closing");
            page.close().await;
            return;
        }

        let mut pool = self.pool.lock().await;
        if pool.len() < MAX_POOL_PAGES {
            pool.push(page);
        } else {
            drop(pool);
            page.close().await;
        }
    }

    pub async fn pooled_pages(&self) -> usize {
        self.pool.lock().await.len()
    }

    /// Restore the snapshot's cookies onto a page (context-wide effect)
    pub async fn apply_cookies(&self, page: &Arc<dyn PageHandle>) -> ValidatorResult<()> {
        let snapshot = self.storage_state.lock().await.clone();
        if let Some(state) = snapshot {
            if !state.cookies.is_null() {
                page.set_cookies(state.cookies).await?;
            }
        }
        Ok(())
    }

    /// Restore captured web storage after navigation, when the page is on
    /// the snapshot's origin.
    pub async fn hydrate_origin_storage(
        &self,
        page: &Arc<dyn PageHandle>,
        url: &str,
    ) -> ValidatorResult<()> {
        let snapshot = self.storage_state.lock().await.clone();
        let Some(state) = snapshot else {
            return Ok(());
        };
        let Some(origin) = state.origin.as_deref() else {
            return Ok(());
        };
        let target_origin = url::Url::parse(url)
            .ok()
            .map(|u| u.origin().ascii_serialization());
        if target_origin.as_deref() != Some(origin) {
            return Ok(());
        }

        for (storage, entries) in [
            ("localStorage", &state.local_storage),
            ("sessionStorage", &state.session_storage),
        ] {
            for (key, value) in entries {
                let expression = format!(
                    "try {{ {}.setItem({}, {}); }} catch (e) {{}} true",
                    storage,
                    serde_json::to_string(key)?,
                    serde_json::to_string(value)?,
                );
                page.evaluate(&expression).await?;
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        let pages = std::mem::take(&mut *self.pool.lock().await);
        for page in pages {
            page.close().await;
        }
        self.browser.close().await;
        info!(session = %self.name, "Session closed");
    }
}

/// Release-on-drop page handle. Prefer the explicit `release().await`;
/// dropping falls back to a spawned release task.
pub struct PageLease {
    session: Option<Arc<Session>>,
    page: Option<Arc<dyn PageHandle>>,
}

impl PageLease {
    /// Lease a page with no backing session; dropping just closes it
    pub fn unpooled(page: Arc<dyn PageHandle>) -> Self {
        Self {
            session: None,
            page: Some(page),
        }
    }

    pub fn page(&self) -> &Arc<dyn PageHandle> {
        self.page
            .as_ref()
            .expect("page lease accessed after release")
    }

    /// Return the page to its session pool (or close it when unpooled)
    pub async fn release(mut self) {
        if let Some(page) = self.page.take() {
            match self.session.take() {
                Some(session) => session.release_page(page).await,
                None => page.close().await,
            }
        }
    }

    /// Close outright without pooling (dirty pages, cancellation paths)
    pub async fn discard(mut self) {
        if let Some(page) = self.page.take() {
            page.close().await;
        }
        self.session = None;
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            let session = self.session.take();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    match session {
                        Some(session) => session.release_page(page).await,
                        None => page.close().await,
                    }
                });
            }
        }
    }
}

enum Slot {
    Empty,
    Ready(Arc<Session>),
}

/// Process-wide session registry. `get_session` calls for the same name
/// coalesce so an engine launches once.
pub struct SessionManager {
    launcher: Arc<dyn EngineLauncher>,
    sessions_dir: PathBuf,
    slots: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn EngineLauncher>, sessions_dir: PathBuf) -> Self {
        Self {
            launcher,
            sessions_dir,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn snapshot_path(&self, name: &str) -> PathBuf {
        self.sessions_dir.join(format!("{}.json", name))
    }

    async fn slot_for(&self, name: &str) -> Arc<Mutex<Slot>> {
        let mut slots = self.slots.lock().await;
        Arc::clone(
            slots
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(Slot::Empty))),
        )
    }

    /// Fetch-or-launch a named session. Returns the session and whether it
    /// already existed. Requesting a different engine under an existing
    /// name closes the old session first.
    pub async fn get_session(
        &self,
        name: &str,
        engine: BrowserEngine,
        reuse_storage: bool,
    ) -> ValidatorResult<(Arc<Session>, bool)> {
        let slot = self.slot_for(name).await;
        // Per-name lock held across launch: concurrent callers wait here
        // and then observe Ready.
        let mut guard = slot.lock().await;

        if let Slot::Ready(session) = &*guard {
            if session.engine == engine {
                return Ok((Arc::clone(session), true));
            }
            info!(session = name, old = %session.engine, new = %engine, "Engine switch, closing old session");
            session.close().await;
            *guard = Slot::Empty;
        }

        let browser = self.launcher.launch(engine).await?;
        let storage_state = if reuse_storage {
            self.load_storage_state(name)
        } else {
            None
        };

        let session = Arc::new(Session {
            name: name.to_string(),
            engine,
            browser,
            pool: Mutex::new(Vec::new()),
            storage_state: Mutex::new(storage_state),
        });

        *guard = Slot::Ready(Arc::clone(&session));
        info!(session = name, engine = %engine, "Session created");
        Ok((session, false))
    }

    pub async fn close_session(&self, name: &str) -> bool {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.remove(name)
        };
        match slot {
            Some(slot) => {
                let mut guard = slot.lock().await;
                if let Slot::Ready(session) = &*guard {
                    session.close().await;
                    *guard = Slot::Empty;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    pub async fn session_exists(&self, name: &str) -> bool {
        let slots = self.slots.lock().await;
        if let Some(slot) = slots.get(name) {
            matches!(&*slot.lock().await, Slot::Ready(_))
        } else {
            false
        }
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut names = Vec::new();
        for (name, slot) in slots.iter() {
            if matches!(&*slot.lock().await, Slot::Ready(_)) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }

    /// Serialize the page's cookies and web storage to the session's
    /// snapshot file; returns the path.
    pub async fn save_storage_state(
        &self,
        name: &str,
        page: &Arc<dyn PageHandle>,
    ) -> ValidatorResult<PathBuf> {
        let cookies = page.cookies().await.unwrap_or(serde_json::Value::Null);

        let storage = page
            .evaluate(
                r#"(function() {
                    const dump = (s) => { const out = {}; try { for (let i = 0; i < s.length; i++) { const k = s.key(i); out[k] = s.getItem(k); } } catch (e) {} return out; };
                    return JSON.stringify({
                        origin: window.location.origin,
                        localStorage: dump(window.localStorage),
                        sessionStorage: dump(window.sessionStorage)
                    });
                })()"#,
            )
            .await
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .and_then(|raw| serde_json::from_str::<serde_json::Value>(&raw).ok());

        let mut state = StorageState {
            cookies,
            saved_at: Some(crate::types::now_rfc3339()),
            ..StorageState::default()
        };
        if let Some(parsed) = storage {
            state.origin = parsed
                .get("origin")
                .and_then(|v| v.as_str())
                .filter(|o| *o != "null")
                .map(str::to_string);
            for (field, target) in [
                ("localStorage", &mut state.local_storage),
                ("sessionStorage", &mut state.session_storage),
            ] {
                if let Some(map) = parsed.get(field).and_then(|v| v.as_object()) {
                    for (key, value) in map {
                        if let Some(value) = value.as_str() {
                            target.insert(key.clone(), value.to_string());
                        }
                    }
                }
            }
        }

        std::fs::create_dir_all(&self.sessions_dir)?;
        let path = self.snapshot_path(name);
        std::fs::write(&path, serde_json::to_string_pretty(&state)?)?;
        debug!(session = name, path = %path.display(), "Storage state saved");
        Ok(path)
    }

    /// Parsed snapshot, or None when absent or unreadable
    pub fn load_storage_state(&self, name: &str) -> Option<StorageState> {
        let path = self.snapshot_path(name);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(session = name, error = %e, "Corrupt storage-state snapshot ignored");
                None
            }
        }
    }

    /// Close every live session (process-exit path)
    pub async fn close_all(&self) {
        let names = self.list_sessions().await;
        for name in names {
            self.close_session(&name).await;
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions_dir", &self.sessions_dir)
            .finish()
    }
}
