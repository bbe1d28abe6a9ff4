//! Per-identity browser session persistence.
//!
//! Two artifacts live under `{auth_root}/{identity}/`:
//!
//! - `storage_state.json` - the driver's own cookie/local-storage export.
//!   Opaque to us; round-tripped byte-for-byte.
//! - `session_storage.json` - our own `{origin, data}` snapshot. The driver's
//!   storage-state export does not include session-scoped storage, so we
//!   capture it ourselves via in-page script evaluation and restore it with
//!   an origin-gated init script.
//!
//! Everything here is best-effort: a failed load or export is logged and the
//! task carries on without persisted state.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::driver::BrowserSession;

const STORAGE_STATE_FILE: &str = "storage_state.json";
const SESSION_STORAGE_FILE: &str = "session_storage.json";

/// Namespace for session state and downloads, derived from the caller's
/// customer key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn from_customer_id(customer_id: Option<i64>) -> Self {
        match customer_id {
            Some(id) => Self(format!("customer_{}", id)),
            None => Self("default".to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session-scoped storage snapshot for one origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStorageSnapshot {
    pub origin: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Reads and writes per-identity session state files.
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn identity_dir(&self, identity: &Identity) -> PathBuf {
        self.root.join(identity.as_str())
    }

    pub fn storage_state_path(&self, identity: &Identity) -> PathBuf {
        self.identity_dir(identity).join(STORAGE_STATE_FILE)
    }

    pub fn session_storage_path(&self, identity: &Identity) -> PathBuf {
        self.identity_dir(identity).join(SESSION_STORAGE_FILE)
    }

    /// Path to an existing storage-state blob, or `None` if this identity has
    /// never completed a task. Absence is a normal state, not an error.
    pub fn load_storage_state(&self, identity: &Identity) -> Option<PathBuf> {
        let path = self.storage_state_path(identity);
        if path.exists() {
            tracing::info!("Loading existing storage_state: {}", path.display());
            Some(path)
        } else {
            tracing::info!(
                "No storage_state file found yet at {}; starting fresh session",
                path.display()
            );
            None
        }
    }

    /// Prepare origin-gated restoration of session storage.
    ///
    /// Must run after the session's control channel is up but before
    /// navigation begins; the injected init script applies the snapshot on
    /// the next page load, and only when the page's origin matches.
    pub async fn restore_session_storage(
        &self,
        session: &dyn BrowserSession,
        identity: &Identity,
    ) {
        let path = self.session_storage_path(identity);
        if !path.exists() {
            tracing::info!("No sessionStorage file found at {}", path.display());
            return;
        }

        let snapshot: SessionStorageSnapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to parse sessionStorage file {}: {}", path.display(), e);
                    return;
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read sessionStorage file {}: {}", path.display(), e);
                return;
            }
        };

        if snapshot.data.is_empty() {
            tracing::info!("SessionStorage file exists but contains no data");
            return;
        }

        let script = build_restore_script(&snapshot);
        match session.add_init_script(&script).await {
            Ok(()) => tracing::info!(
                "Prepared sessionStorage restoration for origin: {} ({} items)",
                snapshot.origin,
                snapshot.data.len()
            ),
            Err(e) => tracing::warn!("Failed to restore sessionStorage: {}", e),
        }
    }

    /// Export the driver's storage-state blob for this identity.
    ///
    /// Must be called while the session is still open; the driver cannot
    /// export state from a closed session.
    pub async fn export_storage_state(&self, session: &dyn BrowserSession, identity: &Identity) {
        let path = self.storage_state_path(identity);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::error!("Failed to create session state dir {}: {}", parent.display(), e);
                return;
            }
        }
        match session.export_storage_state(&path).await {
            Ok(()) => tracing::info!("Saved storage_state to {}", path.display()),
            Err(e) => tracing::error!("Failed to save storage_state: {}", e),
        }
    }

    /// Capture session-scoped storage from the active page and persist it.
    /// No-op with a warning when no page is open.
    pub async fn export_session_storage(&self, session: &dyn BrowserSession, identity: &Identity) {
        let result = match session.eval_in_active_page(EXPORT_SCRIPT).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::warn!("No active page to export sessionStorage from");
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to export sessionStorage: {}", e);
                return;
            }
        };

        // The driver may hand back the JSON text itself rather than the
        // parsed object.
        let snapshot: SessionStorageSnapshot = match &result {
            serde_json::Value::String(text) => match serde_json::from_str(text) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to parse sessionStorage export: {}", e);
                    return;
                }
            },
            other => match serde_json::from_value(other.clone()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to parse sessionStorage export: {}", e);
                    return;
                }
            },
        };

        let path = self.session_storage_path(identity);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!("Failed to create session state dir {}: {}", parent.display(), e);
                return;
            }
        }

        let json = match serde_json::to_vec_pretty(&snapshot) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!("Failed to serialize sessionStorage snapshot: {}", e);
                return;
            }
        };
        match tokio::fs::write(&path, json).await {
            Ok(()) => tracing::info!(
                "Exported {} sessionStorage items from {}",
                snapshot.data.len(),
                snapshot.origin
            ),
            Err(e) => tracing::warn!("Failed to write sessionStorage file {}: {}", path.display(), e),
        }
    }
}

/// Script evaluated in the active page to capture session storage.
const EXPORT_SCRIPT: &str = r#"() => {
    const data = {};
    for (let i = 0; i < sessionStorage.length; i++) {
        const key = sessionStorage.key(i);
        data[key] = sessionStorage.getItem(key);
    }
    return JSON.stringify({
        origin: window.location.origin,
        data: data
    });
}"#;

/// Build the init script that restores a snapshot into matching-origin pages.
///
/// Session storage is strictly origin-scoped; restoring under the wrong
/// origin would write into another site's namespace, so a mismatched origin
/// skips restoration entirely.
fn build_restore_script(snapshot: &SessionStorageSnapshot) -> String {
    // serde_json renders both values as JS literals, so no manual escaping
    let origin = serde_json::to_string(&snapshot.origin).unwrap_or_else(|_| "\"\"".to_string());
    let data = serde_json::to_string(&snapshot.data).unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"(function() {{
    if (window.location.origin === {origin}) {{
        const storage = {data};
        for (const [key, value] of Object.entries(storage)) {{
            window.sessionStorage.setItem(key, value);
        }}
    }}
}})();"#
    )
}

/// Serializes whole task executions per identity so concurrent tasks never
/// race on one identity's session state files.
#[derive(Debug, Clone, Default)]
pub struct IdentityLocks {
    locks: Arc<Mutex<HashMap<Identity, Arc<Mutex<()>>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `identity`, waiting if another task holds it.
    pub async fn acquire(&self, identity: &Identity) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
