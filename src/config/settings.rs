//! User-facing settings persisted as JSON.
//!
//! The UI stores its preferences (which upstream it talks to, whether it
//! connects on load) in `<data_dir>/settings.json`. The file is created with
//! defaults on first read. Reads are served from an `ArcSwap` cache; writes are
//! serialized and land atomically via a rename.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persisted settings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub upstream_url: String,
    pub backend_url: Option<String>,
    pub auto_connect: bool,
    pub last_updated: DateTime<Utc>,
}

/// A validated settings change.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsUpdate {
    pub upstream_url: String,
    pub backend_url: Option<String>,
    pub auto_connect: bool,
}

pub struct SettingsStore {
    path: PathBuf,
    default_upstream: String,
    current: ArcSwapOption<Settings>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(data_dir: impl AsRef<Path>, default_upstream: impl Into<String>) -> Self {
        Self {
            path: data_dir.as_ref().join(SETTINGS_FILE),
            default_upstream: default_upstream.into(),
            current: ArcSwapOption::empty(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current settings, reading (or creating) the file on first use.
    pub async fn load(&self) -> Result<Arc<Settings>, SettingsError> {
        if let Some(settings) = self.current.load_full() {
            return Ok(settings);
        }

        let _guard = self.write_lock.lock().await;
        // Another caller may have filled the cache while we waited.
        if let Some(settings) = self.current.load_full() {
            return Ok(settings);
        }

        let settings = match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice::<Settings>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let defaults = Settings {
                    upstream_url: self.default_upstream.clone(),
                    backend_url: None,
                    auto_connect: true,
                    last_updated: Utc::now(),
                };
                self.write(&defaults).await?;
                tracing::info!(path = %self.path.display(), "Created default settings file");
                defaults
            }
            Err(e) => return Err(e.into()),
        };

        let settings = Arc::new(settings);
        self.current.store(Some(Arc::clone(&settings)));
        Ok(settings)
    }

    /// Persist a change and make it the current settings.
    pub async fn save(&self, update: SettingsUpdate) -> Result<Arc<Settings>, SettingsError> {
        let _guard = self.write_lock.lock().await;

        let settings = Settings {
            upstream_url: update.upstream_url,
            backend_url: update.backend_url,
            auto_connect: update.auto_connect,
            last_updated: Utc::now(),
        };
        self.write(&settings).await?;

        let settings = Arc::new(settings);
        self.current.store(Some(Arc::clone(&settings)));
        tracing::info!(upstream_url = %settings.upstream_url, "Settings saved");
        Ok(settings)
    }

    async fn write(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let body = serde_json::to_vec_pretty(settings)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "comfy-gateway-{}-{}",
            name,
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = scratch_dir("defaults");
        let store = SettingsStore::new(&dir, "http://127.0.0.1:8188");

        let settings = store.load().await.unwrap();
        assert_eq!(settings.upstream_url, "http://127.0.0.1:8188");
        assert!(settings.auto_connect);
        assert_eq!(settings.backend_url, None);
        assert!(store.path().exists());

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(on_disk["upstreamUrl"], "http://127.0.0.1:8188");
        assert_eq!(on_disk["backendUrl"], serde_json::Value::Null);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn saved_settings_survive_a_new_store() {
        let dir = scratch_dir("save");
        let store = SettingsStore::new(&dir, "http://127.0.0.1:8188");
        store
            .save(SettingsUpdate {
                upstream_url: "http://gpu-box:8188".into(),
                backend_url: Some("http://api:9000".into()),
                auto_connect: false,
            })
            .await
            .unwrap();

        let reopened = SettingsStore::new(&dir, "http://ignored:1");
        let settings = reopened.load().await.unwrap();
        assert_eq!(settings.upstream_url, "http://gpu-box:8188");
        assert_eq!(settings.backend_url.as_deref(), Some("http://api:9000"));
        assert!(!settings.auto_connect);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let dir = scratch_dir("corrupt");
        std::fs::write(dir.join(SETTINGS_FILE), b"{not json").unwrap();
        let store = SettingsStore::new(&dir, "http://127.0.0.1:8188");
        assert!(matches!(store.load().await, Err(SettingsError::Json(_))));
        let _ = std::fs::remove_dir_all(dir);
    }
}
