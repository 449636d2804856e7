//! Key/value settings file
//!
//! A JSON object mapping well-known keys to records. Other tools may keep
//! their own keys in the same file; unknown keys are preserved on write.

use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::persist::write_atomic;

pub struct SettingsStore {
    path: PathBuf,
    state: Mutex<Map<String, Value>>,
}

impl SettingsStore {
    /// Load settings from `path`. A missing file is an empty store; the file
    /// is created on the first `set`.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Settings(format!("reading {}: {e}", path.display())))?;
            let map: Map<String, Value> = serde_json::from_str(&contents)
                .map_err(|e| Error::Settings(format!("parsing {}: {e}", path.display())))?;
            info!(path = %path.display(), keys = map.len(), "loaded settings");
            map
        } else {
            info!(path = %path.display(), "settings file not found, using defaults");
            Map::new()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Raw record stored under `key`.
    pub async fn get_raw(&self, key: &str) -> Option<Value> {
        self.state.lock().await.get(key).cloned()
    }

    /// Typed record stored under `key`. `None` when absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::Settings(format!("decoding {key}: {e}"))),
            None => Ok(None),
        }
    }

    /// Store `value` under `key` and persist before returning.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| Error::Settings(format!("encoding {key}: {e}")))?;
        let mut state = self.state.lock().await;
        state.insert(key.to_string(), value);

        let json = serde_json::to_vec_pretty(&*state)
            .map_err(|e| Error::Settings(format!("serializing settings: {e}")))?;
        write_atomic(&self.path, &json)
            .await
            .map_err(|e| Error::Settings(format!("writing {}: {e}", self.path.display())))?;
        debug!(key, "saved setting");
        Ok(())
    }
}
