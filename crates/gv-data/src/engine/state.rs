//! Process-wide execution context state

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::config::{EngineConfig, StorageSnapshot};
use crate::context::Database;

/// What has been done to the current execution context.
///
/// Owned by the context worker and thrown away with the context on
/// force-cancel, so a fresh context always starts from a clean state.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EngineState {
    loaded_extensions: Vec<String>,
    settings: IndexMap<String, String>,
    storage_version: Option<u64>,
}

impl EngineState {
    /// Load extensions and apply initial settings to a new context.
    ///
    /// An extension that fails to load is logged and skipped; a setting that
    /// cannot be applied fails initialization.
    pub fn initialize(db: &mut dyn Database, config: &EngineConfig) -> anyhow::Result<Self> {
        let mut state = Self::default();

        for extension in &config.extensions {
            match db.load_extension(extension) {
                Ok(()) => {
                    debug!(extension = %extension, "Loaded extension");
                    state.loaded_extensions.push(extension.clone());
                }
                Err(error) => warn!(extension = %extension, error = %error, "Extension unavailable"),
            }
        }

        for (key, value) in config.initial_settings() {
            db.apply_setting(&key, &value)?;
            state.settings.insert(key, value);
        }

        Ok(state)
    }

    /// Reapply storage settings when `snapshot` is newer than what the context
    /// has. Returns whether anything was applied.
    pub fn sync_storage(&mut self, db: &mut dyn Database, snapshot: &StorageSnapshot) -> anyhow::Result<bool> {
        if self.storage_version == Some(snapshot.version) {
            return Ok(false);
        }

        for (key, value) in snapshot.config.to_settings() {
            db.apply_setting(&key, &value)?;
            self.settings.insert(key, value);
        }
        debug!(version = snapshot.version, "Applied storage configuration");
        self.storage_version = Some(snapshot.version);
        Ok(true)
    }

    pub fn loaded_extensions(&self) -> &[String] {
        &self.loaded_extensions
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn storage_version(&self) -> Option<u64> {
        self.storage_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::context::SqliteContext;

    #[test]
    fn test_initialize_skips_missing_extensions() {
        let config = EngineConfig::default();
        let mut db = SqliteContext::open_in_memory(&config).unwrap();
        let state = EngineState::initialize(&mut db, &config).unwrap();
        assert_eq!(state.loaded_extensions(), &["spatial".to_string()]);
        assert_eq!(state.setting("enable_geoparquet_conversion"), Some("false"));
    }

    #[test]
    fn test_storage_applied_once_per_version() {
        let config = EngineConfig::default();
        let mut db = SqliteContext::open_in_memory(&config).unwrap();
        let mut state = EngineState::initialize(&mut db, &config).unwrap();

        let mut snapshot = StorageSnapshot {
            version: 1,
            config: StorageConfig {
                region: Some("us-east-2".into()),
                ..Default::default()
            },
        };
        assert!(state.sync_storage(&mut db, &snapshot).unwrap());
        assert!(!state.sync_storage(&mut db, &snapshot).unwrap());
        assert_eq!(db.setting("s3_region").as_deref(), Some("us-east-2"));

        snapshot.version = 2;
        snapshot.config.region = None;
        assert!(state.sync_storage(&mut db, &snapshot).unwrap());
        assert_eq!(db.setting("s3_region").as_deref(), Some(""));
        assert_eq!(state.storage_version(), Some(2));
    }
}
