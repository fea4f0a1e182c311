//! Execution context configuration

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Setting that turns off the engine's automatic GeoParquet geometry decoding
pub const GEOPARQUET_CONVERSION_SETTING: &str = "enable_geoparquet_conversion";

/// How the execution context is initialized
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Extensions loaded at initialization, in order
    pub extensions: Vec<String>,

    /// Rows per result chunk; cancellation is checked between chunks
    pub chunk_rows: usize,

    /// Keep GeoParquet geometry as raw WKB instead of letting the engine
    /// convert it, so the CRS chain sees the file's own metadata
    pub disable_geoparquet_conversion: bool,

    /// Session settings applied after the extensions are loaded
    pub settings: IndexMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["spatial".to_string(), "httpfs".to_string()],
            chunk_rows: 2048,
            disable_geoparquet_conversion: true,
            settings: IndexMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Add a session setting
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Every setting to apply at initialization, in order
    pub fn initial_settings(&self) -> Vec<(String, String)> {
        let mut settings = Vec::with_capacity(self.settings.len() + 1);
        if self.disable_geoparquet_conversion {
            settings.push((GEOPARQUET_CONVERSION_SETTING.to_string(), "false".to_string()));
        }
        settings.extend(self.settings.iter().map(|(k, v)| (k.clone(), v.clone())));
        settings
    }

    /// Chunk size with a floor of one row
    pub fn effective_chunk_rows(&self) -> usize {
        self.chunk_rows.max(1)
    }
}
