//! Remote object storage credentials and endpoint

use serde::{Deserialize, Serialize};

/// Addressing style for S3-compatible endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlStyle {
    #[default]
    Vhost,
    Path,
}

impl UrlStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlStyle::Vhost => "vhost",
            UrlStyle::Path => "path",
        }
    }
}

/// Storage configuration applied to the execution context before queries
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub url_style: UrlStyle,
    pub use_ssl: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            url_style: UrlStyle::default(),
            use_ssl: true,
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("StorageConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &redact(&self.secret_access_key))
            .field("session_token", &redact(&self.session_token))
            .field("url_style", &self.url_style)
            .field("use_ssl", &self.use_ssl)
            .finish()
    }
}

impl StorageConfig {
    /// Session settings carrying this configuration.
    ///
    /// Every key is always present so that clearing a value also clears it in
    /// the execution context.
    pub fn to_settings(&self) -> Vec<(String, String)> {
        let value = |v: &Option<String>| v.clone().unwrap_or_default();
        vec![
            ("s3_region".to_string(), value(&self.region)),
            ("s3_endpoint".to_string(), value(&self.endpoint)),
            ("s3_access_key_id".to_string(), value(&self.access_key_id)),
            ("s3_secret_access_key".to_string(), value(&self.secret_access_key)),
            ("s3_session_token".to_string(), value(&self.session_token)),
            ("s3_url_style".to_string(), self.url_style.as_str().to_string()),
            ("s3_use_ssl".to_string(), self.use_ssl.to_string()),
        ]
    }
}

/// A storage configuration tagged with the version it was set at
#[derive(Debug, Clone, Default)]
pub struct StorageSnapshot {
    pub version: u64,
    pub config: StorageConfig,
}
