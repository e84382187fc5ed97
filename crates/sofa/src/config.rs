//! Client configuration loaded from YAML, with environment overrides

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use sofa_api::DEFAULT_HEARTBEAT_MS;

pub const DEFAULT_URL: &str = "http://localhost:5984";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for a CouchDB server
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Timeout for buffered requests; change feeds are never timed out
    pub timeout_secs: u64,
    /// Heartbeat requested for change feeds opened through this config
    pub heartbeat_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            username: None,
            password: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            heartbeat_ms: DEFAULT_HEARTBEAT_MS,
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        Self::from_yaml(&content)
            .map_err(|e| Error::Config(format!("{} ({})", e, path.display())))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config YAML: {}", e)))
    }

    /// Override fields from `COUCHDB_URL`, `COUCHDB_USER` and `COUCHDB_PASSWORD`
    pub fn apply_env(self) -> Self {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("COUCHDB_URL") {
            self.url = url;
        }
        if let Some(user) = lookup("COUCHDB_USER") {
            self.username = Some(user);
        }
        if let Some(password) = lookup("COUCHDB_PASSWORD") {
            self.password = Some(password);
        }
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = ClientConfig::from_yaml("url: http://couch:5984\nusername: admin\n").unwrap();
        assert_eq!(config.url, "http://couch:5984");
        assert_eq!(config.username.as_deref(), Some("admin"));
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.heartbeat_ms, DEFAULT_HEARTBEAT_MS);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "url: http://db.internal:5984\ntimeout_secs: 0").unwrap();

        let config = ClientConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.url, "http://db.internal:5984");
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = ClientConfig::load_from_file(Path::new("/nonexistent/sofa.yaml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> =
            HashMap::from([("COUCHDB_URL", "http://env:5984"), ("COUCHDB_PASSWORD", "secret")]);
        let config = ClientConfig::default().apply_vars(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.url, "http://env:5984");
        assert_eq!(config.username, None);
        assert_eq!(config.password.as_deref(), Some("secret"));
    }
}
