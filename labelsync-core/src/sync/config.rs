//! Label service endpoint configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Result, SyncError};

/// Default label service host
pub const DEFAULT_HOST: &str = "sync.bytesized-hosting.com";

/// Default label service port
pub const DEFAULT_PORT: u16 = 9090;

/// Where and how to reach the label service.
///
/// The scheme is always HTTPS; only host and port are configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub host: String,
    pub port: u16,
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout_secs: 30,
        }
    }
}

impl SyncConfig {
    /// Load a TOML config file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("invalid {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No sync config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse a `host:port` target
    pub fn from_target(target: &str) -> Result<Self> {
        let (host, port) = target
            .rsplit_once(':')
            .ok_or_else(|| SyncError::Config(format!("expected host:port, got '{}'", target)))?;
        let port = port
            .parse()
            .map_err(|_| SyncError::Config(format!("invalid port in '{}'", target)))?;

        let config = Self {
            host: host.to_string(),
            port,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() || self.host.contains('/') || self.host.contains("://") {
            return Err(SyncError::Config(format!("invalid host '{}'", self.host)));
        }
        if self.port == 0 {
            return Err(SyncError::Config("port must be non-zero".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(SyncError::Config("timeout_secs must be non-zero".to_string()));
        }
        Ok(())
    }

    /// `host:port`
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL every request is made against
    pub fn base_url(&self) -> String {
        format!("https://{}", self.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.target(), "sync.bytesized-hosting.com:9090");
        assert_eq!(config.base_url(), "https://sync.bytesized-hosting.com:9090");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_target() {
        let config = SyncConfig::from_target("labels.example.org:8443").unwrap();
        assert_eq!(config.host, "labels.example.org");
        assert_eq!(config.port, 8443);
        assert_eq!(config.base_url(), "https://labels.example.org:8443");

        assert!(SyncConfig::from_target("no-port").is_err());
        assert!(SyncConfig::from_target("host:notaport").is_err());
        assert!(SyncConfig::from_target("http://host:80").is_err());
    }

    #[test]
    fn load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labelsync.toml");
        std::fs::write(&path, "host = \"labels.local\"\n").unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.host, "labels.local");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn load_rejects_zero_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "port = 0\n").unwrap();
        assert!(matches!(SyncConfig::load(&path), Err(SyncError::Config(_))));
    }
}
