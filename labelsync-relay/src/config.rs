//! Relay server configuration.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub storage_path: PathBuf,
    pub max_payload_size: usize,
    pub max_labels_per_wallet: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9090".to_string(),
            storage_path: PathBuf::from("labels.db"),
            max_payload_size: 1_048_576,
            max_labels_per_wallet: 100_000,
        }
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml_dep::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid listen_addr '{}'", self.listen_addr))?;
        if self.max_payload_size == 0 {
            bail!("max_payload_size must be non-zero");
        }
        if self.max_labels_per_wallet == 0 {
            bail!("max_labels_per_wallet must be non-zero");
        }
        Ok(())
    }
}
