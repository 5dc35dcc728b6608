//! Configuration file.
//!
//! ```json
//! {
//!   "cluster": { "name": "kube", "location": "westeurope", "server_pools": [...] },
//!   "catalog": { "images": {...}, "tiers": {...} },
//!   "reconcile": { "operation_timeout_secs": 600 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::CatalogConfig;
use crate::cluster::Cluster;
use crate::resource::DEFAULT_OPERATION_TIMEOUT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

fn default_timeout_secs() -> u64 {
    DEFAULT_OPERATION_TIMEOUT.as_secs()
}

/// Knobs for a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Upper bound on each provider completion wait.
    #[serde(default = "default_timeout_secs")]
    pub operation_timeout_secs: u64,
}

impl ReconcileSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            operation_timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub cluster: Cluster,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub reconcile: ReconcileSettings,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ServerPoolType;

    #[test]
    fn test_minimal_config() {
        let config = Config::from_json(
            r#"{
                "cluster": {
                    "name": "kube",
                    "server_pools": [
                        { "name": "kube-master", "type": "master", "image": "ubuntu-16.04-x64" }
                    ]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.cluster.name, "kube");
        assert_eq!(config.cluster.server_pools[0].pool_type, ServerPoolType::Master);
        assert_eq!(config.reconcile.operation_timeout(), DEFAULT_OPERATION_TIMEOUT);
        assert!(config.catalog.images.is_empty());
    }

    #[test]
    fn test_timeout_override() {
        let config = Config::from_json(
            r#"{ "cluster": { "name": "kube" }, "reconcile": { "operation_timeout_secs": 30 } }"#,
        )
        .unwrap();
        assert_eq!(config.reconcile.operation_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_config() {
        let result = Config::from_json(r#"{ "cluster": { "server_pools": [] } }"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/fleetform.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
