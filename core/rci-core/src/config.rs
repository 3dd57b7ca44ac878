//! Agent configuration (`config.toml`).
//!
//! Every key is optional; a missing file yields the defaults.
//!
//! ```toml
//! name = "default"
//! global_path = "/etc/rci/hooks"
//! local_path = "/var/lib/rci-agent"
//! file_hooks = true
//! scan_interval_secs = 60
//! job_retention_hours = 10
//! log_dir = "/var/log/rci"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use fs_err as fs;
use serde::{Deserialize, Serialize};

use crate::error::{RciError, Result};

const DEFAULT_GLOBAL_PATH: &str = "/etc/rci/hooks";
const DEFAULT_LOCAL_DIR: &str = "rci-agent";
const CONFIG_RELATIVE_PATH: &str = "rci/config.toml";
const ASYNC_DIR: &str = "async";
const SOCKET_NAME: &str = "rci.sock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RciConfig {
    pub name: String,
    pub global_path: PathBuf,
    pub local_path: PathBuf,
    pub file_hooks: bool,
    pub scan_interval_secs: u64,
    pub job_retention_hours: u64,
    pub log_dir: Option<PathBuf>,
}

impl Default for RciConfig {
    fn default() -> Self {
        let local_base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
        RciConfig {
            name: "default".to_string(),
            global_path: PathBuf::from(DEFAULT_GLOBAL_PATH),
            local_path: local_base.join(DEFAULT_LOCAL_DIR),
            file_hooks: true,
            scan_interval_secs: 60,
            job_retention_hours: 10,
            log_dir: None,
        }
    }
}

impl RciConfig {
    /// `~/.config/rci/config.toml` (platform config dir).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_RELATIVE_PATH))
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(RciConfig::default());
        }

        let content = fs::read_to_string(path).map_err(|err| RciError::Config {
            path: path.to_path_buf(),
            details: err.to_string(),
        })?;
        toml::from_str(&content).map_err(|err| RciError::Config {
            path: path.to_path_buf(),
            details: err.to_string(),
        })
    }

    /// Writable root for this instance: `<local_path>/<name>/rci`.
    pub fn local_root(&self) -> PathBuf {
        self.local_path.join(&self.name).join("rci")
    }

    pub fn async_dir(&self) -> PathBuf {
        self.local_root().join(ASYNC_DIR)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.local_root().join(SOCKET_NAME)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_hours * 3600)
    }

    /// Scan roots in scan order: global first, then local.
    pub fn scan_roots(&self) -> Vec<PathBuf> {
        vec![self.global_path.clone(), self.local_root()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = RciConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, RciConfig::default());
        assert_eq!(config.retention(), Duration::from_secs(36_000));
        assert_eq!(config.scan_interval(), Duration::from_secs(60));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
name = "router"
local_path = "/srv/agent"
scan_interval_secs = 5
"#,
        )
        .unwrap();

        let config = RciConfig::load(&path).unwrap();
        assert_eq!(config.name, "router");
        assert_eq!(config.local_root(), PathBuf::from("/srv/agent/router/rci"));
        assert_eq!(config.async_dir(), PathBuf::from("/srv/agent/router/rci/async"));
        assert_eq!(config.scan_interval(), Duration::from_secs(5));
        assert_eq!(config.job_retention_hours, 10);
        assert!(config.file_hooks);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "scan_interval_secs = \"soon\"").unwrap();

        let err = RciConfig::load(&path).unwrap_err();
        assert!(matches!(err, RciError::Config { .. }));
    }
}
