// config.rs - Watch loop configuration.
//
// Loaded from an optional TOML file; every field has a default so a partial
// file (or none at all) works:
//
//   policy_path = "aas.policy.txt"
//   out_root = "--out"
//   debounce_ms = 300
//   read_attempts = 5
//   read_backoff_ms = 100

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Default policy file name inside a project root.
pub const POLICY_FILE_NAME: &str = "aas.policy.txt";

/// Configuration for the policy watch loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// The policy file to watch.
    pub policy_path: PathBuf,
    /// Root for `system/` and `policy/history/` output.
    pub out_root: PathBuf,
    /// Quiet window after the last filesystem event before evaluating.
    pub debounce_ms: u64,
    /// Read attempts before giving up on a locked or vanished file.
    pub read_attempts: u32,
    pub read_backoff_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            policy_path: PathBuf::from(POLICY_FILE_NAME),
            out_root: PathBuf::from("."),
            debounce_ms: 300,
            read_attempts: 5,
            read_backoff_ms: 100,
        }
    }
}

impl WatchConfig {
    /// Defaults for a project rooted at `root`.
    pub fn for_project(root: &Path) -> Self {
        Self {
            policy_path: root.join(POLICY_FILE_NAME),
            out_root: root.to_path_buf(),
            ..Self::default()
        }
    }

    /// Load from a TOML file. Relative paths in the file resolve against
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let content = std::fs::read_to_string(path).map_err(|e| PolicyError::io(path, e))?;
        let mut config: Self = toml::from_str(&content).map_err(|e| PolicyError::Config {
            path: path.to_path_buf(),
            source: e,
        })?;
        if let Some(base) = path.parent() {
            if config.policy_path.is_relative() {
                config.policy_path = base.join(&config.policy_path);
            }
            if config.out_root.is_relative() {
                config.out_root = base.join(&config.out_root);
            }
        }
        Ok(config)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_project_paths() {
        let config = WatchConfig::for_project(Path::new("/proj"));
        assert_eq!(config.policy_path, Path::new("/proj/aas.policy.txt"));
        assert_eq!(config.out_root, Path::new("/proj"));
        assert_eq!(config.debounce(), Duration::from_millis(300));
        assert_eq!(config.read_attempts, 5);
    }

    #[test]
    fn partial_toml_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watch.toml");
        std::fs::write(&path, "debounce_ms = 250\nout_root = \"--out\"\n").unwrap();

        let config = WatchConfig::load(&path).unwrap();
        assert_eq!(config.debounce_ms, 250);
        assert_eq!(config.read_backoff_ms, 100);
        assert_eq!(config.out_root, dir.path().join("--out"));
        assert_eq!(config.policy_path, dir.path().join(POLICY_FILE_NAME));
    }

    #[test]
    fn invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watch.toml");
        std::fs::write(&path, "debounce_ms = \"soon\"\n").unwrap();
        assert!(matches!(WatchConfig::load(&path), Err(PolicyError::Config { .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = WatchConfig::load(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(PolicyError::Io { .. })));
    }
}
