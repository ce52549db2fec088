//! Sync configuration file.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scalesync_common::{Error, Result};
use scalesync_targets::TargetConfig;

/// Per-operation timeout used when the configuration does not set one.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 20;

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Bound on every connect and every operation, in seconds.
    #[serde(default = "default_timeout")]
    pub operation_timeout_secs: u64,
    /// Targets in dispatch order.
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

fn default_timeout() -> u64 {
    DEFAULT_OPERATION_TIMEOUT_SECS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            targets: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// `<config dir>/scalesync/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("scalesync").join("config.json"))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from JSON and validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, or the default configuration if it does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, self.to_json()?).await?;
        Ok(())
    }

    /// Check invariants the orchestrator relies on.
    ///
    /// # Errors
    /// - `Config` for a zero timeout, an empty or a duplicate target name
    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_secs == 0 {
            return Err(Error::Config("operation_timeout_secs must be positive".to_string()));
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if target.name.trim().is_empty() {
                return Err(Error::Config("target name must not be empty".to_string()));
            }
            if !names.insert(target.name.as_str()) {
                return Err(Error::Config(format!("duplicate target name '{}'", target.name)));
            }
        }
        Ok(())
    }

    pub fn target(&self, name: &str) -> Option<&TargetConfig> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Switch a configured target on or off.
    ///
    /// # Errors
    /// - `NotFound` if no target has that name
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let target = self
            .targets
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::NotFound(format!("target '{}'", name)))?;
        target.enabled = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scalesync_targets::TargetKind;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config = SyncConfig::from_json("{}").unwrap();
        assert_eq!(config.operation_timeout(), Duration::from_secs(20));
        assert!(config.targets.is_empty());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let json = r#"{
            "targets": [
                { "kind": "mqtt", "name": "home" },
                { "kind": "fitness", "name": "home" }
            ]
        }"#;
        assert!(matches!(SyncConfig::from_json(json), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(SyncConfig::from_json(r#"{ "operation_timeout_secs": 0 }"#).is_err());
    }

    #[test]
    fn test_set_enabled() {
        let mut config = SyncConfig {
            targets: vec![TargetConfig::new(TargetKind::Health, "health").with_enabled(false)],
            ..SyncConfig::default()
        };
        config.set_enabled("health", true).unwrap();
        assert!(config.target("health").unwrap().enabled);
        assert!(matches!(config.set_enabled("nope", true), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scalesync").join("config.json");

        assert_eq!(SyncConfig::load(&path).await.unwrap(), SyncConfig::default());

        let config = SyncConfig {
            operation_timeout_secs: 5,
            targets: vec![TargetConfig::new(TargetKind::Fitness, "wger")
                .with_settings(serde_json::json!({ "base_url": "http://localhost:8000/api/v2/" }))],
        };
        config.save(&path).await.unwrap();
        assert_eq!(SyncConfig::load(&path).await.unwrap(), config);
    }
}
