use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tether_sync::SyncConfig;

pub const DEFAULT_CONFIG_NAME: &str = "tether.config.json";

/// Tether configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory holding fixture graphs
    #[serde(default = "default_fixtures_dir")]
    pub fixtures_dir: String,

    /// Synchronization session settings
    #[serde(flatten)]
    pub sync: SyncConfig,
}

fn default_fixtures_dir() -> String {
    "fixtures".to_string()
}

impl Config {
    /// Load config from a directory
    pub fn load(cwd: &str) -> anyhow::Result<Self> {
        let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            // Return default config if none exists
            Ok(Config::default())
        }
    }

    /// Get absolute path to the fixtures directory
    pub fn get_fixtures_dir(&self, cwd: &str) -> PathBuf {
        PathBuf::from(cwd).join(&self.fixtures_dir)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fixtures_dir: default_fixtures_dir(),
            sync: SyncConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "fixturesDir": "graphs",
            "formatVersion": 2,
            "autoDetach": false
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.fixtures_dir, "graphs");
        assert_eq!(config.sync.format_version, 2);
        assert!(!config.sync.auto_detach);
        assert_eq!(config.sync.envelope_operation, "apply");
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_NAME),
            r#"{"envelopeOperation": "cmd"}"#,
        )
        .unwrap();

        let config = Config::load(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(config.sync.envelope_operation, "cmd");
        assert_eq!(config.fixtures_dir, "fixtures");
    }

    #[test]
    fn test_written_config_round_trips() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"formatVersion\": 3"));
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
