use serde::{Deserialize, Serialize};
use tether_glue::serializer::{CURRENT_FORMAT_VERSION, DEFAULT_MAX_DEPTH};
use tether_glue::Envelope;

/// Synchronization session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Version tag written on expanded objects
    #[serde(default = "default_format_version")]
    pub format_version: u32,

    /// Name of the operation wrapping every outbound description
    #[serde(default = "default_envelope_operation")]
    pub envelope_operation: String,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Detach nodes that are no longer reachable from the bound root at the
    /// end of every tick
    #[serde(default = "default_auto_detach")]
    pub auto_detach: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_format_version() -> u32 {
    CURRENT_FORMAT_VERSION
}

fn default_envelope_operation() -> String {
    Envelope::DEFAULT_OPERATION.to_string()
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

fn default_auto_detach() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            format_version: default_format_version(),
            envelope_operation: default_envelope_operation(),
            max_depth: default_max_depth(),
            auto_detach: default_auto_detach(),
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "formatVersion": 2,
            "envelopeOperation": "cmd",
            "autoDetach": false
        }"#;

        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.format_version, 2);
        assert_eq!(config.envelope_operation, "cmd");
        assert!(!config.auto_detach);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.format_version, 3);
        assert_eq!(config.envelope_operation, "apply");
    }
}
