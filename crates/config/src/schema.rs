//! The persisted key/value state: `defaultGame` (string), `defaultStatus`
//! (string: `offline|online|mobile`; `online` maps to wire token `"chat"`),
//! `lastPromptedVersion` (string), `connectToMuc` (bool).

use serde::{Deserialize, Serialize};

fn default_status() -> String {
    "offline".to_string()
}

fn default_connect_to_muc() -> bool {
    true
}

/// Root persisted configuration, serialized as TOML at
/// `~/.config/league-deceiver/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeceiveConfig {
    /// Last game launched (`lol|valorant|lor|lion|riot-client|prompt`).
    pub default_game: Option<String>,
    /// Last status selected, as the CLI surface's string form.
    #[serde(default = "default_status")]
    pub default_status: String,
    /// Version string of the last "new version available" prompt shown,
    /// so it is not repeated every launch.
    pub last_prompted_version: Option<String>,
    /// Whether MUC/lobby presence should always pass through verbatim.
    #[serde(default = "default_connect_to_muc")]
    pub connect_to_muc: bool,
}

impl Default for DeceiveConfig {
    fn default() -> Self {
        Self {
            default_game: None,
            default_status: default_status(),
            last_prompted_version: None,
            connect_to_muc: default_connect_to_muc(),
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_defaults() {
        let cfg = DeceiveConfig::default();
        assert_eq!(cfg.default_status, "offline");
        assert!(cfg.connect_to_muc);
        assert!(cfg.default_game.is_none());
    }

    #[test]
    fn round_trips_through_toml_with_camel_case_keys() {
        let cfg = DeceiveConfig {
            default_game: Some("lol".to_string()),
            default_status: "mobile".to_string(),
            last_prompted_version: Some("1.2.3".to_string()),
            connect_to_muc: false,
        };
        let toml_str = toml::to_string(&cfg).unwrap();
        assert!(toml_str.contains("defaultGame"));
        assert!(toml_str.contains("connectToMuc"));
        let parsed: DeceiveConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, cfg);
    }
}
