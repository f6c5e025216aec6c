use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use tracing::{debug, warn};

use crate::{
    error::{Context as _, Result},
    schema::DeceiveConfig,
};

const CONFIG_FILENAME: &str = "config.toml";

static CONFIG_DIR_OVERRIDE: OnceLock<std::sync::Mutex<Option<PathBuf>>> = OnceLock::new();

fn override_slot() -> &'static std::sync::Mutex<Option<PathBuf>> {
    CONFIG_DIR_OVERRIDE.get_or_init(|| std::sync::Mutex::new(None))
}

/// Overrides the config directory for the remainder of the process
/// (used by `--config-dir` on the CLI, and by tests).
pub fn set_config_dir(dir: PathBuf) {
    let mut slot = override_slot().lock().unwrap_or_else(|p| p.into_inner());
    *slot = Some(dir);
}

/// Returns the config directory (`~/.config/league-deceiver/` by default).
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(dir) = override_slot().lock().unwrap_or_else(|p| p.into_inner()).clone() {
        return dir;
    }
    directories::ProjectDirs::from("", "", "league-deceiver")
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".league-deceiver"))
}

fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILENAME)
}

/// Loads the config file, falling back to defaults if it's missing or
/// fails to parse (logged, never fatal — this mirrors how the upstream
/// bootstrap fetch's own parse failures are handled: best effort, never
/// blocks startup).
#[must_use]
pub fn discover_and_load() -> DeceiveConfig {
    let path = config_path();
    match load(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            if path.exists() {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            } else {
                debug!(path = %path.display(), "no config file found, using defaults");
            }
            DeceiveConfig::default()
        },
    }
}

fn load(path: &Path) -> Result<DeceiveConfig> {
    let raw = std::fs::read_to_string(path).context("read config file")?;
    let cfg = toml::from_str(&raw).context("parse config file")?;
    Ok(cfg)
}

/// Serializes `config` to TOML and writes it to the config directory,
/// creating parent directories as needed.
pub fn save_config(config: &DeceiveConfig) -> Result<PathBuf> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("create config directory")?;
    }
    let toml_str = toml::to_string_pretty(config).context("serialize config")?;
    std::fs::write(&path, toml_str).context("write config file")?;
    debug!(path = %path.display(), "saved config");
    Ok(path)
}

/// Loads the current config, applies `mutate`, and saves it back.
pub fn update_config(mutate: impl FnOnce(&mut DeceiveConfig)) -> Result<DeceiveConfig> {
    let mut cfg = discover_and_load();
    mutate(&mut cfg);
    save_config(&cfg)?;
    Ok(cfg)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    // `set_config_dir` mutates process-global state; cargo runs tests in
    // this module on multiple threads by default, so each test takes this
    // lock for its duration to avoid stomping on another test's override.
    static TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let tmp = tempfile::tempdir().unwrap();
        set_config_dir(tmp.path().to_path_buf());
        let cfg = discover_and_load();
        assert_eq!(cfg, DeceiveConfig::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let tmp = tempfile::tempdir().unwrap();
        set_config_dir(tmp.path().to_path_buf());
        let cfg = DeceiveConfig {
            default_game: Some("valorant".to_string()),
            default_status: "mobile".to_string(),
            last_prompted_version: None,
            connect_to_muc: false,
        };
        save_config(&cfg).unwrap();
        assert_eq!(discover_and_load(), cfg);
    }

    #[test]
    fn update_config_mutates_and_persists() {
        let _guard = TEST_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let tmp = tempfile::tempdir().unwrap();
        set_config_dir(tmp.path().to_path_buf());
        update_config(|c| c.default_status = "online".to_string()).unwrap();
        assert_eq!(discover_and_load().default_status, "online");
    }
}
