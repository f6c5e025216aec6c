//! Persisted key/value configuration: `defaultGame`, `defaultStatus`,
//! `lastPromptedVersion`, `connectToMuc`.
//!
//! Config file: `config.toml`, searched at `~/.config/league-deceiver/`.

pub mod error;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, save_config, set_config_dir, update_config},
    schema::DeceiveConfig,
};
