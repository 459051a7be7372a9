mod config;
pub mod database;
pub mod migrations;

pub use config::Config;
pub use database::{FamilyRow, SessionInput, SessionRecord, Store, StudentInput, StudentRecord};

use std::path::PathBuf;

/// Returns `~/.config/lectio[-dev]/` based on LECTIO_ENV.
///
/// Set LECTIO_ENV=dev to use the development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("LECTIO_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("lectio-dev")
    } else {
        base_dir.join("lectio")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
