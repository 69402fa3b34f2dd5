use dirs::home_dir;
use std::path::PathBuf;

/// Returns the DRK home directory, or None if the user's home cannot be resolved.
pub fn try_drk_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("DRK_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".drk"))
}

/// Returns the canonical DRK home directory (`~/.drk`).
///
/// # Panics
///
/// Panics if neither `DRK_HOME` is set nor the user's home directory can be
/// resolved.
pub fn drk_home() -> PathBuf {
    try_drk_home().expect("Could not determine home directory. Set DRK_HOME to override.")
}

/// Optional configuration file: ~/.drk/config.toml
pub fn config_path() -> PathBuf {
    drk_home().join("config.toml")
}

/// Built packages: ~/.drk/packages
pub fn packages_path() -> PathBuf {
    drk_home().join("packages")
}

/// `SQLite` version registry: ~/.drk/registry.db
pub fn db_path() -> PathBuf {
    drk_home().join("registry.db")
}

/// Default signing key written by `drk keygen`: ~/.drk/drk.key
pub fn key_path() -> PathBuf {
    drk_home().join("drk.key")
}
