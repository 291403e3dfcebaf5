//! Where the client keeps its files.

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{SnError, SnResult};

/// Overrides the config directory, e.g. to run two sessions side by side.
pub const CONFIG_DIR_ENV: &str = "SOCIAL_NET_CONFIG_DIR";

/// Per-user directories of the client, namespaced by [`APP_NAME`].
pub struct Platform;

impl Platform {
    /// Application data directory.
    ///
    /// - Windows: `%APPDATA%/SocialNetwork`
    /// - macOS: `~/Library/Application Support/SocialNetwork`
    /// - Linux: `~/.local/share/SocialNetwork`
    pub fn data_dir() -> SnResult<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| SnError::Config("could not determine data directory".into()))?;
        Ok(base.join(APP_NAME))
    }

    /// Configuration directory. [`CONFIG_DIR_ENV`] wins when set and non-empty.
    pub fn config_dir() -> SnResult<PathBuf> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        let base = dirs::config_dir()
            .ok_or_else(|| SnError::Config("could not determine config directory".into()))?;
        Ok(base.join(APP_NAME))
    }

    /// Default directory for rolling log files.
    pub fn log_dir() -> SnResult<PathBuf> {
        Ok(Self::data_dir()?.join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_are_namespaced() {
        if let Ok(dir) = Platform::data_dir() {
            assert!(dir.ends_with(APP_NAME));
        }
        if let Ok(dir) = Platform::log_dir() {
            assert!(dir.ends_with("logs"));
            assert!(dir.parent().is_some_and(|p| p.ends_with(APP_NAME)));
        }
    }

    #[test]
    fn test_config_dir_override() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(CONFIG_DIR_ENV, dir.path());
        let resolved = Platform::config_dir().unwrap();
        std::env::remove_var(CONFIG_DIR_ENV);
        assert_eq!(resolved, dir.path());
    }
}
