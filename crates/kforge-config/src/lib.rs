//! kforge configuration
//!
//! Engine tuning ([`EngineConfig`]), cloud credentials read from the
//! environment ([`credentials`]), and the tracing subscriber used by
//! front-ends ([`logging`]).

pub mod credentials;
pub mod engine;
pub mod error;
pub mod logging;

pub use credentials::{AliCredentials, AzureAuth, AzureCredentials};
pub use engine::{DeletionPolicy, EngineConfig, PollPolicy, RetryPolicy};
pub use error::*;

use std::path::PathBuf;

pub const CONFIG_PATH_ENV: &str = "KFORGE_CONFIG_PATH";

const CONFIG_FILE_NAMES: [&str; 2] = ["kforge.yaml", ".kforge.yaml"];

/// Returns `~/.config/kforge`, creating it when missing
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("kforge");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// Locates the engine config file.
///
/// Search order:
/// 1. `KFORGE_CONFIG_PATH`
/// 2. the current directory: `kforge.yaml`, `.kforge.yaml`
/// 3. `~/.config/kforge/kforge.yaml`
pub fn find_config_file() -> Result<PathBuf> {
    if let Ok(config_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    let current_dir = std::env::current_dir()?;
    for filename in &CONFIG_FILE_NAMES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("kforge").join("kforge.yaml");
        if global_config.exists() {
            return Ok(global_config);
        }
    }

    Err(ConfigError::ConfigFileNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("kforge"));
        assert!(config_dir.exists());
    }

    #[test]
    #[serial]
    fn test_find_config_file_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        fs::write(temp_dir.path().join("kforge.yaml"), "concurrency: 4\n").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();
        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, find_config_file);
        std::env::set_current_dir(original_dir).unwrap();

        assert!(result.unwrap().ends_with("kforge.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_config_file_visible_first() {
        let temp_dir = tempfile::tempdir().unwrap();
        let original_dir = std::env::current_dir().unwrap();
        fs::write(temp_dir.path().join("kforge.yaml"), "").unwrap();
        fs::write(temp_dir.path().join(".kforge.yaml"), "").unwrap();

        std::env::set_current_dir(&temp_dir).unwrap();
        let result = temp_env::with_var_unset(CONFIG_PATH_ENV, find_config_file);
        std::env::set_current_dir(original_dir).unwrap();

        let path = result.unwrap();
        assert_eq!(path.file_name().unwrap(), "kforge.yaml");
    }

    #[test]
    #[serial]
    fn test_find_config_file_env_var() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("custom.yaml");
        fs::write(&config_path, "dryRun: true\n").unwrap();

        let result = temp_env::with_var(CONFIG_PATH_ENV, Some(config_path.as_os_str()), || {
            find_config_file()
        });
        assert_eq!(result.unwrap(), config_path);
    }
}
