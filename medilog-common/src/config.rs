//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Name of the database file inside the root folder
pub const DATABASE_FILE: &str = "medilog.db";

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return Ok(PathBuf::from(path));
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = locate_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return Ok(PathBuf::from(root_folder));
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(default_root_folder())
}

/// Path of the SQLite database inside a resolved root folder
pub fn database_path(root_folder: &std::path::Path) -> PathBuf {
    root_folder.join(DATABASE_FILE)
}

/// Get default configuration file path for the platform
fn locate_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/medilog/config.toml first, then /etc/medilog/config.toml
        let user_config = dirs::config_dir().map(|d| d.join("medilog").join("config.toml"));
        let system_config = PathBuf::from("/etc/medilog/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    }

    let config_path = dirs::config_dir()
        .map(|d| d.join("medilog").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if config_path.exists() {
        Ok(config_path)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {:?}",
            config_path
        )))
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("medilog"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/medilog"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("medilog"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/medilog"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("medilog"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\medilog"))
    } else {
        PathBuf::from("./medilog_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_argument_wins() {
        let resolved = resolve_root_folder(Some("/tmp/medilog-test"), "MEDILOG_UNSET_VAR")
            .expect("resolution succeeds");
        assert_eq!(resolved, PathBuf::from("/tmp/medilog-test"));
    }

    #[test]
    fn test_database_path_appends_file_name() {
        let path = database_path(std::path::Path::new("/data/medilog"));
        assert_eq!(path, PathBuf::from("/data/medilog/medilog.db"));
    }
}
