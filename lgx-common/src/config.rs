//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. `root_folder` from the service TOML config
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_root_folder: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_root_folder {
        return path.to_path_buf();
    }

    default_root_folder()
}

/// Locate the TOML config file for a service
///
/// Looks for `<config dir>/lgx/<service>.toml`, then `/etc/lgx/<service>.toml`
/// on Linux. Returns `None` when neither exists; services then run on defaults.
pub fn default_config_path(service_name: &str) -> Option<PathBuf> {
    let file_name = format!("{}.toml", service_name);

    let user_config = dirs::config_dir().map(|d| d.join("lgx").join(&file_name));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/lgx").join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load a TOML config file into `T`
///
/// A missing file yields `T::default()`; a malformed file is an error
/// (fail-fast on misconfiguration).
pub fn load_toml<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        return Ok(T::default());
    };

    if !path.exists() {
        tracing::warn!("Config file {} not found, using defaults", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/lgx (or /var/lib/lgx for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("lgx"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/lgx"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("lgx"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/lgx"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("lgx"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\lgx"))
    } else {
        PathBuf::from("./lgx_data")
    }
}
