//! Persistent client configuration file.

use std::path::{Path, PathBuf};

use wsm_core::config::ClientConfig;

const CONFIG_FILE_NAME: &str = "config.json";

pub fn default_config_path() -> Result<PathBuf, String> {
    if let Some(path) = std::env::var_os("WSM_CONFIG_PATH") {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("wsm").join(CONFIG_FILE_NAME))
        .ok_or_else(|| "Failed to resolve CLI config directory".to_string())
}

/// Load the config file, then apply environment overrides.
pub fn load_effective() -> Result<ClientConfig, String> {
    let mut config = load_from_path(&default_config_path()?)?;
    config
        .apply_env_overrides(|name| std::env::var(name).ok())
        .map_err(|error| format!("Invalid environment override: {error}"))?;
    Ok(config)
}

/// Load the config file without environment overrides, for editing.
pub fn load() -> Result<ClientConfig, String> {
    load_from_path(&default_config_path()?)
}

pub fn load_from_path(path: &Path) -> Result<ClientConfig, String> {
    if !path.exists() {
        return Ok(ClientConfig::default());
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
    ClientConfig::from_json(&raw)
        .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))
}

pub fn save(config: &ClientConfig) -> Result<PathBuf, String> {
    let path = default_config_path()?;
    save_to_path(config, &path)?;
    Ok(path)
}

pub fn save_to_path(config: &ClientConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            format!(
                "Failed to create config directory {}: {}",
                parent.display(),
                error
            )
        })?;
    }

    let serialized = config
        .to_json_pretty()
        .map_err(|error| format!("Failed to serialize config: {error}"))?;
    std::fs::write(path, serialized)
        .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn config_roundtrip_normalizes_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);

        let mut config = ClientConfig::default();
        config
            .set_value("api_base_url", " https://api.example.com/ ")
            .unwrap();
        config.set_value("autosave_interval_secs", "120").unwrap();

        save_to_path(&config, &path).unwrap();
        let loaded = load_from_path(&path).unwrap();
        assert_eq!(loaded.api_base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(loaded.autosave_interval_secs, 120);
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let error = load_from_path(&path).unwrap_err();
        assert!(error.contains(&path.display().to_string()));
    }
}
