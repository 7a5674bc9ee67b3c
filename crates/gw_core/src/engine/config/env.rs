use std::{env, fs};

use super::ExperimentConfig;
use crate::error::{CoreError, Result};

pub const CONFIG_PATH_ENV: &str = "GW_CONFIG_PATH";

/// Reads the JSON config named by `GW_CONFIG_PATH`. Unset or blank gives `None`.
pub fn load_from_env() -> Result<Option<ExperimentConfig>> {
    let Ok(path) = env::var(CONFIG_PATH_ENV) else {
        return Ok(None);
    };

    let path = path.trim();
    if path.is_empty() {
        return Ok(None);
    }

    load_from_path(path).map(Some)
}

pub fn load_from_path(path: &str) -> Result<ExperimentConfig> {
    let content = fs::read_to_string(path).map_err(|e| {
        CoreError::InvalidConfig(format!("Failed to read config file from {CONFIG_PATH_ENV}='{path}': {e}"))
    })?;

    let config = ExperimentConfig::from_json(&content).map_err(|e| {
        CoreError::InvalidConfig(format!("Failed to parse config JSON from {CONFIG_PATH_ENV}='{path}': {e}"))
    })?;

    config.validate()?;
    tracing::info!(path, "loaded experiment config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_loads_written_file() {
        let dir = env::temp_dir().join(format!("gw_cfg_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("cfg.json");
        fs::write(&file, r#"{"grid":{"size":11,"max_game_length":40}}"#).unwrap();

        let cfg = load_from_path(file.to_str().unwrap()).unwrap();
        assert_eq!(cfg.grid.size, 11);

        let _ = fs::remove_dir_all(&dir);
    }
}
