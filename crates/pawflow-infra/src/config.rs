//! Engine configuration loader.
//!
//! Reads `pawflow.toml` and deserializes it into [`EngineConfig`]. The data
//! directory comes from `PAWFLOW_DATA_DIR`, falling back to the platform data
//! directory (`~/.local/share/pawflow` on Linux).

use std::path::{Path, PathBuf};

use pawflow_types::config::EngineConfig;

/// Default config file name inside the data directory.
pub const CONFIG_FILE_NAME: &str = "pawflow.toml";

/// Errors from loading an explicitly requested config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Resolve the data directory.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PAWFLOW_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pawflow")
}

/// Load `{data_dir}/pawflow.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or malformed file: a warning, then the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE_NAME);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE_NAME} found at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            EngineConfig::default()
        }
    }
}

/// Load a config file the operator named explicitly. Errors are not masked.
pub async fn load_engine_config_from(path: &Path) -> Result<EngineConfig, ConfigError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
