//! Shared CLI helpers for workspace tools.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, Result};

pub fn setup_cli_logging(verbose: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::new("debug"),
        Err(_) => EnvFilter::new("info"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}

/// Loads a TOML run configuration, falling back to defaults when no file is given.
///
/// Keys missing from the file take their default values through `#[serde(default)]`.
pub fn load_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        debug!("No config file given, using defaults");
        return Ok(T::default());
    };
    if !path.is_file() {
        return Err(Error::NotFound(format!("Config file not found: {}", path.display())));
    }

    let content = fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config {}: {e}", path.display())))?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownsampleConfig;
    use tempfile::TempDir;

    #[test]
    fn test_load_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("downsample.toml");
        fs::write(&path, "target_per_class = 120\nseed = 7\n").unwrap();

        let config: DownsampleConfig = load_config(Some(&path)).unwrap();
        assert_eq!(config.target_per_class, 120);
        assert_eq!(config.seed, 7);
        assert_eq!(config.input_dir, DownsampleConfig::default().input_dir);
    }

    #[test]
    fn test_load_config_without_file_uses_defaults() {
        let config: DownsampleConfig = load_config(None).unwrap();
        assert_eq!(config.target_per_class, DownsampleConfig::default().target_per_class);
    }

    #[test]
    fn test_load_config_missing_file() {
        let dir = TempDir::new().unwrap();
        let result: Result<DownsampleConfig> = load_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_load_config_rejects_bad_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "target_per_class = \"many\"\n").unwrap();

        let result: Result<DownsampleConfig> = load_config(Some(&path));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
