//! YAML configuration loading and saving
//!
//! Generic over any serde type, so applications embedding the engine can
//! store their own settings alongside [`super::EngineConfig`].

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use super::EngineConfig;

/// Parse a YAML file; `Ok(None)` when it does not exist
fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    let value = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    Ok(Some(value))
}

/// Load configuration from a YAML file
///
/// A missing file yields `T::default()`. An unreadable or unparsable file is
/// logged and also yields the default; a bad config file should never keep
/// audio from starting.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match read_yaml(path) {
        Ok(Some(config)) => {
            log::info!("load_config: loaded {:?}", path);
            config
        }
        Ok(None) => {
            log::info!("load_config: {:?} not found, using defaults", path);
            T::default()
        }
        Err(e) => {
            log::warn!("load_config: {:#}, using defaults", e);
            T::default()
        }
    }
}

/// Load an [`EngineConfig`], resetting out-of-range settings to their defaults
///
/// Each reset is logged. The result always opens a player and a ring client
/// without `InvalidConfig`.
pub fn load_engine_config(path: &Path) -> EngineConfig {
    let mut config: EngineConfig = load_config(path);
    for reset in config.sanitize() {
        log::warn!("load_engine_config: {:?}: {}", path, reset);
    }
    config
}

/// Save configuration to a YAML file, creating parent directories as needed
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: wrote {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, BlockConfig, EngineConfig, RingConfig};

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: EngineConfig = load_config(Path::new("/nonexistent/pcmout/config.yaml"));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pcmout.yaml");

        let config = EngineConfig::null()
            .with_block(BlockConfig::default().with_block_count(2).with_block_frames(441))
            .with_ring(RingConfig::default().with_max_write_frames(32));

        save_config(&config, &path).unwrap();
        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.backend, BackendKind::Null);
    }

    #[test]
    fn test_engine_config_out_of_range_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcmout.yaml");
        std::fs::write(
            &path,
            "backend: null_sink\nblock:\n  block_count: 7\n  block_frames: 0\nring:\n  buffer_ms: 0\n  max_write_frames: 0\n  max_padding_ms: 5\n",
        )
        .unwrap();

        let config = load_engine_config(&path);
        assert_eq!(config.backend, BackendKind::Null);
        assert_eq!(config.block, BlockConfig::default());
        assert_eq!(config.ring.buffer_ms, RingConfig::default().buffer_ms);
        assert_eq!(config.ring.max_write_frames, RingConfig::default().max_write_frames);
        // In-range settings survive
        assert_eq!(config.ring.max_padding_ms, 5);
    }

    #[test]
    fn test_engine_config_in_range_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pcmout.yaml");
        let config = EngineConfig::null()
            .with_block(BlockConfig::default().with_block_count(2).with_block_frames(128));
        save_config(&config, &path).unwrap();

        assert_eq!(load_engine_config(&path), config);
        assert_eq!(
            load_engine_config(Path::new("/nonexistent/pcmout/config.yaml")),
            EngineConfig::default()
        );
    }

    #[test]
    fn test_invalid_yaml_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "block: [this is not a map").unwrap();

        let config: EngineConfig = load_config(&path);
        assert_eq!(config, EngineConfig::default());
    }
}
