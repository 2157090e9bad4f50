//! Standard configuration locations

use std::path::PathBuf;

/// Per-user configuration directory
///
/// Returns: `<config dir>/pcmout` (e.g. `~/.config/pcmout` on Linux),
/// falling back to `./pcmout` when the platform has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pcmout")
}

/// Default engine config file: `<config dir>/pcmout/config.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}
