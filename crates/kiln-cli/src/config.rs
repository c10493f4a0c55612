//! Configuration vault: reads/writes `~/.kiln/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use kiln_types::{KilnConfig, KilnError};

/// Return the path to `~/.kiln/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".kiln").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<KilnConfig>, KilnError> {
    load_from(&config_path())
}

/// Load the config from `path`, apply environment overrides and validate
/// the result.
pub(crate) fn load_from(path: &Path) -> Result<Option<KilnConfig>, KilnError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| KilnError::Config(format!("failed to read {}: {e}", path.display())))?;
    let mut cfg: KilnConfig =
        toml::from_str(&raw).map_err(|e| KilnError::Config(format!("failed to parse {}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `KILN_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `KILN_EMERGENCY_SHUTOFF` | `safety.emergency_shutoff_temp` |
/// | `KILN_TICK_SECONDS` | `timing.tick_seconds` |
/// | `KILN_AUTOMATIC_RESTARTS` | `restart.automatic_restarts` |
/// | `KILN_PROFILES_DIR` | `restart.profiles_dir` |
/// | `KILN_STATE_FILE` | `restart.state_file` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut KilnConfig) {
    if let Ok(v) = std::env::var("KILN_EMERGENCY_SHUTOFF")
        && let Ok(temp) = v.trim().parse::<f64>()
    {
        cfg.safety.emergency_shutoff_temp = temp;
    }
    if let Ok(v) = std::env::var("KILN_TICK_SECONDS")
        && let Ok(secs) = v.trim().parse::<f64>()
        && secs > 0.0
    {
        cfg.timing.tick_seconds = secs;
    }
    if let Ok(v) = std::env::var("KILN_AUTOMATIC_RESTARTS")
        && let Ok(enabled) = v.trim().to_ascii_lowercase().parse::<bool>()
    {
        cfg.restart.automatic_restarts = enabled;
    }
    if let Ok(v) = std::env::var("KILN_PROFILES_DIR") {
        cfg.restart.profiles_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("KILN_STATE_FILE") {
        cfg.restart.state_file = PathBuf::from(v);
    }
}

/// Save the config to disk, creating `~/.kiln/` if necessary.
pub fn save(cfg: &KilnConfig) -> Result<(), KilnError> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &KilnConfig, path: &Path) -> Result<(), KilnError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| KilnError::Config(format!("failed to create config directory: {e}")))?;
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| KilnError::Config(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| KilnError::Config(format!("failed to write {}: {e}", path.display())))
}
