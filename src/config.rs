//! Configuration loading and management
//!
//! Two layers: `Config` holds filesystem paths fixed at startup, while
//! `Settings` is the hot-reloadable tuning snapshot handed into every
//! ledger update. Settings parsing is per-field tolerant: an invalid value
//! logs a warning and falls back to its default instead of failing the
//! whole file.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// How simultaneous keys are ordered inside a chord
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiKeyMode {
    /// Down-set is sorted, so press order does not matter
    Combination,
    /// Down-set keeps press order
    Sequence,
}

impl FromStr for MultiKeyMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "combination" => Ok(MultiKeyMode::Combination),
            "sequence" => Ok(MultiKeyMode::Sequence),
            _ => Err(()),
        }
    }
}

/// Runtime tuning snapshot for the ledgers and the poll loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub multi_key_mode: MultiKeyMode,
    /// Seconds a chord must be held before release to count as HELD
    pub hold_threshold: f64,
    /// Seconds of idle (no keys down) before the pending history flushes
    pub flush_timeout: f64,
    /// Seconds between poll ticks
    pub loop_delay: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            multi_key_mode: MultiKeyMode::Combination,
            hold_threshold: 1.0,
            flush_timeout: 0.5,
            loop_delay: 0.0167,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file, falling back to defaults for a
    /// missing file, an unparsable file, or any individually invalid field
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text),
            Err(err) => {
                info!(path = %path.display(), %err, "no settings file, using defaults");
                Self::default()
            }
        }
    }

    fn from_json(text: &str) -> Self {
        let mut settings = Self::default();

        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "settings file is not valid JSON, using defaults");
                return settings;
            }
        };

        if let Some(raw) = value.get("multiKeyMode") {
            match raw.as_str().and_then(|s| s.parse().ok()) {
                Some(mode) => settings.multi_key_mode = mode,
                None => warn!(
                    value = %raw,
                    "invalid multiKeyMode, defaulting to combination"
                ),
            }
        }

        settings.hold_threshold =
            seconds_field(&value, "holdThreshold", settings.hold_threshold);
        settings.flush_timeout =
            seconds_field(&value, "flushTimeout", settings.flush_timeout);
        settings.loop_delay = seconds_field(&value, "loopDelay", settings.loop_delay);
        if settings.loop_delay <= 0.0 {
            warn!("loopDelay must be positive, defaulting");
            settings.loop_delay = Self::default().loop_delay;
        }

        settings
    }
}

/// Read a non-negative seconds value, keeping `default` on anything else
fn seconds_field(value: &serde_json::Value, key: &str, default: f64) -> f64 {
    match value.get(key) {
        None => default,
        Some(raw) => match raw.as_f64() {
            Some(secs) if secs.is_finite() && secs >= 0.0 => secs,
            _ => {
                warn!(field = key, value = %raw, "invalid setting, defaulting");
                default
            }
        },
    }
}

/// Daemon configuration paths
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for user configuration
    pub data_dir: PathBuf,

    /// Path to the hot-reloadable settings file
    pub settings_path: PathBuf,

    /// Path to the device list file
    pub devices_path: PathBuf,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        let data_dir = PathBuf::from(&home).join(".config").join("macrokeyd");

        Ok(Self {
            settings_path: data_dir.join("settings.json"),
            devices_path: data_dir.join("devices.json"),
            data_dir,
        })
    }

    /// Ensure the configuration directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// Device node paths to open at startup, one session each.
    /// A missing device list reads as empty.
    pub fn device_paths(&self) -> Result<Vec<PathBuf>> {
        let text = match std::fs::read_to_string(&self.devices_path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).context(format!(
                    "failed to read {}",
                    self.devices_path.display()
                ))
            }
        };

        serde_json::from_str(&text).context(format!(
            "failed to parse {}",
            self.devices_path.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_load() {
        let config = Config::load().unwrap();
        assert!(config.settings_path.to_string_lossy().contains("macrokeyd"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.multi_key_mode, MultiKeyMode::Combination);
        assert_eq!(settings.hold_threshold, 1.0);
        assert_eq!(settings.flush_timeout, 0.5);
    }

    #[test]
    fn test_settings_from_valid_json() {
        let settings = Settings::from_json(
            r#"{"multiKeyMode":"sequence","holdThreshold":2.0,"flushTimeout":1.5,"loopDelay":0.01}"#,
        );
        assert_eq!(settings.multi_key_mode, MultiKeyMode::Sequence);
        assert_eq!(settings.hold_threshold, 2.0);
        assert_eq!(settings.flush_timeout, 1.5);
        assert_eq!(settings.loop_delay, 0.01);
    }

    #[test]
    fn test_invalid_fields_fall_back_individually() {
        let settings = Settings::from_json(
            r#"{"multiKeyMode":"banana","holdThreshold":-3,"flushTimeout":0.25}"#,
        );
        // Bad fields default, good ones apply.
        assert_eq!(settings.multi_key_mode, MultiKeyMode::Combination);
        assert_eq!(settings.hold_threshold, 1.0);
        assert_eq!(settings.flush_timeout, 0.25);
    }

    #[test]
    fn test_garbage_file_falls_back_entirely() {
        assert_eq!(Settings::from_json("not json"), Settings::default());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let settings = Settings::from_json(r#"{"forceBackground":true}"#);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_zero_loop_delay_rejected() {
        let settings = Settings::from_json(r#"{"loopDelay":0}"#);
        assert_eq!(settings.loop_delay, Settings::default().loop_delay);
    }
}
