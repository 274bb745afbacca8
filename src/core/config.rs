use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::directory::NamePreference;
use super::launcher::Launcher;
use crate::error::WatchError;
use crate::platform::Signal;

/// Keys accepted by `wd config set`
pub const KEYS: &[&str] = &[
    "interval_secs",
    "source_timeout_ms",
    "proc_root",
    "kill_signal",
    "name_preference",
    "interpreters.<ext>",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Settling interval between the two bootstrap snapshots, and the
    /// polling period of `wd watch`
    pub interval_secs: u64,
    /// Deadline for a single snapshot read
    pub source_timeout_ms: u64,
    pub proc_root: PathBuf,
    pub kill_signal: Signal,
    pub name_preference: NamePreference,
    /// Script extension -> interpreter program
    pub interpreters: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            source_timeout_ms: 5000,
            proc_root: PathBuf::from("/proc"),
            kill_signal: Signal::Kill,
            name_preference: NamePreference::Cmdline,
            interpreters: BTreeMap::from([("py".to_string(), "python3".to_string())]),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Read a config file; a missing, empty or unparseable file yields the
    /// defaults.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let data = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        if data.trim().is_empty() {
            return Ok(Config::default());
        }

        Ok(serde_json::from_str(&data).unwrap_or_else(|e| {
            log::warn!("Ignoring unreadable config {:?}: {}", config_path, e);
            Config::default()
        }))
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let data =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        fs::write(config_path, data)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().with_context(|| "Could not determine config directory")?;

        Ok(config_dir.join("watchdogs").join("config.json"))
    }

    /// Update one key from its string form
    pub fn set(&mut self, key: &str, value: &str) -> crate::Result<()> {
        let value = value.trim();
        match key {
            "interval_secs" => {
                self.interval_secs = parse_positive(key, value)?;
            }
            "source_timeout_ms" => {
                self.source_timeout_ms = parse_positive(key, value)?;
            }
            "proc_root" => {
                if value.is_empty() {
                    return Err(WatchError::config("proc_root cannot be empty"));
                }
                self.proc_root = PathBuf::from(value);
            }
            "kill_signal" => {
                self.kill_signal = Signal::parse(value).ok_or_else(|| {
                    WatchError::config(format!("unknown signal '{}' (use term or kill)", value))
                })?;
            }
            "name_preference" => {
                self.name_preference = NamePreference::parse(value).ok_or_else(|| {
                    WatchError::config(format!(
                        "unknown name preference '{}' (use cmdline or comm)",
                        value
                    ))
                })?;
            }
            _ => match key.strip_prefix("interpreters.") {
                Some(ext) if !ext.is_empty() => {
                    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
                    if value.is_empty() {
                        self.interpreters.remove(&ext);
                    } else {
                        self.interpreters.insert(ext, value.to_string());
                    }
                }
                _ => {
                    return Err(WatchError::config(format!(
                        "unknown key '{}' (valid keys: {})",
                        key,
                        KEYS.join(", ")
                    )))
                }
            },
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms.max(1))
    }

    pub fn launcher(&self) -> Launcher {
        let interpreters: HashMap<String, String> = self
            .interpreters
            .iter()
            .map(|(ext, program)| (ext.clone(), program.clone()))
            .collect();
        Launcher::new(interpreters)
    }
}

fn parse_positive(key: &str, value: &str) -> crate::Result<u64> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(WatchError::config(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))),
    }
}
