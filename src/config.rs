// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! User configuration stored at `~/.ariaflow/config.json`.

use std::fs;
use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::download::{SupervisorConfig, DEFAULT_AGENT_BINARY};

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Agent program launched for every transfer
    #[serde(default = "default_agent_binary")]
    pub agent_binary: PathBuf,
    /// Destination when a start request names no folder
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// tracing level: error, warn, info, debug or trace
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_binary: default_agent_binary(),
            download_dir: default_download_dir(),
            log_level: default_log_level(),
        }
    }
}

fn default_agent_binary() -> PathBuf {
    PathBuf::from(DEFAULT_AGENT_BINARY)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Platform download directory plus `ariaflow`, or `./downloads`.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .map(|d| d.join("ariaflow"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

impl Config {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new(self.agent_binary.clone(), self.download_dir.clone())
    }

    /// Set one field from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "agent_binary" => self.agent_binary = PathBuf::from(value),
            "download_dir" => self.download_dir = PathBuf::from(value),
            "log_level" => {
                let level = value.to_lowercase();
                if !matches!(level.as_str(), "error" | "warn" | "info" | "debug" | "trace") {
                    bail!("Unknown log level '{}'", value);
                }
                self.log_level = level;
            }
            other => bail!("Unknown config key '{}' (expected agent_binary, download_dir or log_level)", other),
        }
        Ok(())
    }

    /// Read a config file; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }
}

pub fn get_config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".ariaflow"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join(CONFIG_FILE))
}

pub fn load_config() -> Result<Config> {
    Config::load_from(&config_path()?)
}

pub fn save_config(config: &Config) -> Result<()> {
    config.save_to(&config_path()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = Config::load_from(&tmp.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.agent_binary, PathBuf::from("aria2c"));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"agent_binary": "/opt/aria2/bin/aria2c"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.agent_binary, PathBuf::from("/opt/aria2/bin/aria2c"));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.set("download_dir", "/data/incoming").unwrap();
        config.set("log_level", "DEBUG").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.download_dir, PathBuf::from("/data/incoming"));
        assert_eq!(loaded.log_level, "debug");
    }

    #[test]
    fn test_set_rejects_unknown_keys_and_levels() {
        let mut config = Config::default();
        assert!(config.set("split", "32").is_err());
        assert!(config.set("log_level", "loud").is_err());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
