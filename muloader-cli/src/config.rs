//! Configuration file support for muloader.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (MULOADER_*)
//! 3. Local config file (./muloader.toml)
//! 4. Global config file (~/.config/muloader/config.toml)

use crate::CliError;
use anyhow::Result;
use directories::ProjectDirs;
use log::{debug, info, warn};
use muloader::SessionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local configuration file, also used to remember the chosen port.
pub const LOCAL_CONFIG_FILE: &str = "muloader.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Upload session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Escalate protocol anomalies to errors.
    #[serde(default)]
    pub strict: bool,
    /// Timeout for one status byte or block readback, in milliseconds.
    pub read_timeout_ms: Option<u64>,
    /// Timeout for the device's boot announcement, in seconds.
    pub init_timeout_secs: Option<u64>,
    /// Timeout for one tag metadata line, in milliseconds.
    pub line_timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Upload settings.
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike discovered files, an explicit file must exist and parse.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!("Invalid TOML in {}: {e}", path.display()))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {} (invalid TOML): {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "muloader").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }

        if other.upload.strict {
            self.upload.strict = true;
        }
        if other.upload.read_timeout_ms.is_some() {
            self.upload.read_timeout_ms = other.upload.read_timeout_ms;
        }
        if other.upload.init_timeout_secs.is_some() {
            self.upload.init_timeout_secs = other.upload.init_timeout_secs;
        }
        if other.upload.line_timeout_ms.is_some() {
            self.upload.line_timeout_ms = other.upload.line_timeout_ms;
        }
    }

    /// Build the session settings; `strict` comes from the command line.
    pub fn session_config(&self, strict: bool) -> Result<SessionConfig> {
        let mut session = SessionConfig::default().with_strict(strict || self.upload.strict);

        if let Some(ms) = self.upload.read_timeout_ms {
            session.status_timeout = Duration::from_millis(non_zero("upload.read_timeout_ms", ms)?);
        }
        if let Some(secs) = self.upload.init_timeout_secs {
            session.init_timeout = Duration::from_secs(non_zero("upload.init_timeout_secs", secs)?);
        }
        if let Some(ms) = self.upload.line_timeout_ms {
            session.line_timeout = Duration::from_millis(non_zero("upload.line_timeout_ms", ms)?);
        }

        Ok(session)
    }

    /// Remember the serial port in the local config file.
    ///
    /// Other settings already in that file are preserved.
    pub fn remember_port(&mut self, serial: &str) -> Result<PathBuf> {
        self.remember_port_in(Path::new(LOCAL_CONFIG_FILE), serial)
    }

    fn remember_port_in(&mut self, path: &Path, serial: &str) -> Result<PathBuf> {
        let mut local = Self::load_from_file(path).unwrap_or_default();
        local.connection.serial = Some(serial.to_string());

        let content = toml::to_string_pretty(&local)?;
        fs::write(path, content)?;
        info!("Saved port {serial} to {}", path.display());

        self.connection.serial = Some(serial.to_string());
        Ok(path.to_path_buf())
    }
}

fn non_zero(key: &str, value: u64) -> Result<u64> {
    if value == 0 {
        return Err(CliError::Config(format!("{key} must be greater than zero")).into());
    }
    Ok(value)
}
