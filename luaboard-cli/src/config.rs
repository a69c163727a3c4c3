//! Configuration file support for luaboard.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (LUABOARD_*)
//! 3. Local config file (./luaboard.toml)
//! 4. Global config file (~/.config/luaboard/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the local configuration file.
pub const LOCAL_CONFIG: &str = "luaboard.toml";

/// Port configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
}

/// Package locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackagesConfig {
    /// Directory holding `lua/` prerequisites and `firmware/<board>/` packages.
    pub dir: Option<PathBuf>,
    /// Flashing tool executable.
    pub flash_tool: Option<PathBuf>,
}

/// Session timeouts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long to wait for the board to boot, in milliseconds.
    pub boot_timeout_ms: Option<u64>,
    /// How long to wait for the board info reply, in milliseconds.
    pub info_timeout_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Package locations.
    #[serde(default)]
    pub packages: PackagesConfig,
    /// Latest published firmware commit per board model.
    #[serde(default)]
    pub builds: BTreeMap<String, String>,
    /// Session timeouts.
    #[serde(default)]
    pub session: SessionConfig,
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
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
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
                    warn!("Failed to parse TOML config file {}: {}", path.display(), e);
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
        ProjectDirs::from("", "", "luaboard").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.port.serial.is_some() {
            self.port.serial = other.port.serial;
        }

        if other.packages.dir.is_some() {
            self.packages.dir = other.packages.dir;
        }
        if other.packages.flash_tool.is_some() {
            self.packages.flash_tool = other.packages.flash_tool;
        }

        self.builds.extend(other.builds);

        if other.session.boot_timeout_ms.is_some() {
            self.session.boot_timeout_ms = other.session.boot_timeout_ms;
        }
        if other.session.info_timeout_ms.is_some() {
            self.session.info_timeout_ms = other.session.info_timeout_ms;
        }
    }
}
