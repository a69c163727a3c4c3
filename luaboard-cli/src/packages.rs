//! Package and build lookups backed by local files.
//!
//! Layout of the package directory:
//!
//! ```text
//! <dir>/lua/board-info.lua
//! <dir>/lua/lib/*.lua
//! <dir>/firmware/<BOARD-NAME>/flash_args
//! <dir>/firmware/<BOARD-NAME>/*.bin
//! ```

use crate::config::Config;
use directories::ProjectDirs;
use luaboard::{BoardModel, BuildTracker, Error, PackageSource};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Flashing tool used when none is configured; resolved through `PATH`.
const DEFAULT_FLASH_TOOL: &str = "esptool.py";

/// Packages unpacked in a local directory.
#[derive(Debug, Clone)]
pub(crate) struct LocalPackages {
    dir: Option<PathBuf>,
    flash_tool: Option<PathBuf>,
}

impl LocalPackages {
    pub(crate) fn from_config(config: &Config) -> Self {
        let dir = config
            .packages
            .dir
            .clone()
            .or_else(|| {
                ProjectDirs::from("", "", "luaboard").map(|dirs| dirs.data_dir().join("packages"))
            });
        Self {
            dir,
            flash_tool: config
                .packages
                .flash_tool
                .clone(),
        }
    }

    fn dir(&self) -> luaboard::Result<PathBuf> {
        let dir = self
            .dir
            .clone()
            .ok_or_else(|| Error::Config("no package directory configured".into()))?;
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(Error::Config(format!(
                "package directory {} does not exist",
                dir.display()
            )))
        }
    }
}

impl PackageSource for LocalPackages {
    fn prerequisites(&self) -> luaboard::Result<PathBuf> {
        self.dir()
    }

    fn firmware(&self, model: &BoardModel) -> luaboard::Result<PathBuf> {
        let name = model
            .firmware_name()
            .ok_or_else(|| Error::Config(format!("no firmware package for board model {model}")))?;
        Ok(self
            .dir()?
            .join("firmware")
            .join(name))
    }

    fn flash_tool(&self) -> luaboard::Result<PathBuf> {
        Ok(self
            .flash_tool
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FLASH_TOOL)))
    }
}

/// Latest firmware commits from the `[builds]` config table.
#[derive(Debug, Clone, Default)]
pub(crate) struct ConfigBuildTracker {
    commits: BTreeMap<String, String>,
}

impl ConfigBuildTracker {
    pub(crate) fn from_config(config: &Config) -> Self {
        Self {
            commits: config
                .builds
                .clone(),
        }
    }
}

impl BuildTracker for ConfigBuildTracker {
    fn latest_commit(&self, model: &BoardModel) -> Option<String> {
        self.commits
            .get(model.code())
            .cloned()
    }
}
