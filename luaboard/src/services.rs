//! Collaborators a board session depends on.
//!
//! The library never downloads anything itself. Prerequisite scripts,
//! firmware images and the flashing tool come from a [`PackageSource`]; the
//! latest published firmware commit comes from a [`BuildTracker`].

use std::path::PathBuf;
use std::sync::Arc;

use crate::board::BoardModel;
use crate::error::Result;
use crate::event::EventSink;

/// Provider of on-disk packages.
pub trait PackageSource: Send + Sync {
    /// Directory holding `lua/board-info.lua` and `lua/lib/*.lua`.
    fn prerequisites(&self) -> Result<PathBuf>;

    /// Directory holding `flash_args` and the firmware binaries for `model`.
    fn firmware(&self, model: &BoardModel) -> Result<PathBuf>;

    /// Path of the flashing tool executable.
    fn flash_tool(&self) -> Result<PathBuf>;
}

/// Source of the latest published firmware commit per model.
pub trait BuildTracker: Send + Sync {
    /// Latest commit for `model`, if known.
    fn latest_commit(&self, model: &BoardModel) -> Option<String>;
}

/// Tracker that never knows of a newer build.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBuildTracker;

impl BuildTracker for NoBuildTracker {
    fn latest_commit(&self, _model: &BoardModel) -> Option<String> {
        None
    }
}

/// Everything a session needs from its host application.
#[derive(Clone)]
pub struct Services {
    /// Receiver of events and console output.
    pub sink: Arc<dyn EventSink>,
    /// Package provider.
    pub packages: Arc<dyn PackageSource>,
    /// Latest-build lookup.
    pub builds: Arc<dyn BuildTracker>,
}

impl Services {
    /// Bundle the collaborators.
    pub fn new(
        sink: Arc<dyn EventSink>,
        packages: Arc<dyn PackageSource>,
        builds: Arc<dyn BuildTracker>,
    ) -> Self {
        Self {
            sink,
            packages,
            builds,
        }
    }
}
