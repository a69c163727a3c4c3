//! Error types for luaboard.

use std::{fmt, io};
use thiserror::Error;

/// Result type for luaboard operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reason a boot handshake was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootFailure {
    /// The ROM bootloader could not verify the application image.
    CorruptedFirmware,
    /// Lua RTOS could not mount its flash and fell back to the ROM shell.
    FlashError,
}

impl BootFailure {
    /// Message reported to the event sink as a `boardUpdate`.
    pub fn message(self) -> &'static str {
        match self {
            Self::CorruptedFirmware => "Corrupted firmware",
            Self::FlashError => "Flash error",
        }
    }
}

impl fmt::Display for BootFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Error type for luaboard operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations, child processes).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The board could not be attached. The link is left closed.
    #[error("Attach failed: {0}")]
    Attach(String),

    /// The link was closed or failed while reading or writing.
    #[error("Link lost")]
    LinkLost,

    /// A timeout-bounded read exceeded its bound.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The board reported a boot failure during the handshake.
    #[error("Boot failed: {0}")]
    Boot(BootFailure),

    /// Filesystem provisioning after reset failed.
    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    /// Firmware upgrade failed.
    #[error("Upgrade failed: {0}")]
    Upgrade(String),

    /// Another attach or upgrade is in progress.
    #[error("Busy: {0}")]
    Busy(String),

    /// No board is attached.
    #[error("No board attached")]
    NotAttached,

    /// Board identity could not be parsed.
    #[error("Invalid board info: {0}")]
    InvalidInfo(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is a read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
