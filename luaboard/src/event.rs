//! Board events and the sink that receives them.
//!
//! Events are fire-and-forget notifications. Each one has a name and a
//! key/value payload; fields taken from untrusted board output are base64
//! encoded, structural fields (line numbers, error codes) are plain text.

use std::fmt::Write as _;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

/// Encode untrusted board text for an event payload.
pub fn encode_text(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

/// An event detected on the console or produced by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    /// Power-on reset banner seen.
    #[serde(rename = "boardPowerOnReset")]
    PowerOnReset,
    /// Software (CPU) reset banner seen.
    #[serde(rename = "boardSoftwareReset")]
    SoftwareReset,
    /// Deep-sleep wake-up reset banner seen.
    #[serde(rename = "boardDeepSleepReset")]
    DeepSleepReset,
    /// A block of a visual program started; `block` is base64.
    BlockStart {
        /// Block identifier, base64.
        block: String,
    },
    /// A block of a visual program finished; `block` is base64.
    BlockEnd {
        /// Block identifier, base64.
        block: String,
    },
    /// A block raised an error; both fields are base64.
    BlockError {
        /// Block identifier, base64.
        block: String,
        /// Error text, base64.
        error: String,
    },
    /// Lua runtime error reported on the console.
    #[serde(rename = "boardRuntimeError")]
    RuntimeError {
        /// Chunk or module name.
        #[serde(rename = "where")]
        location: String,
        /// Line number as printed by the board.
        line: String,
        /// Numeric error code, `0` when absent.
        exception: String,
        /// Error message, base64.
        message: String,
    },
    /// Progress or status text for the user.
    #[serde(rename = "boardUpdate")]
    Update {
        /// Human-readable status.
        message: String,
    },
    /// A board finished attaching.
    #[serde(rename = "boardAttached")]
    Attached,
    /// The board was detached.
    #[serde(rename = "boardDetached")]
    Detached,
}

impl Event {
    /// Build a `boardUpdate` event.
    pub fn update(message: impl Into<String>) -> Self {
        Self::Update {
            message: message.into(),
        }
    }

    /// Event name as seen by event consumers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PowerOnReset => "boardPowerOnReset",
            Self::SoftwareReset => "boardSoftwareReset",
            Self::DeepSleepReset => "boardDeepSleepReset",
            Self::BlockStart { .. } => "blockStart",
            Self::BlockEnd { .. } => "blockEnd",
            Self::BlockError { .. } => "blockError",
            Self::RuntimeError { .. } => "boardRuntimeError",
            Self::Update { .. } => "boardUpdate",
            Self::Attached => "boardAttached",
            Self::Detached => "boardDetached",
        }
    }

    /// Key/value payload text, e.g. `"block": "YWJj"`.
    ///
    /// `boardUpdate` carries its message verbatim; reset and lifecycle events
    /// have an empty payload.
    pub fn payload(&self) -> String {
        match self {
            Self::PowerOnReset
            | Self::SoftwareReset
            | Self::DeepSleepReset
            | Self::Attached
            | Self::Detached => String::new(),
            Self::BlockStart { block } | Self::BlockEnd { block } => {
                format!("\"block\": \"{block}\"")
            },
            Self::BlockError { block, error } => {
                format!("\"block\": \"{block}\", \"error\": \"{error}\"")
            },
            Self::RuntimeError {
                location,
                line,
                exception,
                message,
            } => {
                let mut out = String::new();
                let _ = write!(
                    out,
                    "\"where\": \"{location}\", \"line\": \"{line}\", \
                     \"exception\": \"{exception}\", \"message\": \"{message}\""
                );
                out
            },
            Self::Update { message } => message.clone(),
        }
    }
}

/// Receiver of board events and console output.
///
/// Implementations must not block for long: `emit` and `console` are called
/// from the inspector thread between byte reads.
pub trait EventSink: Send + Sync {
    /// Deliver an event. Not acknowledged.
    fn emit(&self, event: Event);

    /// Receive console bytes while passthrough is enabled.
    fn console(&self, _bytes: &[u8]) {}
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}
