//! Board identification reported by `/_info.lua`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Build information printed by the board.
///
/// The board prints quasi-JSON; keys may appear in lower case or
/// capitalised and missing keys read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardInfo {
    /// Firmware build identifier.
    #[serde(default, alias = "Build")]
    pub build: String,
    /// Firmware commit hash.
    #[serde(default, alias = "Commit")]
    pub commit: String,
    /// Board model code, e.g. `N1ESP32`.
    #[serde(default, alias = "Board")]
    pub board: String,
}

impl BoardInfo {
    /// Parse info text, tolerating trailing commas.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(&sanitize(text)).map_err(|e| Error::InvalidInfo(e.to_string()))
    }

    /// Model named by the `board` field.
    pub fn model(&self) -> BoardModel {
        BoardModel::from_code(&self.board)
    }
}

/// Remove the trailing commas Lua table dumps leave before `}` and `]`.
pub fn sanitize(text: &str) -> String {
    text.replace(",}", "}").replace(",]", "]")
}

/// Supported board models.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BoardModel {
    /// Whitecat N1 ESP32.
    N1Esp32,
    /// Espressif ESP32 Core Board.
    Esp32CoreBoard,
    /// SparkFun ESP32 Thing.
    Esp32Thing,
    /// Any other model code.
    Other(String),
}

impl BoardModel {
    /// Map a model code as printed by the board.
    pub fn from_code(code: &str) -> Self {
        match code {
            "N1ESP32" => Self::N1Esp32,
            "ESP32COREBOARD" => Self::Esp32CoreBoard,
            "ESP32THING" => Self::Esp32Thing,
            other => Self::Other(other.to_string()),
        }
    }

    /// Model code as printed by the board.
    pub fn code(&self) -> &str {
        match self {
            Self::N1Esp32 => "N1ESP32",
            Self::Esp32CoreBoard => "ESP32COREBOARD",
            Self::Esp32Thing => "ESP32THING",
            Self::Other(code) => code,
        }
    }

    /// Name used in firmware binary file names, if the model has firmware.
    pub fn firmware_name(&self) -> Option<&'static str> {
        match self {
            Self::N1Esp32 => Some("WHITECAT-ESP32-N1"),
            Self::Esp32CoreBoard => Some("ESP32-CORE-BOARD"),
            Self::Esp32Thing => Some("ESP32-THING"),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for BoardModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
